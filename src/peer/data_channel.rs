use crate::peer::connection::{EventSink, TransportEvent};
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::data_channel::{data_channel_message::DataChannelMessage, RTCDataChannel};

/// Forward control channel lifecycle and text frames to the session
pub(crate) fn attach_dc(dc: &Arc<RTCDataChannel>, sink: EventSink) {
    let label = dc.label().to_string();

    dc.on_open(Box::new({
        let sink = sink.clone();
        let label = label.clone();
        move || {
            info!(%label, "Data channel opened");
            sink.post(TransportEvent::ChannelOpen { label });
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let sink = sink.clone();
        move |msg: DataChannelMessage| {
            if !msg.is_string {
                debug!(len = msg.data.len(), "Binary frame treated as text");
            }
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            debug!(len = text.len(), "Received frame");
            sink.post(TransportEvent::Frame(text));
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new(move || {
        info!(%label, "Data channel closed");
        sink.post(TransportEvent::ChannelClosed);
        Box::pin(async {})
    }));
}

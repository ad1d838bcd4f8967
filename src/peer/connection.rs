//! The single peer transport and its control channel.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::media::TrackSink;
use crate::peer::data_channel::attach_dc;
use crate::peer::ice::{rtc_config, GatheringTracker};
use crate::peer::state::{ChannelSlot, ConnectivityChange, ConnectivityTracker};
use crate::peer::types::{Role, TransportConnectivityState};
use crate::session::SessionInput;
use crate::utils::random_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine,
        setting_engine::SettingEngine, APIBuilder,
    },
    data_channel::{
        data_channel_init::RTCDataChannelInit, data_channel_state::RTCDataChannelState,
        RTCDataChannel,
    },
    ice_transport::{ice_candidate::RTCIceCandidate, ice_gatherer_state::RTCIceGathererState},
    interceptor::registry::Registry,
    peer_connection::{peer_connection_state::RTCPeerConnectionState, RTCPeerConnection},
    rtp_transceiver::{
        rtp_codec::RTPCodecType, rtp_receiver::RTCRtpReceiver, rtp_sender::RTCRtpSender,
        RTCRtpTransceiver,
    },
    track::{track_local::TrackLocal, track_remote::TrackRemote},
};

/// What a transport callback observed
pub enum TransportEvent {
    Connectivity(TransportConnectivityState),
    ChannelOpen { label: String },
    Frame(String),
    ChannelClosed,
    Track(Arc<TrackRemote>),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Connectivity(state) => f.debug_tuple("Connectivity").field(state).finish(),
            TransportEvent::ChannelOpen { label } => {
                f.debug_struct("ChannelOpen").field("label", label).finish()
            }
            TransportEvent::Frame(text) => f.debug_tuple("Frame").field(&text.len()).finish(),
            TransportEvent::ChannelClosed => f.write_str("ChannelClosed"),
            TransportEvent::Track(track) => f.debug_tuple("Track").field(&track.id()).finish(),
        }
    }
}

/// Posts transport events, tagged with the transport session id
#[derive(Clone)]
pub(crate) struct EventSink {
    session_id: String,
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl EventSink {
    pub(crate) fn post(&self, event: TransportEvent) {
        let input = SessionInput::Transport {
            session_id: self.session_id.clone(),
            event,
        };
        if self.tx.send(input).is_err() {
            debug!(session_id = %self.session_id, "Session gone, transport event dropped");
        }
    }
}

pub struct TransportSession {
    id: String,
    role: Role,
    pc: Arc<RTCPeerConnection>,
    channel: Arc<ChannelSlot<Arc<RTCDataChannel>>>,
    gathering: Arc<GatheringTracker>,
    connectivity: ConnectivityTracker,
    // kept for the transport's lifetime and reused by later calls
    senders: Mutex<Vec<(RTPCodecType, Arc<RTCRtpSender>)>>,
    created_at: DateTime<Utc>,
}

impl TransportSession {
    /// New transport plus the control channel this side opens
    pub async fn create_as_offerer(
        config: &SessionConfig,
        tx: mpsc::UnboundedSender<SessionInput>,
    ) -> Result<Self> {
        let session = Self::create(config, Role::Offerer, tx.clone()).await?;

        let dc = session
            .pc
            .create_data_channel(
                &config.channel_label,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;
        if session.channel.capture(dc.clone()).is_err() {
            return Err(Error::sequencing(
                "create_as_offerer",
                "control channel already exists",
            ));
        }
        attach_dc(&dc, session.sink(tx));
        info!(session_id = %session.id, label = %config.channel_label, "Control channel created");
        Ok(session)
    }

    /// New transport that waits for the offerer's control channel
    pub async fn create_as_answerer(
        config: &SessionConfig,
        tx: mpsc::UnboundedSender<SessionInput>,
    ) -> Result<Self> {
        let session = Self::create(config, Role::Answerer, tx.clone()).await?;

        let slot = session.channel.clone();
        let sink = session.sink(tx);
        session
            .pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                match slot.capture(dc.clone()) {
                    Ok(()) => {
                        info!(label = %dc.label(), "Incoming control channel");
                        attach_dc(&dc, sink.clone());
                    }
                    Err(duplicate) => {
                        warn!(label = %duplicate.label(), "Extra data channel refused");
                        tokio::spawn(async move {
                            if let Err(e) = duplicate.close().await {
                                debug!("Closing extra data channel failed: {e}");
                            }
                        });
                    }
                }
                Box::pin(async {})
            }));
        Ok(session)
    }

    async fn create(
        config: &SessionConfig,
        role: Role,
        tx: mpsc::UnboundedSender<SessionInput>,
    ) -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;

        let mut settings = SettingEngine::default();
        settings.set_include_loopback_candidate(config.include_loopback_candidates);

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .with_setting_engine(settings)
            .build();
        let pc = Arc::new(api.new_peer_connection(rtc_config(config)).await?);

        let session = Self {
            id: random_id(),
            role,
            pc,
            channel: Arc::new(ChannelSlot::new()),
            gathering: Arc::new(GatheringTracker::new()),
            connectivity: ConnectivityTracker::new(),
            senders: Mutex::new(Vec::new()),
            created_at: Utc::now(),
        };
        session.wire_callbacks(session.sink(tx));
        info!(session_id = %session.id, ?role, "Transport session created");
        Ok(session)
    }

    fn sink(&self, tx: mpsc::UnboundedSender<SessionInput>) -> EventSink {
        EventSink {
            session_id: self.id.clone(),
            tx,
        }
    }

    fn wire_callbacks(&self, sink: EventSink) {
        self.pc
            .on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                match &cand {
                    Some(c) => dump_candidate("LOCAL", c),
                    None => debug!("End of local candidates"),
                }
                Box::pin(async {})
            }));

        let gathering = self.gathering.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
                debug!(?state, "ICE gathering state changed");
                if state == RTCIceGathererState::Complete {
                    gathering.mark_complete();
                }
                Box::pin(async {})
            }));

        // weak: the handler is owned by the connection itself
        let pc_stats: Weak<RTCPeerConnection> = Arc::downgrade(&self.pc);
        let state_sink = sink.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                debug!(state = ?st, "Peer connection state changed");
                if matches!(
                    st,
                    RTCPeerConnectionState::Connected | RTCPeerConnectionState::Failed
                ) {
                    if let Some(pc) = pc_stats.upgrade() {
                        let moment = if st == RTCPeerConnectionState::Connected {
                            "CONNECTED"
                        } else {
                            "FAILED"
                        };
                        tokio::spawn(async move {
                            dump_selected_pair(&pc, moment).await;
                        });
                    }
                }
                state_sink.post(TransportEvent::Connectivity(st.into()));
                Box::pin(async {})
            }));

        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                sink.post(TransportEvent::Track(track));
                Box::pin(async {})
            },
        ));
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn pc(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    pub(crate) fn gathering(&self) -> &GatheringTracker {
        &self.gathering
    }

    pub fn connectivity(&self) -> TransportConnectivityState {
        self.connectivity.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity() == TransportConnectivityState::Connected
    }

    pub(crate) fn observe_connectivity(
        &mut self,
        next: TransportConnectivityState,
    ) -> Option<ConnectivityChange> {
        self.connectivity.observe(next)
    }

    pub fn control_channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.channel.get()
    }

    pub async fn send_frame(&self, text: &str) -> Result<()> {
        let dc = self
            .channel
            .get()
            .ok_or_else(|| Error::ChannelUnavailable("no control channel".into()))?;
        let ready = dc.ready_state();
        if ready != RTCDataChannelState::Open {
            return Err(Error::ChannelUnavailable(format!("control channel is {ready}")));
        }
        dc.send_text(text.to_string()).await?;
        debug!(session_id = %self.id, len = text.len(), "Frame sent");
        Ok(())
    }

    pub async fn local_sdp(&self) -> Option<String> {
        self.pc.local_description().await.map(|d| d.sdp)
    }

    pub async fn remote_sdp(&self) -> Option<String> {
        self.pc.remote_description().await.map(|d| d.sdp)
    }

    pub async fn close(&self) {
        if let Some(dc) = self.channel.take() {
            if let Err(e) = dc.close().await {
                debug!("Control channel close failed: {e}");
            }
        }
        if let Err(e) = self.pc.close().await {
            warn!(session_id = %self.id, "Peer connection close failed: {e}");
        }
        info!(session_id = %self.id, "Transport session closed");
    }
}

#[async_trait]
impl TrackSink for TransportSession {
    /// Hands the track to an idle sender of the same kind, else adds a new one
    async fn attach_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<Arc<RTCRtpSender>> {
        let kind = track.kind();
        let candidates: Vec<Arc<RTCRtpSender>> = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, sender)| sender.clone())
            .collect();
        for sender in candidates {
            if sender.track().await.is_none() {
                sender.replace_track(Some(track)).await?;
                debug!(session_id = %self.id, ?kind, "Idle sender reused");
                return Ok(sender);
            }
        }

        let sender = self.pc.add_track(track).await?;
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, sender.clone()));
        Ok(sender)
    }

    /// Leaves the sender (and its transceiver) in place with no track
    async fn detach_track(&self, sender: &Arc<RTCRtpSender>) -> Result<()> {
        Ok(sender.replace_track(None).await?)
    }
}

//! Tracing setup, transport diagnostics and the session event stream.
//!
//! Presentation layers subscribe to [`SessionEvent`]s through the receiver
//! returned by [`EventEmitter::channel`]; every lifecycle transition is also
//! logged through `tracing`.

use crate::call::CallState;
use crate::media::MediaError;
use crate::peer::types::TransportConnectivityState;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

/// Install the global fmt subscriber; `RUST_LOG` overrides `filter`
pub fn init(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

pub fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            "Local candidate ({label}): candidate={} sdp_mid={:?} sdp_mline_index={:?}",
            init.candidate, init.sdp_mid, init.sdp_mline_index
        );
    }
}

/// Snapshot of the nominated candidate pair
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, report) in stats.reports {
        if let StatsReportType::CandidatePair(pair) = report {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

/// Everything a presentation layer may want to render
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connectivity(TransportConnectivityState),
    ChannelReady { label: String },
    ChannelClosed,
    CallState { from: CallState, to: CallState },
    IncomingCall { from: String },
    Chat(String),
    RemoteTrack { id: String, stream_id: String, kind: String },
    MediaError(MediaError),
    Fingerprint(String),
}

/// Sending half of the session event stream
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventEmitter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Emitter that only logs
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    fn emit(&self, event: SessionEvent) {
        debug!(?event, "emit");
        if let Some(tx) = &self.tx {
            // receiver gone means nobody renders; the session keeps running
            let _ = tx.send(event);
        }
    }

    pub fn emit_connectivity(&self, state: TransportConnectivityState) {
        info!(%state, "Transport connectivity changed");
        self.emit(SessionEvent::Connectivity(state));
    }

    pub fn emit_channel_ready(&self, label: &str) {
        info!(label, "Control channel open");
        self.emit(SessionEvent::ChannelReady {
            label: label.to_string(),
        });
    }

    pub fn emit_channel_closed(&self) {
        info!("Control channel closed");
        self.emit(SessionEvent::ChannelClosed);
    }

    pub fn emit_call_state(&self, from: CallState, to: CallState) {
        info!(%from, %to, "Call state changed");
        self.emit(SessionEvent::CallState { from, to });
    }

    pub fn emit_incoming_call(&self, from: &str) {
        info!(from, "Incoming call");
        self.emit(SessionEvent::IncomingCall {
            from: from.to_string(),
        });
    }

    pub fn emit_message(&self, msg: &str) {
        self.emit(SessionEvent::Chat(msg.to_string()));
    }

    pub fn emit_remote_track(&self, id: String, stream_id: String, kind: String) {
        info!(%id, %stream_id, %kind, "Remote track received");
        self.emit(SessionEvent::RemoteTrack {
            id,
            stream_id,
            kind,
        });
    }

    pub fn emit_media_error(&self, err: &MediaError) {
        self.emit(SessionEvent::MediaError(err.clone()));
    }

    pub fn emit_fingerprint(&self, fingerprint: &str) {
        info!(fingerprint, "Connection fingerprint ready");
        self.emit(SessionEvent::Fingerprint(fingerprint.to_string()));
    }
}

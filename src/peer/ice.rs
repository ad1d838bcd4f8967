use crate::config::SessionConfig;
use crate::peer::types::{CandidateGatheringState, ServerConfig};
use crate::utils::add_ice_url_scheme;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::{
    api::APIBuilder,
    ice_transport::{ice_gatherer_state::RTCIceGathererState, ice_server::RTCIceServer},
    peer_connection::{
        configuration::RTCConfiguration,
        policy::{bundle_policy::RTCBundlePolicy, rtcp_mux_policy::RTCRtcpMuxPolicy},
        RTCPeerConnection,
    },
};

/// How long the ICE server probe waits for a matching candidate
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracks candidate gathering for the current local description generation.
///
/// Each generation moves `Gathering -> Complete` exactly once. Waiters see a
/// single-shot resolution; a new generation is started with [`begin`].
///
/// [`begin`]: GatheringTracker::begin
#[derive(Debug)]
pub struct GatheringTracker {
    state: watch::Sender<CandidateGatheringState>,
    generation: AtomicU64,
}

impl GatheringTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(CandidateGatheringState::Gathering);
        Self {
            state,
            generation: AtomicU64::new(0),
        }
    }

    /// Start a new local description generation
    pub fn begin(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(CandidateGatheringState::Gathering);
        debug!(generation, "Candidate gathering started");
        generation
    }

    /// Returns true only for the transition that completed the generation
    pub fn mark_complete(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == CandidateGatheringState::Complete {
                return false;
            }
            *state = CandidateGatheringState::Complete;
            true
        });
        if changed {
            debug!(
                generation = self.generation(),
                "Candidate gathering complete"
            );
        }
        changed
    }

    pub fn state(&self) -> CandidateGatheringState {
        *self.state.borrow()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Suspend until the current generation completes; `false` on timeout
    pub async fn wait_complete(&self, limit: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let waited = timeout(
            limit,
            rx.wait_for(|state| *state == CandidateGatheringState::Complete),
        )
        .await;
        matches!(waited, Ok(Ok(_)))
    }
}

impl Default for GatheringTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Peer connection configuration built from the session config
pub fn rtc_config(config: &SessionConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(&config.ice_servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Candidate counts of a finished description
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(sdp: &str) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for line in sdp.lines().filter(|l| l.starts_with("a=candidate:")) {
        if line.contains("typ host") {
            summary.host += 1;
        } else if line.contains("typ srflx") {
            summary.srflx += 1;
        } else if line.contains("typ relay") {
            summary.relay += 1;
        }
    }

    info!(
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "Candidate analysis"
    );
    if summary.relay == 0 {
        warn!("No TURN relay candidates found, connection through NAT may fail");
    }
    summary
}

/// Checks that a STUN/TURN server hands out candidates of the expected type
pub async fn check_ice_server_availability(config: &ServerConfig) -> bool {
    let url = add_ice_url_scheme(config);
    info!(server = %config.id, %url, "Probing ICE server");

    let rtc_config = RTCConfiguration {
        ice_servers: ice_servers(std::slice::from_ref(config)),
        ..Default::default()
    };

    let api = APIBuilder::new().build();
    match api.new_peer_connection(rtc_config).await {
        Ok(peer_connection) => check_via_ice_gathering(Arc::new(peer_connection), config.is_turn()).await,
        Err(e) => {
            warn!("Failed to create probe peer connection: {e}");
            false
        }
    }
}

async fn check_via_ice_gathering(peer_connection: Arc<RTCPeerConnection>, turn: bool) -> bool {
    let wanted = if turn { "typ relay" } else { "typ srflx" };

    let (state_tx, mut state_rx) = mpsc::channel(10);
    peer_connection.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        let tx = state_tx.clone();
        Box::pin(async move {
            let _ = tx.send(state).await;
        })
    }));

    let (candidate_tx, mut candidate_rx) = mpsc::channel(10);
    peer_connection.on_ice_candidate(Box::new(move |candidate| {
        let tx = candidate_tx.clone();
        Box::pin(async move {
            let Some(c) = candidate else {
                return;
            };
            match c.to_json() {
                Ok(init) if init.candidate.contains(wanted) => {
                    debug!(candidate = %init.candidate, "Probe found matching candidate");
                    let _ = tx.send(true).await;
                }
                Ok(init) => debug!(candidate = %init.candidate, "Probe candidate ignored"),
                Err(e) => warn!("Failed to read probe candidate: {e}"),
            }
        })
    }));

    // a data channel gives the offer something to negotiate
    if let Err(e) = peer_connection.create_data_channel("probe", None).await {
        warn!("Failed to create probe data channel: {e}");
        return false;
    }
    let started = match peer_connection.create_offer(None).await {
        Ok(offer) => peer_connection.set_local_description(offer).await,
        Err(e) => Err(e),
    };
    if let Err(e) = started {
        warn!("Failed to start probe gathering: {e}");
        let _ = peer_connection.close().await;
        return false;
    }

    let found = tokio::select! {
        result = timeout(PROBE_TIMEOUT, candidate_rx.recv()) => matches!(result, Ok(Some(true))),
        _ = async {
            while let Some(state) = state_rx.recv().await {
                if state == RTCIceGathererState::Complete {
                    break;
                }
            }
        } => false,
    };

    info!(found, "ICE server probe finished");
    let _ = peer_connection.close().await;
    found
}

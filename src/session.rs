//! One peer relationship: transport, negotiation, call and media.
//!
//! Transport callbacks never touch this state. They post [`SessionInput`]s
//! which the owner feeds to [`Session::handle`] one at a time, so every
//! mutation happens on a single logical thread.

use crate::call::{CallAction, CallInput, CallMachine, CallState, InboundFrame, SignalingEnvelope};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::logger::EventEmitter;
use crate::media::{
    CaptureDevice, LocalMediaSession, MediaConstraints, MediaError, MediaSessionController,
    TrackSink,
};
use crate::peer::codec::{connection_fingerprint, decode_description, encode_description};
use crate::peer::connection::{TransportEvent, TransportSession};
use crate::peer::negotiation::NegotiationExchange;
use crate::peer::types::{Role, SdpKind, SessionDescription, TransportConnectivityState};
use crate::store::{MetadataStore, SessionMetadata};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use webrtc::track::track_remote::TrackRemote;

/// Work posted to the session from callbacks and spawned tasks
pub enum SessionInput {
    Transport {
        session_id: String,
        event: TransportEvent,
    },
    MediaAcquired {
        epoch: u64,
        result: std::result::Result<LocalMediaSession, MediaError>,
    },
}

impl fmt::Debug for SessionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionInput::Transport { session_id, event } => f
                .debug_struct("Transport")
                .field("session_id", session_id)
                .field("event", event)
                .finish(),
            SessionInput::MediaAcquired { epoch, result } => f
                .debug_struct("MediaAcquired")
                .field("epoch", epoch)
                .field("ok", &result.is_ok())
                .finish(),
        }
    }
}

pub struct Session {
    config: SessionConfig,
    transport: Option<TransportSession>,
    negotiation: NegotiationExchange,
    call: CallMachine,
    media: MediaSessionController,
    // live for the current call
    remote_tracks: Vec<Arc<TrackRemote>>,
    // every track seen on this transport; a receiver fires once, not per call
    received_tracks: Vec<Arc<TrackRemote>>,
    fingerprint: Option<String>,
    store: Option<Box<dyn MetadataStore>>,
    events: EventEmitter,
    input_tx: mpsc::UnboundedSender<SessionInput>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        device: Arc<dyn CaptureDevice>,
        events: EventEmitter,
    ) -> (Self, mpsc::UnboundedReceiver<SessionInput>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let session = Self {
            negotiation: NegotiationExchange::new(config.gathering_timeout()),
            call: CallMachine::new(config.local_name.clone()),
            media: MediaSessionController::new(device, MediaConstraints::default()),
            config,
            transport: None,
            remote_tracks: Vec::new(),
            received_tracks: Vec::new(),
            fingerprint: None,
            store: None,
            events,
            input_tx,
        };
        (session, input_rx)
    }

    pub fn with_store(mut self, store: Box<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_constraints(mut self, constraints: MediaConstraints) -> Self {
        self.media.set_constraints(constraints);
        self
    }

    // ---- accessors ----

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connectivity(&self) -> TransportConnectivityState {
        self.transport
            .as_ref()
            .map(|t| t.connectivity())
            .unwrap_or(TransportConnectivityState::New)
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity() == TransportConnectivityState::Connected
    }

    pub fn role(&self) -> Option<Role> {
        self.transport.as_ref().map(|t| t.role())
    }

    pub fn transport_id(&self) -> Option<&str> {
        self.transport.as_ref().map(|t| t.id())
    }

    pub fn call_state(&self) -> CallState {
        self.call.state()
    }

    pub fn remote_party(&self) -> Option<&str> {
        self.call.remote_party()
    }

    /// When the current transport was created
    pub fn transport_since(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.transport.as_ref().map(|t| t.created_at())
    }

    pub fn remote_tracks(&self) -> &[Arc<TrackRemote>] {
        &self.remote_tracks
    }

    pub fn local_media(&self) -> Option<&LocalMediaSession> {
        self.media.current()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Wire text for a description, plain or compact per config
    pub fn encode(&self, desc: &SessionDescription) -> Result<String> {
        encode_description(desc, self.config.compact_descriptions)
    }

    // ---- negotiation ----

    /// Fresh transport as offerer; resolves once gathering settled
    pub async fn create_offer(&mut self) -> Result<SessionDescription> {
        if self.is_connected() {
            warn!(operation = "create_offer", call = %self.call.state(), "Offer refused");
            return Err(Error::sequencing(
                "create_offer",
                "transport already connected, disconnect first",
            ));
        }
        self.reset_transport().await;

        let transport =
            TransportSession::create_as_offerer(&self.config, self.input_tx.clone()).await?;
        let transport = self.transport.insert(transport);
        match self.negotiation.create_offer(transport).await {
            Ok(desc) => Ok(desc),
            Err(e) => {
                error!(operation = "create_offer", "Offer failed: {e}");
                self.reset_transport().await;
                Err(e)
            }
        }
    }

    pub async fn accept_offer_and_create_answer(
        &mut self,
        remote: &SessionDescription,
    ) -> Result<SessionDescription> {
        remote.expect_kind(SdpKind::Offer)?;
        // reject unparsable input before the current transport is touched
        remote.to_rtc()?;
        if self.is_connected() {
            warn!(operation = "accept_offer_and_create_answer", state = %self.connectivity(), "Offer refused");
            return Err(Error::sequencing(
                "accept_offer_and_create_answer",
                "transport already connected",
            ));
        }
        self.reset_transport().await;

        let transport =
            TransportSession::create_as_answerer(&self.config, self.input_tx.clone()).await?;
        let transport = self.transport.insert(transport);
        match self
            .negotiation
            .accept_offer_and_create_answer(transport, remote)
            .await
        {
            Ok(desc) => Ok(desc),
            Err(e) => {
                error!(operation = "accept_offer_and_create_answer", "Answer failed: {e}");
                self.reset_transport().await;
                Err(e)
            }
        }
    }

    pub async fn apply_answer(&mut self, remote: &SessionDescription) -> Result<()> {
        remote.expect_kind(SdpKind::Answer)?;
        let Some(transport) = self.transport.as_ref() else {
            return Err(Error::sequencing("apply_answer", "no outstanding offer"));
        };
        self.negotiation
            .apply_answer(transport, remote)
            .await
            .inspect_err(|e| warn!(operation = "apply_answer", state = %transport.connectivity(), "{e}"))
    }

    /// Offer text yields the encoded answer to copy back; answer text yields `None`
    pub async fn receive_description(&mut self, text: &str) -> Result<Option<String>> {
        let desc = decode_description(text)
            .inspect_err(|e| warn!(operation = "receive_description", "{e}"))?;
        match desc.kind() {
            SdpKind::Offer => {
                let answer = self.accept_offer_and_create_answer(&desc).await?;
                Ok(Some(self.encode(&answer)?))
            }
            SdpKind::Answer => {
                self.apply_answer(&desc).await?;
                Ok(None)
            }
        }
    }

    // ---- chat & calls ----

    pub async fn send_chat(&mut self, message: &str) -> Result<()> {
        let transport = self.transport.as_ref().ok_or(Error::NoTransport)?;
        let frame = SignalingEnvelope::Chat {
            message: message.to_string(),
        }
        .encode()?;
        transport.send_frame(&frame).await
    }

    pub async fn start_call(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::sequencing(
                "start_call",
                format!("transport is {}", self.connectivity()),
            ));
        }
        if self.call.state() != CallState::Idle {
            return Err(Error::sequencing(
                "start_call",
                format!("call is {}", self.call.state()),
            ));
        }
        self.drive(CallInput::StartCall).await;
        Ok(())
    }

    pub async fn accept_call(&mut self) -> Result<()> {
        self.require_ringing("accept_call")?;
        self.drive(CallInput::AcceptCall).await;
        Ok(())
    }

    pub async fn decline_call(&mut self) -> Result<()> {
        self.require_ringing("decline_call")?;
        self.drive(CallInput::DeclineCall).await;
        Ok(())
    }

    /// No-op while idle
    pub async fn hang_up(&mut self) {
        self.drive(CallInput::HangUp).await;
    }

    fn require_ringing(&self, operation: &'static str) -> Result<()> {
        match self.call.state() {
            CallState::Ringing => Ok(()),
            other => Err(Error::sequencing(operation, format!("call is {other}"))),
        }
    }

    /// Acquire capture ahead of any call
    pub async fn warm_up_media(&mut self) -> Result<()> {
        if let Err(e) = self.media.acquire().await {
            self.events.emit_media_error(&e);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn toggle_audio_mute(&mut self) -> Option<bool> {
        self.media.toggle_audio_mute()
    }

    pub fn toggle_video_mute(&mut self) -> Option<bool> {
        self.media.toggle_video_mute()
    }

    /// Ends any call and tears the transport down; a new negotiation is needed after
    pub async fn disconnect(&mut self) {
        if self.call.state() != CallState::Idle {
            self.drive(CallInput::HangUp).await;
        }
        let had_transport = self.transport.is_some();
        self.reset_transport().await;
        self.media.release(None).await;
        if had_transport {
            self.events
                .emit_connectivity(TransportConnectivityState::Closed);
        }
    }

    // ---- event loop ----

    pub async fn handle(&mut self, input: SessionInput) {
        match input {
            SessionInput::Transport { session_id, event } => {
                if self.transport_id() != Some(session_id.as_str()) {
                    debug!(%session_id, ?event, "Event from a retired transport dropped");
                    return;
                }
                self.handle_transport(event).await;
            }
            SessionInput::MediaAcquired { epoch, result } => {
                self.handle_media_acquired(epoch, result).await;
            }
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connectivity(state) => {
                let Some(transport) = self.transport.as_mut() else {
                    return;
                };
                let Some(change) = transport.observe_connectivity(state) else {
                    debug!(%state, "Repeated connectivity report ignored");
                    return;
                };
                self.events.emit_connectivity(change.to);
                if change.first_connect {
                    self.on_first_connect().await;
                }
                if change.to.is_terminal() {
                    warn!(from = %change.from, to = %change.to, call = %self.call.state(), "Transport lost");
                    self.drive(CallInput::TransportLost).await;
                }
            }
            TransportEvent::ChannelOpen { label } => self.events.emit_channel_ready(&label),
            TransportEvent::Frame(text) => match InboundFrame::decode(&text) {
                InboundFrame::Chat(message) => self.events.emit_message(&message),
                InboundFrame::Signal(envelope) => {
                    debug!(kind = envelope.kind(), call = %self.call.state(), "Signal received");
                    self.drive(CallInput::Remote(envelope)).await;
                }
            },
            TransportEvent::ChannelClosed => {
                self.events.emit_channel_closed();
                self.drive(CallInput::TransportLost).await;
            }
            TransportEvent::Track(track) => {
                self.received_tracks.push(track.clone());
                match self.call.state() {
                    CallState::Connecting | CallState::Active => self.expose_track(track),
                    state => {
                        debug!(id = %track.id(), kind = %track.kind(), call = %state, "Remote track parked until the next call");
                    }
                }
            }
        }
    }

    fn expose_track(&mut self, track: Arc<TrackRemote>) {
        if self.remote_tracks.iter().any(|t| Arc::ptr_eq(t, &track)) {
            return;
        }
        self.events
            .emit_remote_track(track.id(), track.stream_id(), track.kind().to_string());
        self.remote_tracks.push(track);
    }

    /// Tracks from earlier calls resume on their receivers without a new callback
    fn expose_received_tracks(&mut self) {
        for track in self.received_tracks.clone() {
            self.expose_track(track);
        }
    }

    async fn handle_media_acquired(
        &mut self,
        epoch: u64,
        result: std::result::Result<LocalMediaSession, MediaError>,
    ) {
        let current = self.call.state() == CallState::Connecting && self.call.epoch() == epoch;
        match result {
            Ok(capture) if !current => {
                info!(epoch, id = capture.id(), "Capture finished for an abandoned call, released");
            }
            Ok(capture) => {
                self.media.install(capture);
                self.drive(CallInput::MediaReady { epoch }).await;
            }
            Err(e) if !current => {
                debug!(epoch, "Capture failed for an abandoned call: {e}");
            }
            Err(e) => {
                error!(operation = "acquire_media", epoch, call = %self.call.state(), "{e}");
                self.events.emit_media_error(&e);
                self.drive(CallInput::MediaFailed { epoch }).await;
            }
        }
    }

    async fn on_first_connect(&mut self) {
        self.negotiation.reset_buffers();

        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let (local, remote) = (transport.local_sdp().await, transport.remote_sdp().await);
        self.fingerprint = match (local, remote) {
            (Some(l), Some(r)) => connection_fingerprint(&l, &r),
            _ => None,
        };
        if let Some(fp) = &self.fingerprint {
            self.events.emit_fingerprint(fp);
        }

        if let Some(store) = &self.store {
            let metadata = SessionMetadata {
                session_id: transport.id().to_string(),
                role: transport.role(),
                local_name: self.config.local_name.clone(),
                fingerprint: self.fingerprint.clone(),
                connected_at: chrono::Utc::now(),
            };
            if let Err(e) = store.save(&metadata) {
                warn!(operation = "save_metadata", "Could not cache session metadata: {e}");
            }
        }
    }

    /// Runs the call machine until it has nothing left to do
    async fn drive(&mut self, input: CallInput) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            let step = self.call.handle(input, self.is_connected());
            for (from, to) in &step.transitions {
                self.events.emit_call_state(*from, *to);
            }
            if step.transitions.iter().any(|(_, to)| *to == CallState::Active) {
                self.expose_received_tracks();
            }
            for action in step.actions {
                if let Some(next) = self.execute(action).await {
                    queue.push_back(next);
                }
            }
        }
    }

    async fn execute(&mut self, action: CallAction) -> Option<CallInput> {
        match action {
            CallAction::Send(envelope) => {
                if let Err(e) = self.send_envelope(&envelope).await {
                    warn!(kind = envelope.kind(), call = %self.call.state(), "Signal not sent: {e}");
                }
                None
            }
            CallAction::NotifyIncoming { from } => {
                self.events.emit_incoming_call(&from);
                None
            }
            CallAction::AcquireMedia { epoch } => {
                if self.media.is_active() {
                    debug!(epoch, "Reusing warmed-up capture");
                    return Some(CallInput::MediaReady { epoch });
                }
                let acquisition = self.media.acquisition();
                let tx = self.input_tx.clone();
                tokio::spawn(async move {
                    let result = acquisition.await;
                    if tx.send(SessionInput::MediaAcquired { epoch, result }).is_err() {
                        debug!(epoch, "Session gone before capture finished");
                    }
                });
                None
            }
            CallAction::SendRenegotiationOffer { epoch } => {
                match self.offer_with_media().await {
                    Ok(()) => None,
                    Err(e) => {
                        error!(operation = "renegotiate_offer", epoch, "{e}");
                        Some(CallInput::RenegotiationFailed { epoch })
                    }
                }
            }
            CallAction::AnswerRenegotiation { epoch, sdp } => {
                match self.answer_with_media(&sdp).await {
                    Ok(()) => Some(CallInput::RenegotiationDone { epoch }),
                    Err(e) => {
                        error!(operation = "renegotiate_answer", epoch, "{e}");
                        Some(CallInput::RenegotiationFailed { epoch })
                    }
                }
            }
            CallAction::ApplyRenegotiationAnswer { epoch, sdp } => {
                let Some(transport) = self.transport.as_ref() else {
                    return Some(CallInput::RenegotiationFailed { epoch });
                };
                match self
                    .negotiation
                    .apply_renegotiation_answer(transport, &sdp)
                    .await
                {
                    Ok(()) => Some(CallInput::RenegotiationDone { epoch }),
                    Err(e) => {
                        error!(operation = "apply_renegotiation_answer", epoch, "{e}");
                        Some(CallInput::RenegotiationFailed { epoch })
                    }
                }
            }
            CallAction::Teardown => {
                let sink = self.transport.as_ref().map(|t| t as &dyn TrackSink);
                self.media.release(sink).await;
                self.remote_tracks.clear();
                None
            }
        }
    }

    async fn send_envelope(&self, envelope: &SignalingEnvelope) -> Result<()> {
        let transport = self.transport.as_ref().ok_or(Error::NoTransport)?;
        transport.send_frame(&envelope.encode()?).await
    }

    async fn offer_with_media(&mut self) -> Result<()> {
        let transport = self.transport.as_ref().ok_or(Error::NoTransport)?;
        self.media.attach(transport).await?;
        let sdp = self.negotiation.renegotiate_offer(transport).await?;
        transport
            .send_frame(&SignalingEnvelope::CallOffer { sdp }.encode()?)
            .await
    }

    async fn answer_with_media(&mut self, offer_sdp: &str) -> Result<()> {
        let transport = self.transport.as_ref().ok_or(Error::NoTransport)?;
        self.media.attach(transport).await?;
        let sdp = self.negotiation.renegotiate_answer(transport, offer_sdp).await?;
        transport
            .send_frame(&SignalingEnvelope::CallAnswer { sdp }.encode()?)
            .await
    }

    async fn reset_transport(&mut self) {
        if self.call.state() != CallState::Idle {
            self.drive(CallInput::TransportLost).await;
        }
        self.negotiation.reset_buffers();
        self.fingerprint = None;
        self.remote_tracks.clear();
        self.received_tracks.clear();
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
    }
}

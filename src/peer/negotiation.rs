//! Offer/answer production and consumption.
//!
//! A local description is only handed out once candidate gathering for its
//! generation has completed, so the text carries every candidate and no
//! trickle exchange is needed.

use crate::error::{Error, Result};
use crate::peer::connection::TransportSession;
use crate::peer::ice::analyze_candidates;
use crate::peer::types::{SdpKind, SessionDescription};
use std::time::Duration;
use tracing::{info, warn};
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

#[derive(Debug)]
pub struct NegotiationExchange {
    gathering_timeout: Duration,
    outstanding_offer: Option<SessionDescription>,
    last_remote: Option<SessionDescription>,
}

impl NegotiationExchange {
    pub fn new(gathering_timeout: Duration) -> Self {
        Self {
            gathering_timeout,
            outstanding_offer: None,
            last_remote: None,
        }
    }

    pub fn has_outstanding_offer(&self) -> bool {
        self.outstanding_offer.is_some()
    }

    pub fn last_remote(&self) -> Option<&SessionDescription> {
        self.last_remote.as_ref()
    }

    /// Descriptions are single use; drop them once connected
    pub fn reset_buffers(&mut self) {
        self.outstanding_offer = None;
        self.last_remote = None;
    }

    pub async fn create_offer(&mut self, transport: &TransportSession) -> Result<SessionDescription> {
        let offer = transport.pc().create_offer(None).await?;
        let desc = self.finalize_local(transport, offer).await?;
        self.outstanding_offer = Some(desc.clone());
        Ok(desc)
    }

    pub async fn accept_offer_and_create_answer(
        &mut self,
        transport: &TransportSession,
        remote: &SessionDescription,
    ) -> Result<SessionDescription> {
        remote.expect_kind(SdpKind::Offer)?;
        if transport.is_connected() {
            return Err(Error::sequencing(
                "accept_offer_and_create_answer",
                "transport already connected",
            ));
        }

        transport
            .pc()
            .set_remote_description(remote.to_rtc()?)
            .await?;
        self.last_remote = Some(remote.clone());

        let answer = transport.pc().create_answer(None).await?;
        self.finalize_local(transport, answer).await
    }

    pub async fn apply_answer(
        &mut self,
        transport: &TransportSession,
        remote: &SessionDescription,
    ) -> Result<()> {
        remote.expect_kind(SdpKind::Answer)?;
        if self.outstanding_offer.is_none() {
            return Err(Error::sequencing("apply_answer", "no outstanding offer"));
        }

        transport
            .pc()
            .set_remote_description(remote.to_rtc()?)
            .await?;
        self.outstanding_offer = None;
        self.last_remote = Some(remote.clone());
        info!(session_id = %transport.id(), "Remote answer applied");
        Ok(())
    }

    /// In-call offer carrying the attached tracks, sent over the control channel
    pub async fn renegotiate_offer(&mut self, transport: &TransportSession) -> Result<String> {
        let offer = transport.pc().create_offer(None).await?;
        let desc = self.finalize_local(transport, offer).await?;
        Ok(desc.sdp().to_string())
    }

    pub async fn renegotiate_answer(
        &mut self,
        transport: &TransportSession,
        offer_sdp: &str,
    ) -> Result<String> {
        let remote = SessionDescription::offer(offer_sdp);
        transport
            .pc()
            .set_remote_description(remote.to_rtc()?)
            .await?;
        let answer = transport.pc().create_answer(None).await?;
        let desc = self.finalize_local(transport, answer).await?;
        Ok(desc.sdp().to_string())
    }

    pub async fn apply_renegotiation_answer(
        &mut self,
        transport: &TransportSession,
        answer_sdp: &str,
    ) -> Result<()> {
        let remote = SessionDescription::answer(answer_sdp);
        transport
            .pc()
            .set_remote_description(remote.to_rtc()?)
            .await?;
        Ok(())
    }

    async fn finalize_local(
        &self,
        transport: &TransportSession,
        local: RTCSessionDescription,
    ) -> Result<SessionDescription> {
        let pc = transport.pc();
        let gathering = transport.gathering();
        let generation = gathering.begin();

        pc.set_local_description(local).await?;
        // an existing ICE transport will not gather again
        if pc.ice_gathering_state() == RTCIceGatheringState::Complete {
            gathering.mark_complete();
        }

        if !gathering.wait_complete(self.gathering_timeout).await {
            warn!(
                session_id = %transport.id(),
                generation,
                timeout_secs = self.gathering_timeout.as_secs(),
                "Candidate gathering timed out, using the candidates found so far"
            );
        }

        let final_desc = pc
            .local_description()
            .await
            .ok_or_else(|| Error::TransportUnusable("no local description after gathering".into()))?;
        let desc = SessionDescription::from_rtc(&final_desc)?;
        analyze_candidates(desc.sdp());
        info!(session_id = %transport.id(), kind = %desc.kind(), generation, "Local description ready");
        Ok(desc)
    }
}

//! Call lifecycle state machine.
//!
//! The machine performs no I/O. Each input yields a [`Step`]: the state
//! transitions taken plus the [`CallAction`]s its owner must carry out.
//! Results of async work come back as inputs tagged with the call epoch;
//! anything tagged with an older epoch belongs to an abandoned call and is
//! dropped.

use crate::call::envelope::SignalingEnvelope;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Calling,
    Ringing,
    Connecting,
    Active,
    Ending,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Idle => "idle",
            CallState::Calling => "calling",
            CallState::Ringing => "ringing",
            CallState::Connecting => "connecting",
            CallState::Active => "active",
            CallState::Ending => "ending",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSide {
    Caller,
    Callee,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallInput {
    StartCall,
    AcceptCall,
    DeclineCall,
    HangUp,
    Remote(SignalingEnvelope),
    MediaReady { epoch: u64 },
    MediaFailed { epoch: u64 },
    RenegotiationDone { epoch: u64 },
    RenegotiationFailed { epoch: u64 },
    TransportLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    Send(SignalingEnvelope),
    NotifyIncoming { from: String },
    AcquireMedia { epoch: u64 },
    /// Attach local tracks, create an offer and send it as `call-offer`
    SendRenegotiationOffer { epoch: u64 },
    /// Attach local tracks, answer `sdp` and send `call-answer`
    AnswerRenegotiation { epoch: u64, sdp: String },
    ApplyRenegotiationAnswer { epoch: u64, sdp: String },
    /// Stop and detach local media, drop remote tracks
    Teardown,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Step {
    pub transitions: Vec<(CallState, CallState)>,
    pub actions: Vec<CallAction>,
}

impl Step {
    pub fn is_noop(&self) -> bool {
        self.transitions.is_empty() && self.actions.is_empty()
    }
}

#[derive(Debug)]
pub struct CallMachine {
    local_name: String,
    state: CallState,
    epoch: u64,
    side: Option<CallSide>,
    media_ready: bool,
    remote_party: Option<String>,
}

impl CallMachine {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            state: CallState::Idle,
            epoch: 0,
            side: None,
            media_ready: false,
            remote_party: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn side(&self) -> Option<CallSide> {
        self.side
    }

    pub fn remote_party(&self) -> Option<&str> {
        self.remote_party.as_deref()
    }

    /// Feed one input; `connected` is the current transport connectivity
    pub fn handle(&mut self, input: CallInput, connected: bool) -> Step {
        let mut step = Step::default();
        trace!(state = %self.state, ?input, "call input");

        match (self.state, input) {
            (CallState::Idle, CallInput::StartCall) => {
                if !connected {
                    debug!("start_call ignored: transport not connected");
                    return step;
                }
                self.begin_call(CallSide::Caller, None);
                self.move_to(&mut step, CallState::Calling);
                step.actions.push(CallAction::Send(SignalingEnvelope::CallRequest {
                    from: self.local_name.clone(),
                }));
            }
            (CallState::Idle, CallInput::Remote(SignalingEnvelope::CallRequest { from })) => {
                self.begin_call(CallSide::Callee, Some(from.clone()));
                self.move_to(&mut step, CallState::Ringing);
                step.actions.push(CallAction::NotifyIncoming { from });
            }

            (CallState::Calling, CallInput::Remote(SignalingEnvelope::CallAccept { from })) => {
                self.remote_party = Some(from);
                self.move_to(&mut step, CallState::Connecting);
                step.actions.push(CallAction::AcquireMedia { epoch: self.epoch });
            }
            (CallState::Calling, CallInput::Remote(SignalingEnvelope::CallDecline { .. })) => {
                self.finish(&mut step, false);
            }
            (CallState::Calling, CallInput::Remote(SignalingEnvelope::CallRequest { .. })) => {
                // both sides dialled at once
                step.actions.push(self.envelope_decline());
            }
            (CallState::Calling, CallInput::HangUp) => {
                step.actions.push(self.envelope_end());
                self.finish(&mut step, false);
            }
            (
                CallState::Calling,
                CallInput::Remote(SignalingEnvelope::CallEnd { .. }) | CallInput::TransportLost,
            ) => {
                self.finish(&mut step, false);
            }

            (CallState::Ringing, CallInput::AcceptCall) => {
                self.move_to(&mut step, CallState::Connecting);
                step.actions.push(CallAction::AcquireMedia { epoch: self.epoch });
            }
            (CallState::Ringing, CallInput::DeclineCall | CallInput::HangUp) => {
                step.actions.push(self.envelope_decline());
                self.finish(&mut step, false);
            }
            (
                CallState::Ringing,
                CallInput::Remote(SignalingEnvelope::CallEnd { .. }) | CallInput::TransportLost,
            ) => {
                self.finish(&mut step, false);
            }

            (CallState::Connecting, CallInput::MediaReady { epoch }) if epoch == self.epoch => {
                self.media_ready = true;
                match self.side {
                    Some(CallSide::Caller) => {
                        step.actions
                            .push(CallAction::SendRenegotiationOffer { epoch: self.epoch });
                    }
                    Some(CallSide::Callee) => {
                        step.actions.push(CallAction::Send(SignalingEnvelope::CallAccept {
                            from: self.local_name.clone(),
                        }));
                    }
                    None => {}
                }
            }
            (CallState::Connecting, CallInput::MediaFailed { epoch }) if epoch == self.epoch => {
                let notice = match self.side {
                    Some(CallSide::Callee) => self.envelope_decline(),
                    _ => self.envelope_end(),
                };
                step.actions.push(notice);
                self.finish(&mut step, true);
            }
            (CallState::Connecting, CallInput::Remote(SignalingEnvelope::CallOffer { sdp }))
                if self.side == Some(CallSide::Callee) && self.media_ready =>
            {
                step.actions.push(CallAction::AnswerRenegotiation {
                    epoch: self.epoch,
                    sdp,
                });
            }
            (CallState::Connecting, CallInput::Remote(SignalingEnvelope::CallAnswer { sdp }))
                if self.side == Some(CallSide::Caller) && self.media_ready =>
            {
                step.actions.push(CallAction::ApplyRenegotiationAnswer {
                    epoch: self.epoch,
                    sdp,
                });
            }
            (CallState::Connecting, CallInput::RenegotiationDone { epoch })
                if epoch == self.epoch =>
            {
                self.move_to(&mut step, CallState::Active);
            }
            (CallState::Connecting, CallInput::RenegotiationFailed { epoch })
                if epoch == self.epoch =>
            {
                step.actions.push(self.envelope_end());
                self.finish(&mut step, true);
            }

            (CallState::Connecting | CallState::Active, CallInput::HangUp) => {
                step.actions.push(self.envelope_end());
                self.finish(&mut step, true);
            }
            (
                CallState::Connecting,
                CallInput::Remote(
                    SignalingEnvelope::CallEnd { .. } | SignalingEnvelope::CallDecline { .. },
                ),
            )
            | (CallState::Active, CallInput::Remote(SignalingEnvelope::CallEnd { .. }))
            | (CallState::Connecting | CallState::Active, CallInput::TransportLost) => {
                self.finish(&mut step, true);
            }

            (state, input) => {
                debug!(%state, ?input, "call input ignored in this state");
            }
        }

        step
    }

    fn begin_call(&mut self, side: CallSide, remote_party: Option<String>) {
        self.epoch += 1;
        self.side = Some(side);
        self.media_ready = false;
        self.remote_party = remote_party;
    }

    fn move_to(&mut self, step: &mut Step, next: CallState) {
        step.transitions.push((self.state, next));
        self.state = next;
    }

    /// Back to idle; `via_ending` once media may be attached
    fn finish(&mut self, step: &mut Step, via_ending: bool) {
        if via_ending {
            self.move_to(step, CallState::Ending);
        }
        step.actions.push(CallAction::Teardown);
        self.move_to(step, CallState::Idle);
        self.side = None;
        self.media_ready = false;
        self.remote_party = None;
    }

    fn envelope_end(&self) -> CallAction {
        CallAction::Send(SignalingEnvelope::CallEnd {
            from: self.local_name.clone(),
        })
    }

    fn envelope_decline(&self) -> CallAction {
        CallAction::Send(SignalingEnvelope::CallDecline {
            from: self.local_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(env: SignalingEnvelope) -> CallInput {
        CallInput::Remote(env)
    }

    fn accept(from: &str) -> CallInput {
        remote(SignalingEnvelope::CallAccept { from: from.into() })
    }

    fn request(from: &str) -> CallInput {
        remote(SignalingEnvelope::CallRequest { from: from.into() })
    }

    fn end(from: &str) -> CallInput {
        remote(SignalingEnvelope::CallEnd { from: from.into() })
    }

    fn sends(step: &Step) -> Vec<&'static str> {
        step.actions
            .iter()
            .filter_map(|a| match a {
                CallAction::Send(env) => Some(env.kind()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_call_requires_connection() {
        let mut m = CallMachine::new("alice");
        assert!(m.handle(CallInput::StartCall, false).is_noop());
        assert_eq!(m.state(), CallState::Idle);

        let step = m.handle(CallInput::StartCall, true);
        assert_eq!(step.transitions, vec![(CallState::Idle, CallState::Calling)]);
        assert_eq!(
            step.actions,
            vec![CallAction::Send(SignalingEnvelope::CallRequest {
                from: "alice".into()
            })]
        );
    }

    #[test]
    fn test_decline_path_releases_in_same_step() {
        let mut m = CallMachine::new("alice");
        m.handle(CallInput::StartCall, true);
        let step = m.handle(
            remote(SignalingEnvelope::CallDecline { from: "bob".into() }),
            true,
        );
        assert_eq!(m.state(), CallState::Idle);
        assert_eq!(step.transitions, vec![(CallState::Calling, CallState::Idle)]);
        assert!(step.actions.contains(&CallAction::Teardown));
    }

    #[test]
    fn test_end_while_idle_is_noop() {
        let mut m = CallMachine::new("alice");
        assert!(m.handle(end("bob"), true).is_noop());
        assert!(m.handle(CallInput::HangUp, true).is_noop());
        assert!(m.handle(CallInput::TransportLost, false).is_noop());
        assert_eq!(m.state(), CallState::Idle);
    }

    #[test]
    fn test_duplicate_end_after_teardown_ignored() {
        let mut m = CallMachine::new("alice");
        m.handle(CallInput::StartCall, true);
        m.handle(accept("bob"), true);
        let first = m.handle(end("bob"), true);
        assert_eq!(
            first.transitions,
            vec![
                (CallState::Connecting, CallState::Ending),
                (CallState::Ending, CallState::Idle)
            ]
        );
        assert_eq!(
            first.actions.iter().filter(|a| **a == CallAction::Teardown).count(),
            1
        );
        assert!(m.handle(end("bob"), true).is_noop());
    }

    #[test]
    fn test_caller_flow_to_active() {
        let mut m = CallMachine::new("alice");
        m.handle(CallInput::StartCall, true);
        let epoch = m.epoch();

        let step = m.handle(accept("bob"), true);
        assert_eq!(m.state(), CallState::Connecting);
        assert_eq!(step.actions, vec![CallAction::AcquireMedia { epoch }]);
        assert_eq!(m.remote_party(), Some("bob"));

        // an answer before our own offer went out is ignored
        assert!(m
            .handle(remote(SignalingEnvelope::CallAnswer { sdp: "x".into() }), true)
            .is_noop());

        let step = m.handle(CallInput::MediaReady { epoch }, true);
        assert_eq!(step.actions, vec![CallAction::SendRenegotiationOffer { epoch }]);

        let step = m.handle(remote(SignalingEnvelope::CallAnswer { sdp: "v=0".into() }), true);
        assert_eq!(
            step.actions,
            vec![CallAction::ApplyRenegotiationAnswer {
                epoch,
                sdp: "v=0".into()
            }]
        );

        let step = m.handle(CallInput::RenegotiationDone { epoch }, true);
        assert_eq!(step.transitions, vec![(CallState::Connecting, CallState::Active)]);
    }

    #[test]
    fn test_callee_accepts_only_after_capture() {
        let mut m = CallMachine::new("bob");
        let step = m.handle(request("alice"), true);
        assert_eq!(m.state(), CallState::Ringing);
        assert_eq!(
            step.actions,
            vec![CallAction::NotifyIncoming {
                from: "alice".into()
            }]
        );
        let epoch = m.epoch();

        let step = m.handle(CallInput::AcceptCall, true);
        assert_eq!(step.actions, vec![CallAction::AcquireMedia { epoch }]);
        assert!(sends(&step).is_empty());

        let step = m.handle(CallInput::MediaReady { epoch }, true);
        assert_eq!(sends(&step), vec!["call-accept"]);

        let step = m.handle(remote(SignalingEnvelope::CallOffer { sdp: "o".into() }), true);
        assert_eq!(
            step.actions,
            vec![CallAction::AnswerRenegotiation {
                epoch,
                sdp: "o".into()
            }]
        );
        m.handle(CallInput::RenegotiationDone { epoch }, true);
        assert_eq!(m.state(), CallState::Active);
    }

    #[test]
    fn test_callee_capture_failure_declines() {
        let mut m = CallMachine::new("bob");
        m.handle(request("alice"), true);
        m.handle(CallInput::AcceptCall, true);
        let step = m.handle(CallInput::MediaFailed { epoch: m.epoch() }, true);
        assert_eq!(sends(&step), vec!["call-decline"]);
        assert!(step.actions.contains(&CallAction::Teardown));
        assert_eq!(m.state(), CallState::Idle);
    }

    #[test]
    fn test_caller_capture_failure_ends() {
        let mut m = CallMachine::new("alice");
        m.handle(CallInput::StartCall, true);
        m.handle(accept("bob"), true);
        let step = m.handle(CallInput::MediaFailed { epoch: m.epoch() }, true);
        assert_eq!(sends(&step), vec!["call-end"]);
        assert_eq!(m.state(), CallState::Idle);
    }

    #[test]
    fn test_stale_epoch_results_discarded() {
        let mut m = CallMachine::new("alice");
        m.handle(CallInput::StartCall, true);
        m.handle(accept("bob"), true);
        let old = m.epoch();
        m.handle(CallInput::HangUp, true);

        m.handle(CallInput::StartCall, true);
        m.handle(accept("bob"), true);
        assert!(m.handle(CallInput::MediaReady { epoch: old }, true).is_noop());
        assert!(m
            .handle(CallInput::RenegotiationDone { epoch: old }, true)
            .is_noop());
        assert_eq!(m.state(), CallState::Connecting);
    }

    #[test]
    fn test_hangup_during_renegotiation_reaches_idle() {
        let mut m = CallMachine::new("alice");
        m.handle(CallInput::StartCall, true);
        m.handle(accept("bob"), true);
        let epoch = m.epoch();
        m.handle(CallInput::MediaReady { epoch }, true);

        let step = m.handle(CallInput::HangUp, true);
        assert_eq!(sends(&step), vec!["call-end"]);
        assert_eq!(m.state(), CallState::Idle);
        // the renegotiation result arriving late changes nothing
        assert!(m.handle(CallInput::RenegotiationDone { epoch }, true).is_noop());
        assert_eq!(m.state(), CallState::Idle);
    }

    #[test]
    fn test_glare_is_declined() {
        let mut m = CallMachine::new("alice");
        m.handle(CallInput::StartCall, true);
        let step = m.handle(request("bob"), true);
        assert_eq!(sends(&step), vec!["call-decline"]);
        assert_eq!(m.state(), CallState::Calling);
    }

    #[test]
    fn test_transport_loss_ends_active_call() {
        let mut m = CallMachine::new("alice");
        m.handle(CallInput::StartCall, true);
        m.handle(accept("bob"), true);
        let epoch = m.epoch();
        m.handle(CallInput::MediaReady { epoch }, true);
        m.handle(remote(SignalingEnvelope::CallAnswer { sdp: "a".into() }), true);
        m.handle(CallInput::RenegotiationDone { epoch }, true);

        let step = m.handle(CallInput::TransportLost, false);
        assert!(sends(&step).is_empty());
        assert_eq!(
            step.transitions,
            vec![
                (CallState::Active, CallState::Ending),
                (CallState::Ending, CallState::Idle)
            ]
        );
    }

    #[test]
    fn test_ringing_cancelled_by_caller() {
        let mut m = CallMachine::new("bob");
        m.handle(request("alice"), true);
        m.handle(end("alice"), true);
        assert_eq!(m.state(), CallState::Idle);
        assert_eq!(m.remote_party(), None);
    }
}

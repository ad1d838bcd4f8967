pub mod envelope;
pub mod machine;

pub use envelope::{InboundFrame, SignalingEnvelope};
pub use machine::{CallAction, CallInput, CallMachine, CallSide, CallState, Step};

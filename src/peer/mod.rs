pub mod codec;
pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod negotiation;
pub mod state;
pub mod types;

pub use codec::{connection_fingerprint, decode_description, encode_description};
pub use connection::{TransportEvent, TransportSession};
pub use negotiation::NegotiationExchange;
pub use types::{
    CandidateGatheringState, Role, SdpKind, ServerConfig, SessionDescription,
    TransportConnectivityState,
};

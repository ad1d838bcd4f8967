//! Error types for session negotiation and call signaling

use crate::media::MediaError;
use crate::peer::types::SdpKind;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating a session or driving a call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session description text could not be decoded
    #[error("Malformed session description: {0}")]
    MalformedDescription(String),

    /// A description of the wrong kind was handed to an operation
    #[error("Unexpected description type: expected {expected}, got {actual}")]
    UnexpectedDescriptionType { expected: SdpKind, actual: SdpKind },

    /// Operation attempted in a state where it makes no sense
    #[error("Sequencing error in {operation}: {reason}")]
    Sequencing {
        operation: &'static str,
        reason: String,
    },

    /// Transport reached a terminal state; a new negotiation is required
    #[error("Transport unusable: {0}")]
    TransportUnusable(String),

    /// No transport session exists yet
    #[error("No transport session")]
    NoTransport,

    /// Control channel missing or not open
    #[error("Control channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Capture failure, classified
    #[error(transparent)]
    Media(#[from] MediaError),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn sequencing(operation: &'static str, reason: impl Into<String>) -> Self {
        Error::Sequencing {
            operation,
            reason: reason.into(),
        }
    }

    /// Malformed or mistyped description input
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedDescription(_) | Error::UnexpectedDescriptionType { .. }
        )
    }

    /// Step issued out of order (answer without offer, offer on a live session, ...)
    pub fn is_sequencing_error(&self) -> bool {
        matches!(self, Error::Sequencing { .. } | Error::NoTransport)
    }

    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Error::TransportUnusable(_) | Error::ChannelUnavailable(_) | Error::WebRtc(_)
        )
    }

    pub fn is_media_error(&self) -> bool {
        matches!(self, Error::Media(_))
    }
}

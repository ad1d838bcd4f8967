use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Offer or answer tag of a session description
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// One endpoint's proposed transport parameters, as exchanged out-of-band.
///
/// Serializes to `{"type": "offer" | "answer", "sdp": "..."}`. Fields are
/// private: a description never changes after construction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    kind: SdpKind,
    sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SdpKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::new(SdpKind::Offer, sdp)
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::new(SdpKind::Answer, sdp)
    }

    pub fn kind(&self) -> SdpKind {
        self.kind
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    /// Fails with `UnexpectedDescriptionType` unless the kind matches
    pub fn expect_kind(&self, expected: SdpKind) -> Result<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(Error::UnexpectedDescriptionType {
                expected,
                actual: self.kind,
            })
        }
    }

    pub(crate) fn to_rtc(&self) -> Result<RTCSessionDescription> {
        let parsed = match self.kind {
            SdpKind::Offer => RTCSessionDescription::offer(self.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(self.sdp.clone()),
        };
        parsed.map_err(|e| Error::MalformedDescription(format!("unparsable {} SDP: {e}", self.kind)))
    }

    pub(crate) fn from_rtc(desc: &RTCSessionDescription) -> Result<Self> {
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Answer => SdpKind::Answer,
            other => {
                return Err(Error::MalformedDescription(format!(
                    "unsupported description type {other}"
                )))
            }
        };
        Ok(Self::new(kind, desc.sdp.clone()))
    }
}

/// Local candidate gathering progress for one local description generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateGatheringState {
    Gathering,
    Complete,
}

/// Connectivity of the underlying transport
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportConnectivityState {
    /// Disconnected, failed and closed end a transport session for good
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransportConnectivityState::Disconnected
                | TransportConnectivityState::Failed
                | TransportConnectivityState::Closed
        )
    }
}

impl From<RTCPeerConnectionState> for TransportConnectivityState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                TransportConnectivityState::New
            }
            RTCPeerConnectionState::Connecting => TransportConnectivityState::Connecting,
            RTCPeerConnectionState::Connected => TransportConnectivityState::Connected,
            RTCPeerConnectionState::Disconnected => TransportConnectivityState::Disconnected,
            RTCPeerConnectionState::Failed => TransportConnectivityState::Failed,
            RTCPeerConnectionState::Closed => TransportConnectivityState::Closed,
        }
    }
}

impl fmt::Display for TransportConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportConnectivityState::New => "new",
            TransportConnectivityState::Connecting => "connecting",
            TransportConnectivityState::Connected => "connected",
            TransportConnectivityState::Disconnected => "disconnected",
            TransportConnectivityState::Failed => "failed",
            TransportConnectivityState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Which side of the manual exchange created the transport
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Offerer,
    Answerer,
}

/// ICE server entry as configured by the operator
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.into(),
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn is_turn(&self) -> bool {
        self.r#type == "turn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_wire_shape() {
        let desc = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json, serde_json::json!({"type": "offer", "sdp": "v=0\r\n"}));
    }

    #[test]
    fn test_description_rejects_unknown_type() {
        let res: std::result::Result<SessionDescription, _> =
            serde_json::from_str(r#"{"type":"pranswer","sdp":"v=0"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_expect_kind() {
        let answer = SessionDescription::answer("v=0");
        assert!(answer.expect_kind(SdpKind::Answer).is_ok());
        let err = answer.expect_kind(SdpKind::Offer).unwrap_err();
        assert!(err.is_negotiation_error());
    }

    #[test]
    fn test_connectivity_mapping() {
        assert_eq!(
            TransportConnectivityState::from(RTCPeerConnectionState::Unspecified),
            TransportConnectivityState::New
        );
        assert_eq!(
            TransportConnectivityState::from(RTCPeerConnectionState::Failed),
            TransportConnectivityState::Failed
        );
        assert!(TransportConnectivityState::Disconnected.is_terminal());
        assert!(!TransportConnectivityState::Connected.is_terminal());
    }
}

//! Messages carried over the control channel.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Call-control and chat messages, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingEnvelope {
    CallRequest { from: String },
    CallAccept { from: String },
    CallDecline { from: String },
    CallOffer { sdp: String },
    CallAnswer { sdp: String },
    CallEnd { from: String },
    Chat { message: String },
}

impl SignalingEnvelope {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of the variant, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingEnvelope::CallRequest { .. } => "call-request",
            SignalingEnvelope::CallAccept { .. } => "call-accept",
            SignalingEnvelope::CallDecline { .. } => "call-decline",
            SignalingEnvelope::CallOffer { .. } => "call-offer",
            SignalingEnvelope::CallAnswer { .. } => "call-answer",
            SignalingEnvelope::CallEnd { .. } => "call-end",
            SignalingEnvelope::Chat { .. } => "chat",
        }
    }
}

/// One decoded control-channel frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Signal(SignalingEnvelope),
    Chat(String),
}

impl InboundFrame {
    /// Anything that is not a known envelope is plain chat text
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str::<SignalingEnvelope>(text) {
            Ok(SignalingEnvelope::Chat { message }) => InboundFrame::Chat(message),
            Ok(envelope) => InboundFrame::Signal(envelope),
            Err(_) => InboundFrame::Chat(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let env = SignalingEnvelope::CallRequest {
            from: "alice".into(),
        };
        assert_eq!(
            env.encode().unwrap(),
            r#"{"type":"call-request","from":"alice"}"#
        );
        let env = SignalingEnvelope::CallOffer { sdp: "v=0".into() };
        assert_eq!(env.encode().unwrap(), r#"{"type":"call-offer","sdp":"v=0"}"#);
    }

    #[test]
    fn test_decode_known_envelope() {
        let frame = InboundFrame::decode(r#"{"type":"call-end","from":"bob"}"#);
        assert_eq!(
            frame,
            InboundFrame::Signal(SignalingEnvelope::CallEnd { from: "bob".into() })
        );
    }

    #[test]
    fn test_chat_envelope_unwraps() {
        let frame = InboundFrame::decode(r#"{"type":"chat","message":"hi"}"#);
        assert_eq!(frame, InboundFrame::Chat("hi".into()));
    }

    #[test]
    fn test_unknown_json_falls_back_to_chat() {
        let raw = r#"{"type":"call-teleport","from":"bob"}"#;
        assert_eq!(InboundFrame::decode(raw), InboundFrame::Chat(raw.into()));
        assert_eq!(InboundFrame::decode("hello"), InboundFrame::Chat("hello".into()));
        assert_eq!(InboundFrame::decode("{not json"), InboundFrame::Chat("{not json".into()));
    }
}

//! Text encodings of session descriptions for the manual exchange.
//!
//! Two forms are understood: plain JSON (`{"type":"offer","sdp":"..."}`) and a
//! compact form (gzip + base64) that stays short enough for QR codes and chat
//! messages. Decoding sniffs the form, so a peer can paste either.

use crate::error::{Error, Result};
use crate::peer::types::SessionDescription;
use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Upper bound for decompressed compact payloads (zip-bomb guard)
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

/// Length of the connection fingerprint in bytes (12 hex chars)
const FINGERPRINT_LEN: usize = 6;

pub fn encode_description(desc: &SessionDescription, compact: bool) -> Result<String> {
    let json = serde_json::to_vec(desc)?;
    if !compact {
        // serde_json output is valid UTF-8
        return Ok(String::from_utf8_lossy(&json).into_owned());
    }

    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&json)?;
    let compressed = gz.finish()?;
    Ok(general_purpose::STANDARD.encode(compressed))
}

pub fn decode_description(text: &str) -> Result<SessionDescription> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::MalformedDescription("empty input".into()));
    }

    let json = if text.starts_with('{') {
        text.as_bytes().to_vec()
    } else {
        inflate(text)?
    };

    serde_json::from_slice(&json)
        .map_err(|e| Error::MalformedDescription(format!("invalid description JSON: {e}")))
}

fn inflate(text: &str) -> Result<Vec<u8>> {
    let compressed = general_purpose::STANDARD
        .decode(text)
        .map_err(|e| Error::MalformedDescription(format!("invalid base64: {e}")))?;

    let gz = GzDecoder::new(&compressed[..]);
    let mut json = Vec::new();
    let mut limited = gz.take(MAX_DECOMPRESSED_SIZE);
    limited
        .read_to_end(&mut json)
        .map_err(|e| Error::MalformedDescription(format!("invalid gzip payload: {e}")))?;
    Ok(json)
}

/// Short code both peers can compare out-of-band.
///
/// Built from the DTLS `a=fingerprint` lines of both descriptions, sorted so
/// the offerer and the answerer derive the same value. `None` when either side
/// carries no fingerprint.
pub fn connection_fingerprint(local_sdp: &str, remote_sdp: &str) -> Option<String> {
    let mut lines: Vec<&str> = Vec::new();
    for sdp in [local_sdp, remote_sdp] {
        let before = lines.len();
        lines.extend(
            sdp.lines()
                .map(str::trim)
                .filter(|l| l.starts_with("a=fingerprint:")),
        );
        if lines.len() == before {
            return None;
        }
    }
    lines.sort_unstable();
    lines.dedup();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    Some(hex::encode(&digest[..FINGERPRINT_LEN]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::SdpKind;

    const SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\na=fingerprint:sha-256 AA:BB\r\n";

    #[test]
    fn test_plain_round_trip_preserves_type_and_payload() {
        let desc = SessionDescription::offer(SDP);
        let text = encode_description(&desc, false).unwrap();
        assert!(text.starts_with('{'));
        let back = decode_description(&text).unwrap();
        assert_eq!(back.kind(), SdpKind::Offer);
        assert_eq!(back.sdp(), SDP);
    }

    #[test]
    fn test_compact_round_trip() {
        let desc = SessionDescription::answer(SDP);
        let text = encode_description(&desc, true).unwrap();
        assert!(!text.contains('{'));
        assert_eq!(decode_description(&text).unwrap(), desc);
    }

    #[test]
    fn test_decode_tolerates_surrounding_whitespace() {
        let text = format!("\n  {}  \n", r#"{"type":"answer","sdp":"v=0"}"#);
        let desc = decode_description(&text).unwrap();
        assert_eq!(desc.kind(), SdpKind::Answer);
    }

    #[test]
    fn test_decode_malformed_inputs() {
        for input in ["", "   ", "{not json", "%%%%", r#"{"type":"rollback","sdp":""}"#] {
            let err = decode_description(input).unwrap_err();
            assert!(err.is_negotiation_error(), "input {input:?} gave {err}");
        }
    }

    #[test]
    fn test_decode_base64_that_is_not_gzip() {
        let text = general_purpose::STANDARD.encode(b"plain bytes");
        assert!(decode_description(&text).unwrap_err().is_negotiation_error());
    }

    #[test]
    fn test_fingerprint_is_symmetric() {
        let a = "v=0\r\na=fingerprint:sha-256 AA:AA\r\n";
        let b = "v=0\r\na=fingerprint:sha-256 BB:BB\r\n";
        let ab = connection_fingerprint(a, b).unwrap();
        assert_eq!(ab, connection_fingerprint(b, a).unwrap());
        assert_eq!(ab.len(), FINGERPRINT_LEN * 2);
        assert_ne!(ab, connection_fingerprint(a, a).unwrap());
    }

    #[test]
    fn test_fingerprint_requires_both_sides() {
        assert!(connection_fingerprint(SDP, "v=0\r\n").is_none());
    }
}

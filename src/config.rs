//! Session configuration.
//!
//! Every field has a default so a partial JSON file (or none at all) works.

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// Debug builds log verbosely; release builds keep webrtc internals quiet
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "ssc_call=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "ssc_call=info,webrtc=error";

pub const DEFAULT_CHANNEL_LABEL: &str = "ssc-signaling";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name sent in the `from` field of call envelopes
    pub local_name: String,

    /// STUN/TURN servers; empty means host candidates only
    pub ice_servers: Vec<ServerConfig>,

    /// Label of the control channel created by the offerer
    pub channel_label: String,

    /// Upper bound on the candidate gathering wait
    pub gathering_timeout_secs: u64,

    /// Gather loopback candidates (two peers on one host)
    pub include_loopback_candidates: bool,

    /// Emit descriptions as gzip+base64 instead of plain JSON
    pub compact_descriptions: bool,

    /// Where to cache metadata of the last connected session
    pub metadata_path: Option<PathBuf>,

    pub log_filter: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_name: "peer".into(),
            ice_servers: vec![
                ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302"),
                ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
            ],
            channel_label: DEFAULT_CHANNEL_LABEL.into(),
            gathering_timeout_secs: 10,
            include_loopback_candidates: false,
            compact_descriptions: false,
            metadata_path: None,
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl SessionConfig {
    /// Same-host setup: no ICE servers, loopback candidates on
    pub fn local() -> Self {
        Self {
            ice_servers: Vec::new(),
            include_loopback_candidates: true,
            gathering_timeout_secs: 5,
            ..Default::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_secs(self.gathering_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "ICE server '{}' has an empty URL",
                    server.id
                )));
            }
            if server.is_turn() && (server.username.is_none() || server.credential.is_none()) {
                return Err(Error::InvalidConfig(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }
        if self.gathering_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "gathering_timeout_secs must be positive".into(),
            ));
        }
        if self.channel_label.is_empty() {
            return Err(Error::InvalidConfig("channel_label must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.gathering_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_turn_without_credentials_rejected() {
        let mut config = SessionConfig::default();
        config.ice_servers.push(ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "turn.example.org:3478".into(),
            username: Some("u".into()),
            credential: None,
        });
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_url_and_zero_timeout_rejected() {
        let mut config = SessionConfig::default();
        config.ice_servers.push(ServerConfig::stun("bad", ""));
        assert!(config.validate().is_err());

        let config = SessionConfig {
            gathering_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"local_name": "alice", "compact_descriptions": true}}"#).unwrap();

        let config = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.local_name, "alice");
        assert!(config.compact_descriptions);
        assert_eq!(config.channel_label, DEFAULT_CHANNEL_LABEL);
        assert_eq!(config.ice_servers.len(), 2);
    }
}

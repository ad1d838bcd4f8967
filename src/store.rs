//! Best-effort cache of the last connected session.

use crate::error::Result;
use crate::peer::types::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub role: Role,
    pub local_name: String,
    pub fingerprint: Option<String>,
    pub connected_at: DateTime<Utc>,
}

pub trait MetadataStore: Send + Sync {
    /// `Ok(None)` when nothing was stored yet
    fn load(&self) -> Result<Option<SessionMetadata>>;
    fn save(&self, metadata: &SessionMetadata) -> Result<()>;
}

/// Keeps the metadata as one pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataStore for JsonFileStore {
    fn load(&self) -> Result<Option<SessionMetadata>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&self, metadata: &SessionMetadata) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionMetadata {
        SessionMetadata {
            session_id: "0011223344556677".into(),
            role: Role::Answerer,
            local_name: "bob".into(),
            fingerprint: Some("a1b2c3d4e5f6".into()),
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("last.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("last.json"));
        let meta = sample();
        store.save(&meta).unwrap();
        assert_eq!(store.load().unwrap(), Some(meta));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(JsonFileStore::new(path).load().is_err());
    }
}

//! Durable storage for the adopted identity.
//!
//! Implementations hold one opaque text record:
//! - `InMemoryIdentityStore` - For testing
//! - `FileIdentityStore` - JSON file on native platforms
//! - `LocalStorageStore` (in notes-wasm) - browser `localStorage`
//!
//! The record format lives here so every backend shares it.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::identity::Identity;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Current version of the persisted session record.
pub const SESSION_RECORD_VERSION: u32 = 1;

/// The single durable record: the current identity, or its absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub version: u32,
    pub identity: Option<Identity>,
}

impl PersistedSession {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            version: SESSION_RECORD_VERSION,
            identity,
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Decode a stored record. Unreadable or foreign-version records read as absent.
    pub fn decode(raw: &str) -> Option<Identity> {
        match serde_json::from_str::<PersistedSession>(raw) {
            Ok(record) if record.version == SESSION_RECORD_VERSION => record.identity,
            Ok(record) => {
                warn!(version = record.version, "Discarding session record with unknown version");
                None
            }
            Err(e) => {
                warn!("Discarding unreadable session record: {}", e);
                None
            }
        }
    }
}

/// Platform-independent key/value slot for the session record.
///
/// On native platforms, implementations must be `Send + Sync` for use across threads.
/// On WASM (wasm32), these bounds are relaxed since WASM is single-threaded.
#[cfg(not(target_arch = "wasm32"))]
pub trait IdentityStore: Send + Sync {
    /// Read the raw record, if one exists
    fn read(&self) -> Result<Option<String>>;

    /// Replace the raw record
    fn write(&self, record: &str) -> Result<()>;

    /// Remove the record (no-op if absent)
    fn erase(&self) -> Result<()>;
}

/// Platform-independent key/value slot for the session record (WASM version without Send + Sync).
#[cfg(target_arch = "wasm32")]
pub trait IdentityStore {
    /// Read the raw record, if one exists
    fn read(&self) -> Result<Option<String>>;

    /// Replace the raw record
    fn write(&self, record: &str) -> Result<()>;

    /// Remove the record (no-op if absent)
    fn erase(&self) -> Result<()>;
}

impl<T: IdentityStore + ?Sized> IdentityStore for std::sync::Arc<T> {
    fn read(&self) -> Result<Option<String>> {
        (**self).read()
    }

    fn write(&self, record: &str) -> Result<()> {
        (**self).write(record)
    }

    fn erase(&self) -> Result<()> {
        (**self).erase()
    }
}

/// In-memory store for testing
#[derive(Default)]
pub struct InMemoryIdentityStore {
    record: RwLock<Option<String>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a raw record already present (simulates a previous process).
    pub fn with_record(record: impl Into<String>) -> Self {
        Self {
            record: RwLock::new(Some(record.into())),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.record.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.raw())
    }

    fn write(&self, record: &str) -> Result<()> {
        *self.record.write().unwrap_or_else(|e| e.into_inner()) = Some(record.to_string());
        Ok(())
    }

    fn erase(&self) -> Result<()> {
        *self.record.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileIdentityStore;

#[cfg(not(target_arch = "wasm32"))]
mod file {
    use super::*;
    use std::path::{Path, PathBuf};

    /// Stores the session record as a JSON file.
    pub struct FileIdentityStore {
        path: PathBuf,
    }

    impl FileIdentityStore {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl IdentityStore for FileIdentityStore {
        fn read(&self) -> Result<Option<String>> {
            match std::fs::read_to_string(&self.path) {
                Ok(content) => Ok(Some(content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(StorageError::Io(format!("{}: {}", self.path.display(), e))),
            }
        }

        fn write(&self, record: &str) -> Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Io(format!("{}: {}", parent.display(), e)))?;
            }
            std::fs::write(&self.path, record)
                .map_err(|e| StorageError::Io(format!("{}: {}", self.path.display(), e)))
        }

        fn erase(&self) -> Result<()> {
            match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StorageError::Io(format!("{}: {}", self.path.display(), e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            user_id: "u1".into(),
            email: "a@b.com".into(),
            name: Some("Ada".into()),
        }
    }

    #[test]
    fn test_record_roundtrip_keeps_identity() {
        let raw = PersistedSession::new(Some(identity())).encode().unwrap();
        assert_eq!(PersistedSession::decode(&raw), Some(identity()));
    }

    #[test]
    fn test_foreign_records_read_as_absent() {
        assert_eq!(PersistedSession::decode("not json"), None);
        assert_eq!(
            PersistedSession::decode(r#"{"version":7,"identity":{"userId":"u1","email":"a@b.com"}}"#),
            None
        );
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_file_store_write_read_erase() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIdentityStore::new(dir.path().join("nested").join("session.json"));

        assert_eq!(store.read().unwrap(), None);
        store.write("{}").unwrap();
        assert_eq!(store.read().unwrap().as_deref(), Some("{}"));

        store.erase().unwrap();
        assert_eq!(store.read().unwrap(), None);
        // Erasing twice is fine
        store.erase().unwrap();
    }
}

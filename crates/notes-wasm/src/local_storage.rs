//! `localStorage` backend for the session record.
//!
//! The browser equivalent of `FileIdentityStore`: one string under one key.
//! Storage may be missing (private mode, sandboxed iframes) or throw on
//! access, which surfaces as `StorageError::Unavailable`.

use notes_core::storage::{IdentityStore, Result, StorageError};
use wasm_bindgen::JsValue;

/// Default key the session record lives under.
pub const DEFAULT_STORAGE_KEY: &str = "notes-client:session";

pub struct LocalStorageStore {
    key: String,
}

impl LocalStorageStore {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn storage(&self) -> Result<web_sys::Storage> {
        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("no window object".into()))?;
        window
            .local_storage()
            .map_err(js_unavailable)?
            .ok_or_else(|| StorageError::Unavailable("localStorage is disabled".into()))
    }
}

impl Default for LocalStorageStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_KEY)
    }
}

fn js_unavailable(err: JsValue) -> StorageError {
    StorageError::Unavailable(err.as_string().unwrap_or_else(|| format!("{:?}", err)))
}

fn js_io(err: JsValue) -> StorageError {
    StorageError::Io(err.as_string().unwrap_or_else(|| format!("{:?}", err)))
}

impl IdentityStore for LocalStorageStore {
    fn read(&self) -> Result<Option<String>> {
        self.storage()?.get_item(&self.key).map_err(js_io)
    }

    fn write(&self, record: &str) -> Result<()> {
        // Quota errors land here
        self.storage()?.set_item(&self.key, record).map_err(js_io)
    }

    fn erase(&self) -> Result<()> {
        self.storage()?.remove_item(&self.key).map_err(js_io)
    }
}

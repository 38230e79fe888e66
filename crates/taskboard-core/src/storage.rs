//! Key-value persistence adapter.
//!
//! [`LocalStore`] wraps a synchronous [`StorageBackend`] (browser
//! `localStorage`, a JSON file, or memory) and adds JSON helpers, bulk
//! clearing, size accounting and the availability/quota probes. Sizes follow
//! the browser convention of two bytes per UTF-16 code unit of key and value.

pub mod events;
pub mod file;
pub mod memory;

use std::rc::Rc;

use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

pub use events::{ListenerId, StorageEvent, StorageEventBus};
pub use file::FileBackend;
pub use memory::{MemoryArea, MemoryBackend};

pub const AVAILABILITY_PROBE_KEY: &str = "__storage_test__";
pub const QUOTA_PROBE_KEY: &str = "quota-test";
pub const QUOTA_PROBE_STEP: usize = 1024 * 1024;
pub const QUOTA_PROBE_MAX_STEPS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage quota exceeded writing '{key}' ({bytes} bytes)")]
    QuotaExceeded { key: String, bytes: usize },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("failed to encode value: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}

/// Synchronous key-value store as exposed by the host.
pub trait StorageBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    /// Snapshot of the keys present right now.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Bytes a browser charges for one entry.
pub fn entry_size(key: &str, value: &str) -> usize {
    (key.encode_utf16().count() + value.encode_utf16().count()) * 2
}

pub struct LocalStore {
    backend: Rc<dyn StorageBackend>,
    events: Rc<StorageEventBus>,
}

impl LocalStore {
    pub fn new(backend: Rc<dyn StorageBackend>) -> Self {
        Self::with_events(backend, Rc::new(StorageEventBus::new()))
    }

    pub fn with_events(backend: Rc<dyn StorageBackend>, events: Rc<StorageEventBus>) -> Self {
        Self { backend, events }
    }

    /// A private, unbounded memory area with a single context.
    pub fn in_memory() -> Self {
        MemoryArea::new().open_context()
    }

    /// Bus on which the host delivers changes made by other contexts.
    pub fn events(&self) -> &Rc<StorageEventBus> {
        &self.events
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.backend.get_item(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "storage read failed");
                None
            }
        }
    }

    /// `Ok(None)` when the key is absent, `Err` when it holds something that
    /// does not decode as `T`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.get(key)
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
    }

    #[tracing::instrument(skip(self, value), fields(len = value.len()))]
    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.backend.set_item(key, value)
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }

    pub fn remove(&self, key: &str) {
        if let Err(err) = self.backend.remove_item(key) {
            warn!(key, error = %err, "storage remove failed");
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.backend.keys().unwrap_or_else(|err| {
            warn!(error = %err, "storage key enumeration failed");
            Vec::new()
        })
    }

    /// Removes every key matching `pattern`; returns how many were removed.
    #[tracing::instrument(skip_all, fields(pattern = %pattern))]
    pub fn remove_matching(&self, pattern: &Regex) -> usize {
        let doomed: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|key| pattern.is_match(key))
            .collect();

        for key in &doomed {
            self.remove(key);
        }
        info!(removed = doomed.len(), "cleared matching storage keys");
        doomed.len()
    }

    pub fn estimate_total_size(&self) -> usize {
        self.keys()
            .iter()
            .filter_map(|key| self.get(key).map(|value| entry_size(key, &value)))
            .sum()
    }

    pub fn is_available(&self) -> bool {
        let ok = self
            .backend
            .set_item(AVAILABILITY_PROBE_KEY, AVAILABILITY_PROBE_KEY)
            .and_then(|()| self.backend.remove_item(AVAILABILITY_PROBE_KEY));
        if let Err(err) = ok {
            debug!(error = %err, "storage availability probe failed");
            return false;
        }
        true
    }

    /// Writes ever larger payloads (one [`QUOTA_PROBE_STEP`] of characters
    /// more each round) under [`QUOTA_PROBE_KEY`] until the backend refuses,
    /// and returns the size in bytes of the largest payload that was
    /// accepted. Gives up after [`QUOTA_PROBE_MAX_STEPS`] rounds on
    /// unbounded backends. The probe key is always removed.
    #[tracing::instrument(skip(self))]
    pub fn estimate_quota(&self) -> usize {
        let mut accepted = 0;
        let mut payload = String::new();

        for _ in 0..QUOTA_PROBE_MAX_STEPS {
            payload.push_str(&"x".repeat(QUOTA_PROBE_STEP));
            match self.backend.set_item(QUOTA_PROBE_KEY, &payload) {
                Ok(()) => accepted = entry_size(QUOTA_PROBE_KEY, &payload),
                Err(err) => {
                    debug!(error = %err, accepted, "quota probe stopped");
                    break;
                }
            }
        }

        self.remove(QUOTA_PROBE_KEY);
        info!(bytes = accepted, "estimated storage quota");
        accepted
    }
}

//! Single source of truth for a visitor's consent record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::db::DurableStorage;
use crate::errors::ConsentError;
use crate::models::{ConsentCategory, ConsentPreferences, ConsentUpdate};

/// Default bound on a single storage call.
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Consent-prompt lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentState {
    Uninitialized,
    NeedsConsent,
    Consented,
}

/// Result of a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub preferences: ConsentPreferences,
    /// False when the write failed and the record only lives in memory.
    pub persisted: bool,
}

/// Owns the read-modify-persist cycle and the version gate.
///
/// `save` is the only code path that writes the storage slot.
pub struct ConsentStore {
    storage: Arc<dyn DurableStorage>,
    key: String,
    version: String,
    timeout: Duration,
    current: ConsentPreferences,
    state: ConsentState,
    /// Highest timestamp known to be in the slot, stale records included.
    slot_timestamp: i64,
}

impl ConsentStore {
    pub fn new(storage: Arc<dyn DurableStorage>, key: &str, version: &str) -> Self {
        Self {
            storage,
            key: key.to_string(),
            version: version.to_string(),
            timeout: DEFAULT_STORAGE_TIMEOUT,
            current: ConsentPreferences::default_for(version),
            state: ConsentState::Uninitialized,
            slot_timestamp: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the stored record.
    ///
    /// Returns `None` when nothing valid is stored for the running policy
    /// version; the store then needs consent and holds the defaults. Never
    /// fails: storage and parse errors count as absent.
    pub async fn load(&mut self) -> Option<ConsentPreferences> {
        match self.read_slot().await {
            Ok(Some(record)) => {
                self.slot_timestamp = self.slot_timestamp.max(record.timestamp());
                if record.version() == self.version {
                    self.current = record.clone();
                    self.state = ConsentState::Consented;
                    return Some(record);
                }
                let mismatch = ConsentError::VersionMismatch {
                    stored: record.version().to_string(),
                    current: self.version.clone(),
                };
                tracing::info!("Asking for consent again: {}", mismatch);
            }
            Ok(None) => tracing::debug!("No consent record stored"),
            Err(e) => tracing::warn!("Ignoring stored consent: {}", e),
        }

        self.current = ConsentPreferences::default_for(&self.version);
        self.state = ConsentState::NeedsConsent;
        None
    }

    async fn read_slot(&self) -> Result<Option<ConsentPreferences>, ConsentError> {
        let raw = tokio::time::timeout(self.timeout, self.storage.get(&self.key))
            .await
            .map_err(|_| ConsentError::StorageUnavailable("read timed out".to_string()))??;

        raw.map(|raw| ConsentPreferences::from_json(&raw)).transpose()
    }

    /// Merge `update` onto the current record and persist it.
    ///
    /// A failed write keeps the new record in memory for the session.
    pub async fn save(&mut self, update: &ConsentUpdate) -> SaveOutcome {
        let timestamp = Utc::now()
            .timestamp_millis()
            .max(self.current.timestamp())
            .max(self.slot_timestamp);
        let record = self.current.merged(update, timestamp, &self.version);

        let persisted = match self.write_slot(&record).await {
            Ok(()) => {
                self.slot_timestamp = timestamp;
                true
            }
            Err(e) => {
                tracing::warn!("Consent kept in memory only: {}", e);
                false
            }
        };

        self.current = record.clone();
        self.state = ConsentState::Consented;

        SaveOutcome {
            preferences: record,
            persisted,
        }
    }

    async fn write_slot(&self, record: &ConsentPreferences) -> Result<(), ConsentError> {
        let raw = record.to_json()?;
        tokio::time::timeout(self.timeout, self.storage.set(&self.key, &raw))
            .await
            .map_err(|_| ConsentError::StorageUnavailable("write timed out".to_string()))?
    }

    pub async fn accept_all(&mut self) -> SaveOutcome {
        self.save(&ConsentUpdate::all(true)).await
    }

    pub async fn reject_all(&mut self) -> SaveOutcome {
        self.save(&ConsentUpdate::all(false)).await
    }

    #[allow(dead_code)]
    pub fn is_allowed(&self, category: ConsentCategory) -> bool {
        self.current.is_allowed(category)
    }

    pub fn needs_consent(&self) -> bool {
        self.state == ConsentState::NeedsConsent
    }

    pub fn state(&self) -> ConsentState {
        self.state
    }

    pub fn preferences(&self) -> &ConsentPreferences {
        &self.current
    }
}

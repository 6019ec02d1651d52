//! In-memory consent storage.
//!
//! Non-persistent: everything is lost when the process exits. Used when the
//! server runs without a database and as the storage double in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::DurableStorage;
use crate::errors::ConsentError;

#[derive(Default)]
struct Shared {
    slots: RwLock<HashMap<(String, String), String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

/// Shared in-memory slots; `scoped` hands out one visitor's view.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
    scope: String,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle onto the same slots, restricted to `scope`.
    pub fn scoped(&self, scope: &str) -> Self {
        Self {
            shared: self.shared.clone(),
            scope: scope.to_string(),
        }
    }

    /// Make every read fail, as a disabled storage API would.
    #[cfg(test)]
    pub fn fail_reads(&self, fail: bool) {
        self.shared.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail, as an exceeded quota would.
    #[cfg(test)]
    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DurableStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, ConsentError> {
        if self.shared.fail_reads.load(Ordering::SeqCst) {
            return Err(ConsentError::StorageUnavailable(
                "storage reads disabled".to_string(),
            ));
        }

        let slots = self
            .shared
            .slots
            .read()
            .map_err(|_| ConsentError::StorageUnavailable("storage lock poisoned".to_string()))?;
        Ok(slots.get(&(self.scope.clone(), key.to_string())).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConsentError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(ConsentError::StorageUnavailable(
                "storage quota exceeded".to_string(),
            ));
        }

        let mut slots = self
            .shared
            .slots
            .write()
            .map_err(|_| ConsentError::StorageUnavailable("storage lock poisoned".to_string()))?;
        slots.insert((self.scope.clone(), key.to_string()), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scoped_handles_share_slots_per_scope() {
        let root = MemoryStorage::new();
        let a = root.scoped("a");
        let a_again = root.scoped("a");
        let b = root.scoped("b");

        a.set("slot", "value").await.unwrap();

        assert_eq!(a_again.get("slot").await.unwrap().as_deref(), Some("value"));
        assert_eq!(b.get("slot").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let storage = MemoryStorage::new().scoped("a");
        storage.fail_writes(true);
        assert!(storage.set("slot", "value").await.is_err());

        storage.fail_writes(false);
        storage.set("slot", "value").await.unwrap();

        storage.fail_reads(true);
        assert!(matches!(
            storage.get("slot").await,
            Err(ConsentError::StorageUnavailable(_))
        ));
    }
}

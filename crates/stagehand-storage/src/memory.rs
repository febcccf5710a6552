//! In-memory state store
//!
//! For tests, demos, and single-process deployments that accept losing
//! state on restart.

use crate::store::StateStore;
use async_trait::async_trait;
use bytes::Bytes;
use stagehand_core::constants::ACTOR_STATE_SIZE_BYTES_MAX;
use stagehand_core::{ActorId, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

/// In-memory state store
///
/// Cloning shares the underlying map, so a clone handed to a second runtime
/// observes everything the first one persisted.
#[derive(Clone, Default)]
pub struct MemoryStore {
    /// storage_key -> snapshot
    data: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    #[instrument(skip(self), fields(actor_id = %actor_id), level = "trace")]
    async fn load(&self, actor_id: &ActorId) -> Result<Option<Bytes>> {
        let data = self.data.read().await;
        Ok(data.get(&actor_id.storage_key()).cloned())
    }

    #[instrument(skip(self, state), fields(actor_id = %actor_id, state_len = state.len()), level = "trace")]
    async fn save(&self, actor_id: &ActorId, state: Bytes) -> Result<()> {
        if state.len() > ACTOR_STATE_SIZE_BYTES_MAX {
            return Err(Error::storage_write_failed(
                actor_id.storage_key(),
                format!(
                    "snapshot of {} bytes exceeds limit {}",
                    state.len(),
                    ACTOR_STATE_SIZE_BYTES_MAX
                ),
            ));
        }

        let mut data = self.data.write().await;
        data.insert(actor_id.storage_key(), state);
        Ok(())
    }

    #[instrument(skip(self), fields(actor_id = %actor_id), level = "trace")]
    async fn delete(&self, actor_id: &ActorId) -> Result<()> {
        let mut data = self.data.write().await;
        data.remove(&actor_id.storage_key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::ActorKey;

    fn actor(name: &str) -> ActorId {
        ActorId::new("counter", ActorKey::new([name]).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let id = actor("a");

        assert!(store.load(&id).await.unwrap().is_none());

        store.save(&id, Bytes::from_static(b"{\"count\":1}")).await.unwrap();
        assert_eq!(
            store.load(&id).await.unwrap(),
            Some(Bytes::from_static(b"{\"count\":1}"))
        );
        assert!(store.exists(&id).await.unwrap());

        store.delete(&id).await.unwrap();
        assert!(!store.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_isolation() {
        let store = MemoryStore::new();
        let a = actor("a");
        let b = actor("b");

        store.save(&a, Bytes::from_static(b"1")).await.unwrap();
        store.save(&b, Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(store.load(&a).await.unwrap(), Some(Bytes::from_static(b"1")));
        assert_eq!(store.load(&b).await.unwrap(), Some(Bytes::from_static(b"2")));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_memory_store_clone_shares_data() {
        let store = MemoryStore::new();
        let clone = store.clone();
        let id = actor("shared");

        store.save(&id, Bytes::from_static(b"x")).await.unwrap();
        assert!(clone.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_rejects_oversized_snapshot() {
        let store = MemoryStore::new();
        let id = actor("big");
        let huge = Bytes::from(vec![0u8; ACTOR_STATE_SIZE_BYTES_MAX + 1]);

        let result = store.save(&id, huge).await;
        assert!(matches!(result, Err(Error::StorageWriteFailed { .. })));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = MemoryStore::new();
        assert!(store.delete(&actor("ghost")).await.is_ok());
    }
}

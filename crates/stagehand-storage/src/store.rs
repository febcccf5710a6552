//! State store trait
//!
//! TigerStyle: Explicit operations, bounded sizes.

use async_trait::async_trait;
use bytes::Bytes;
use stagehand_core::{ActorId, Result};

/// Durable snapshot storage, one opaque blob per actor instance
///
/// Implementations key blobs by [`ActorId::storage_key`]. The runtime
/// serializes access per instance, so a store never sees concurrent writes
/// for the same id.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the latest snapshot, or `None` if the actor was never saved
    async fn load(&self, actor_id: &ActorId) -> Result<Option<Bytes>>;

    /// Replace the snapshot
    ///
    /// # Errors
    /// Returns `StorageWriteFailed` when the write cannot be made durable.
    async fn save(&self, actor_id: &ActorId, state: Bytes) -> Result<()>;

    /// Remove the snapshot; deleting a missing snapshot is not an error
    async fn delete(&self, actor_id: &ActorId) -> Result<()>;

    /// Check if a snapshot exists
    async fn exists(&self, actor_id: &ActorId) -> Result<bool> {
        Ok(self.load(actor_id).await?.is_some())
    }
}

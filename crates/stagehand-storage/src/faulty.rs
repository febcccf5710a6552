//! Fault-injecting store wrapper
//!
//! TigerStyle: Deterministic fault injection, explicit counters.
//!
//! Wraps any [`StateStore`] and fails a scheduled number of loads or saves.
//! Faults are counted down, not sampled, so tests that use it are
//! reproducible without a seeded RNG.

use crate::store::StateStore;
use async_trait::async_trait;
use bytes::Bytes;
use stagehand_core::{ActorId, Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Store wrapper that fails scheduled operations
pub struct FaultyStore {
    inner: Arc<dyn StateStore>,
    /// Remaining load failures
    load_faults: AtomicU64,
    /// Remaining save failures
    save_faults: AtomicU64,
    /// Fail every save while set
    saves_down: AtomicBool,
    /// Successful and failed calls, for assertions
    load_calls: AtomicU64,
    save_calls: AtomicU64,
}

impl FaultyStore {
    /// Wrap a store with no faults scheduled
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            load_faults: AtomicU64::new(0),
            save_faults: AtomicU64::new(0),
            saves_down: AtomicBool::new(false),
            load_calls: AtomicU64::new(0),
            save_calls: AtomicU64::new(0),
        }
    }

    /// Fail the next `count` loads
    pub fn fail_next_loads(&self, count: u64) {
        self.load_faults.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` saves
    pub fn fail_next_saves(&self, count: u64) {
        self.save_faults.store(count, Ordering::SeqCst);
    }

    /// Fail every save until called again with `false`
    pub fn set_saves_down(&self, down: bool) {
        self.saves_down.store(down, Ordering::SeqCst);
    }

    /// Total `load` calls observed
    pub fn load_calls(&self) -> u64 {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Total `save` calls observed
    pub fn save_calls(&self) -> u64 {
        self.save_calls.load(Ordering::SeqCst)
    }

    fn take_fault(counter: &AtomicU64) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StateStore for FaultyStore {
    async fn load(&self, actor_id: &ActorId) -> Result<Option<Bytes>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_fault(&self.load_faults) {
            return Err(Error::storage_read_failed(
                actor_id.storage_key(),
                "injected read fault",
            ));
        }
        self.inner.load(actor_id).await
    }

    async fn save(&self, actor_id: &ActorId, state: Bytes) -> Result<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.saves_down.load(Ordering::SeqCst) || Self::take_fault(&self.save_faults) {
            return Err(Error::storage_write_failed(
                actor_id.storage_key(),
                "injected write fault",
            ));
        }
        self.inner.save(actor_id, state).await
    }

    async fn delete(&self, actor_id: &ActorId) -> Result<()> {
        self.inner.delete(actor_id).await
    }
}

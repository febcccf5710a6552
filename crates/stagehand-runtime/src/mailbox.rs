//! Actor mailbox implementation
//!
//! TigerStyle: Bounded queues with explicit limits, no silent drops.
//!
//! Each live instance owns one [`Mailbox`]. Producers push envelopes through
//! a gate; the instance task closes the gate before it stops, after which
//! producers get their envelope back and wait for the instance to finish.

use crate::connection::ConnectionId;
use parking_lot::Mutex;
use serde_json::Value;
use stagehand_core::constants::CALL_CHAIN_DEPTH_MAX;
use stagehand_core::{ActionError, ActorId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Reply channel for one call
pub type ReplyTx = oneshot::Sender<Result<Value, ActionError>>;

// =============================================================================
// CallChain
// =============================================================================

/// The instances a call is transitively waiting on, outermost first
///
/// A call whose target is already on its chain would wait on itself.
#[derive(Debug, Clone)]
pub struct CallChain(Arc<[ActorId]>);

impl CallChain {
    /// The chain of a call made from outside any actor
    pub fn root() -> Self {
        Self(Arc::from(Vec::new()))
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.0.iter().any(|entry| entry == id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Chain seen by the handler of a call into `id`
    pub fn extend(&self, id: &ActorId) -> Self {
        debug_assert!(self.len() < CALL_CHAIN_DEPTH_MAX);
        let mut entries: Vec<ActorId> = self.0.to_vec();
        entries.push(id.clone());
        Self(entries.into())
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// A queued action call
#[derive(Debug)]
pub struct Envelope {
    /// The action name
    pub action: String,
    /// Decoded by the action's handler
    pub args: Value,
    /// Connection that issued the call, if any
    pub requester: Option<ConnectionId>,
    /// Chain including the target instance
    pub call_chain: CallChain,
    /// Channel to send the response
    pub reply_tx: ReplyTx,
    /// When the message was enqueued
    pub enqueued_at: Instant,
}

impl Envelope {
    pub fn new(
        action: String,
        args: Value,
        requester: Option<ConnectionId>,
        call_chain: CallChain,
        reply_tx: ReplyTx,
    ) -> Self {
        debug_assert!(!action.is_empty(), "action must not be empty");

        Self {
            action,
            args,
            requester,
            call_chain,
            reply_tx,
            enqueued_at: Instant::now(),
        }
    }

    /// Time this message has been waiting
    pub fn wait_time(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

// =============================================================================
// Mailbox
// =============================================================================

/// Why a push was refused
#[derive(Debug)]
pub enum PushError {
    /// The instance is stopping; the envelope is handed back
    Closed(Envelope),
    /// No silent drops: the caller is told the mailbox is full
    Full { depth: usize, limit: usize },
}

#[derive(Debug)]
struct Gate {
    open: bool,
    /// Envelopes pushed and not yet completed
    pending: usize,
}

/// Bounded mailbox for one actor instance
///
/// # TigerStyle
/// - Explicit capacity limit
/// - FIFO ordering
/// - No silent drops (returns error when full)
#[derive(Debug)]
pub struct Mailbox {
    tx: mpsc::Sender<Envelope>,
    gate: Mutex<Gate>,
    capacity: usize,
    /// Total messages enqueued (for metrics)
    enqueued_count: AtomicU64,
    /// Total messages completed (for metrics)
    processed_count: AtomicU64,
}

impl Mailbox {
    /// Create a mailbox and the receiver its instance task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        assert!(capacity > 0, "capacity must be positive");

        let (tx, rx) = mpsc::channel(capacity);
        let mailbox = Self {
            tx,
            gate: Mutex::new(Gate {
                open: true,
                pending: 0,
            }),
            capacity,
            enqueued_count: AtomicU64::new(0),
            processed_count: AtomicU64::new(0),
        };
        (mailbox, rx)
    }

    /// Try to enqueue a message
    ///
    /// The gate check and the enqueue happen under one lock, so every
    /// envelope accepted before [`Mailbox::close`] is visible to the
    /// receiver afterwards.
    pub fn push(&self, envelope: Envelope) -> Result<(), PushError> {
        let mut gate = self.gate.lock();
        if !gate.open {
            return Err(PushError::Closed(envelope));
        }

        match self.tx.try_send(envelope) {
            Ok(()) => {
                gate.pending += 1;
                self.enqueued_count.fetch_add(1, Ordering::Relaxed);
                debug_assert!(gate.pending <= self.capacity + 1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(PushError::Full {
                depth: gate.pending,
                limit: self.capacity,
            }),
            // Receiver gone means the task already stopped
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                gate.open = false;
                Err(PushError::Closed(envelope))
            }
        }
    }

    /// Mark one pushed envelope as fully handled
    pub fn complete(&self) {
        let mut gate = self.gate.lock();
        debug_assert!(gate.pending > 0, "complete without push");
        gate.pending = gate.pending.saturating_sub(1);
        self.processed_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Run `f` only while the gate is open, holding it open for the duration
    pub fn if_open<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let gate = self.gate.lock();
        gate.open.then(f)
    }

    /// Close the gate if `should_close` accepts the pending count
    pub fn close_if(&self, should_close: impl FnOnce(usize) -> bool) -> bool {
        let mut gate = self.gate.lock();
        if gate.open && should_close(gate.pending) {
            gate.open = false;
            return true;
        }
        false
    }

    /// Close the gate unconditionally
    pub fn close(&self) {
        self.gate.lock().open = false;
    }

    pub fn is_open(&self) -> bool {
        self.gate.lock().open
    }

    /// Envelopes accepted and not yet completed
    pub fn pending(&self) -> usize {
        self.gate.lock().pending
    }

    /// Get the mailbox capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get total messages enqueued
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued_count.load(Ordering::Relaxed)
    }

    /// Get total messages completed
    pub fn processed_count(&self) -> u64 {
        self.processed_count.load(Ordering::Relaxed)
    }
}

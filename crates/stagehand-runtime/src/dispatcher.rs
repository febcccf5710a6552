//! Message dispatcher and instance manager
//!
//! TigerStyle: Single activation per ActorId, explicit message routing.
//!
//! The dispatcher owns the live-instance map. Resolving an id either joins
//! the hydration already in flight for it or starts one; hydration runs on
//! its own task so that a caller giving up cannot leave the slot half-built.
//! Calls are validated here (actor type, action name, call chain) before
//! anything is enqueued.

use crate::activation::LiveInstance;
use crate::connection::{ActorConnection, ConnectionId};
use crate::mailbox::{CallChain, Envelope, PushError};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use stagehand_core::constants::{CALL_CHAIN_DEPTH_MAX, DIAGNOSTICS_CHANNEL_CAPACITY_COUNT};
use stagehand_core::{ActionError, ActorId, Error, Result, StagehandConfig};
use stagehand_storage::StateStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

// ============================================================================
// Actor Factory
// ============================================================================

/// Type-erased actor type, one per registered definition
#[async_trait]
pub(crate) trait ActorFactory: Send + Sync + 'static {
    /// The actor type name
    fn actor_type(&self) -> &str;

    /// Whether the action table has `action`
    fn has_action(&self, action: &str) -> bool;

    /// Check names and limits before the runtime starts
    fn validate(&self) -> Result<()>;

    /// Hydrate `instance` and spawn the task that drains `mailbox`
    ///
    /// On error nothing is spawned and the instance must not be used.
    async fn activate(
        self: Arc<Self>,
        instance: Arc<LiveInstance>,
        mailbox: mpsc::Receiver<Envelope>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<()>;
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Full detail of a failure the caller only saw redacted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Instance the failure happened on
    pub actor_id: String,
    /// Action, or the lifecycle step, that failed
    pub action: String,
    /// Code the caller observed
    pub code: String,
    /// Unredacted error text
    pub detail: String,
}

// ============================================================================
// Dispatcher
// ============================================================================

type Hydration = Shared<BoxFuture<'static, std::result::Result<Arc<LiveInstance>, String>>>;

/// One entry of the live-instance map
struct InstanceSlot {
    generation: u64,
    ready: Hydration,
}

/// Routes calls to live instances, creating them on demand
pub struct Dispatcher {
    factories: HashMap<String, Arc<dyn ActorFactory>>,
    store: Arc<dyn StateStore>,
    config: StagehandConfig,
    slots: Mutex<HashMap<ActorId, Arc<InstanceSlot>>>,
    next_generation: AtomicU64,
    next_connection_id: AtomicU64,
    diagnostics: broadcast::Sender<Diagnostic>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        factories: HashMap<String, Arc<dyn ActorFactory>>,
        store: Arc<dyn StateStore>,
        config: StagehandConfig,
    ) -> Self {
        let (diagnostics, _) = broadcast::channel(DIAGNOSTICS_CHANNEL_CAPACITY_COUNT);

        Self {
            factories,
            store,
            config,
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            next_connection_id: AtomicU64::new(0),
            diagnostics,
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub(crate) fn config(&self) -> &StagehandConfig {
        &self.config
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn factory(&self, actor_type: &str) -> Result<&Arc<dyn ActorFactory>> {
        self.factories
            .get(actor_type)
            .ok_or_else(|| Error::UnknownActorType {
                actor_type: actor_type.to_string(),
            })
    }

    /// Get the live instance for `id`, hydrating it if needed
    ///
    /// Concurrent resolves of one id share a single hydration.
    pub(crate) async fn resolve(self: &Arc<Self>, id: &ActorId) -> Result<Arc<LiveInstance>> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let slot = self.slot(id)?;
        match slot.ready.clone().await {
            Ok(instance) => Ok(instance),
            Err(_) if self.is_shutting_down() => Err(Error::ShuttingDown),
            Err(reason) => Err(Error::instance_creation_failed(id.to_string(), reason)),
        }
    }

    /// Find the slot for `id` or create one and start hydrating it
    fn slot(self: &Arc<Self>, id: &ActorId) -> Result<Arc<InstanceSlot>> {
        let factory = self.factory(id.actor_type())?.clone();

        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(id) {
            return Ok(slot.clone());
        }
        // Checked under the lock so shutdown never misses a new slot
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let max = self.config.actor.max_actors_count;
        if slots.len() >= max {
            return Err(Error::ActorCapacityExceeded { max });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let hydration = tokio::spawn(self.clone().hydrate(id.clone(), generation, factory));
        let ready = async move {
            hydration
                .await
                .map_err(|e| format!("hydration task failed: {}", e))?
        }
        .boxed()
        .shared();

        let slot = Arc::new(InstanceSlot { generation, ready });
        slots.insert(id.clone(), slot.clone());
        debug_assert!(slots.len() <= max);
        Ok(slot)
    }

    #[instrument(skip_all, fields(actor_id = %id, generation), level = "debug")]
    async fn hydrate(
        self: Arc<Self>,
        id: ActorId,
        generation: u64,
        factory: Arc<dyn ActorFactory>,
    ) -> std::result::Result<Arc<LiveInstance>, String> {
        let (instance, mailbox) = LiveInstance::new(id.clone(), generation, &self.config);
        let instance = Arc::new(instance);

        match factory.activate(instance.clone(), mailbox, self.clone()).await {
            Ok(()) => Ok(instance),
            Err(e) => {
                warn!(actor_id = %id, error = %e, "Actor hydration failed");
                self.remove_slot(&id, generation);
                Err(match e {
                    Error::InstanceCreationFailed { reason, .. } => reason,
                    other => other.to_string(),
                })
            }
        }
    }

    /// Drop the map entry for `id` if it still belongs to `generation`
    pub(crate) fn remove_slot(&self, id: &ActorId, generation: u64) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(id) {
            Some(slot) if slot.generation == generation => {
                slots.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Enqueue a call on the target instance and wait for its outcome
    ///
    /// Errors raised by the target arrive as [`Error::Remote`], already
    /// redacted.
    pub(crate) async fn invoke(
        self: &Arc<Self>,
        id: &ActorId,
        action: &str,
        args: Value,
        requester: Option<ConnectionId>,
        chain: &CallChain,
    ) -> Result<Value> {
        let factory = self.factory(id.actor_type())?;
        if !factory.has_action(action) {
            return Err(Error::UnknownAction {
                actor_type: id.actor_type().to_string(),
                action: action.to_string(),
            });
        }

        if chain.contains(id) {
            return Err(Error::ReentrantCall {
                id: id.to_string(),
                action: action.to_string(),
            });
        }
        if chain.len() >= CALL_CHAIN_DEPTH_MAX {
            return Err(Error::internal(format!(
                "call chain depth {} reached limit {}",
                chain.len(),
                CALL_CHAIN_DEPTH_MAX
            )));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let mut envelope = Envelope::new(
            action.to_string(),
            args,
            requester,
            chain.extend(id),
            reply_tx,
        );

        loop {
            let instance = self.resolve(id).await?;
            match instance.mailbox().push(envelope) {
                Ok(()) => break,
                Err(PushError::Closed(returned)) => {
                    // Instance is stopping; retry against its successor
                    debug!(actor_id = %id, action, "Instance stopping, waiting to re-resolve");
                    envelope = returned;
                    instance.stopped().await;
                }
                Err(PushError::Full { depth, limit }) => {
                    return Err(Error::MailboxFull {
                        id: id.to_string(),
                        depth,
                        max: limit,
                    });
                }
            }
        }

        match reply_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(remote)) => Err(Error::Remote(remote)),
            Err(_) => Err(Error::ShuttingDown),
        }
    }

    /// Subscribe a new connection to the instance for `id`
    pub(crate) async fn connect(self: &Arc<Self>, id: &ActorId) -> Result<ActorConnection> {
        loop {
            let instance = self.resolve(id).await?;
            let connection_id =
                ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1);

            match instance.connect(connection_id) {
                Some(Ok(events)) => {
                    return Ok(ActorConnection::open(
                        connection_id,
                        instance,
                        self.clone(),
                        events,
                    ))
                }
                Some(Err(e)) => return Err(e),
                None => instance.stopped().await,
            }
        }
    }

    /// Log and publish a failure whose caller sees it redacted
    pub(crate) fn report(&self, actor_id: &ActorId, action: &str, err: &Error) {
        if !err.is_redacted() {
            return;
        }

        let code = err.code().unwrap_or_default().to_string();
        error!(actor_id = %actor_id, action, code = %code, error = %err, "Action failed");

        // No subscribers is fine
        let _ = self.diagnostics.send(Diagnostic {
            actor_id: actor_id.to_string(),
            action: action.to_string(),
            code,
            detail: err.to_string(),
        });
    }

    /// Convert an error for a caller, reporting it first if it is redacted
    pub(crate) fn caller_error(&self, actor_id: &ActorId, action: &str, err: Error) -> ActionError {
        self.report(actor_id, action, &err);
        err.into_action_error()
    }

    pub(crate) fn subscribe_diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    /// Number of instances live or hydrating
    pub(crate) fn live_count(&self) -> usize {
        self.slots.lock().len()
    }

    pub(crate) fn is_live(&self, id: &ActorId) -> bool {
        self.slots.lock().contains_key(id)
    }

    /// Stop accepting work, then wait for every instance to flush and stop
    pub(crate) async fn shutdown(&self) {
        self.shutdown.cancel();

        loop {
            let slots: Vec<(ActorId, Arc<InstanceSlot>)> = self
                .slots
                .lock()
                .iter()
                .map(|(id, slot)| (id.clone(), slot.clone()))
                .collect();
            if slots.is_empty() {
                break;
            }

            for (id, slot) in slots {
                if let Ok(instance) = slot.ready.clone().await {
                    instance.stopped().await;
                }
                self.remove_slot(&id, slot.generation);
            }
        }
    }
}

//! Actor activation and lifecycle management
//!
//! TigerStyle: Explicit lifecycle states, single activation guarantee.
//!
//! Each live instance is a [`LiveInstance`] shared with callers plus one
//! task that owns the state and drains the mailbox. The task:
//! - hydrates state from the store and runs `on_start`
//! - runs one action at a time and persists state after every one
//! - closes its gate once idle with no connections and no pending calls
//! - on stop runs `on_stop`, flushes, and leaves the live-instance map
//!
//! ```text
//!   Inactive -> Activating -> Active -> Deactivating -> Inactive
//!                   |                                     ^
//!                   +------------(on_start fails)---------+
//! ```

use crate::connection::{ConnectionId, ConnectionRegistry, Event};
use crate::definition::{ActionContext, ActorDefinition, ActorState, HookFn};
use crate::dispatcher::{ActorFactory, Dispatcher};
use crate::handle::Client;
use crate::mailbox::{CallChain, Envelope, Mailbox};
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use stagehand_core::constants::ACTOR_STATE_SIZE_BYTES_MAX;
use stagehand_core::{metrics, ActorId, Error, Result, StagehandConfig};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Actor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationState {
    /// Not running (initial state, or after stop)
    #[default]
    Inactive,
    /// Loading state and running on_start
    Activating,
    /// Accepting calls
    Active,
    /// Running on_stop and flushing state
    Deactivating,
}

impl ActivationState {
    /// Check if actor can run calls
    pub fn can_invoke(&self) -> bool {
        matches!(self, ActivationState::Active)
    }

    /// Check if valid transition per the lifecycle state machine
    pub fn can_transition_to(&self, next: ActivationState) -> bool {
        match (self, next) {
            (ActivationState::Inactive, ActivationState::Activating) => true,
            (ActivationState::Activating, ActivationState::Active) => true,
            (ActivationState::Activating, ActivationState::Inactive) => true,
            (ActivationState::Active, ActivationState::Deactivating) => true,
            (ActivationState::Deactivating, ActivationState::Inactive) => true,
            _ if *self == next => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationState::Inactive => write!(f, "inactive"),
            ActivationState::Activating => write!(f, "activating"),
            ActivationState::Active => write!(f, "active"),
            ActivationState::Deactivating => write!(f, "deactivating"),
        }
    }
}

/// Statistics for an active actor
#[derive(Debug, Clone)]
pub struct ActivationStats {
    /// When the actor was activated
    pub activated_at: Instant,
    /// Total calls processed
    pub invocation_count: u64,
    /// Calls that ended in any error
    pub error_count: u64,
    /// Total time spent in handlers and persistence
    pub total_processing_time: Duration,
}

impl ActivationStats {
    pub fn new() -> Self {
        Self {
            activated_at: Instant::now(),
            invocation_count: 0,
            error_count: 0,
            total_processing_time: Duration::ZERO,
        }
    }

    pub fn record_invocation(&mut self, duration: Duration, is_error: bool) {
        self.invocation_count = self.invocation_count.wrapping_add(1);
        self.total_processing_time = self.total_processing_time.saturating_add(duration);
        if is_error {
            self.error_count = self.error_count.wrapping_add(1);
        }
    }

    /// Get average processing time per call
    pub fn average_processing_time(&self) -> Duration {
        if self.invocation_count == 0 {
            Duration::ZERO
        } else {
            let count = u32::try_from(self.invocation_count).unwrap_or(u32::MAX);
            self.total_processing_time / count
        }
    }
}

impl Default for ActivationStats {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// LiveInstance
// =============================================================================

/// Outcome of an idle check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdleCheck {
    /// Gate closed; the instance must stop
    Closed,
    /// Check again at this instant
    NotBefore(Instant),
}

/// The part of a live instance shared with callers and connections
pub struct LiveInstance {
    id: ActorId,
    /// Distinguishes this incarnation from earlier ones with the same id
    generation: u64,
    mailbox: Mailbox,
    connections: Arc<ConnectionRegistry>,
    last_active: Mutex<Instant>,
    stopped: CancellationToken,
}

impl LiveInstance {
    pub(crate) fn new(
        id: ActorId,
        generation: u64,
        config: &StagehandConfig,
    ) -> (Self, mpsc::Receiver<Envelope>) {
        let (mailbox, rx) = Mailbox::channel(config.actor.mailbox_depth_max);
        let connections = Arc::new(ConnectionRegistry::new(
            id.clone(),
            config.connection.max_connections_per_actor,
            config.connection.event_buffer_count,
        ));

        let instance = Self {
            id,
            generation,
            mailbox,
            connections,
            last_active: Mutex::new(Instant::now()),
            stopped: CancellationToken::new(),
        };
        (instance, rx)
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub(crate) fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Subscribe a connection unless the instance is stopping
    pub(crate) fn connect(&self, id: ConnectionId) -> Option<Result<mpsc::Receiver<Event>>> {
        self.mailbox.if_open(|| self.connections.subscribe(id))
    }

    /// Unsubscribe a connection; disconnecting counts as activity
    pub(crate) fn disconnect(&self, id: ConnectionId) {
        self.touch();
        self.connections.unsubscribe(id);
    }

    pub(crate) fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub(crate) fn idle_deadline(&self, idle_timeout: Duration) -> Instant {
        *self.last_active.lock() + idle_timeout
    }

    /// Close the gate if the instance has been idle for `idle_timeout` with
    /// no connections and no pending calls
    pub(crate) fn try_close_idle(&self, idle_timeout: Duration) -> IdleCheck {
        let now = Instant::now();
        let idle_at = self.idle_deadline(idle_timeout);
        if now < idle_at {
            return IdleCheck::NotBefore(idle_at);
        }

        let closed = self
            .mailbox
            .close_if(|pending| pending == 0 && self.connections.is_empty());
        if closed {
            IdleCheck::Closed
        } else {
            IdleCheck::NotBefore(now + idle_timeout)
        }
    }

    /// Wait until the instance has flushed and left the live-instance map
    pub(crate) async fn stopped(&self) {
        self.stopped.cancelled().await
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }
}

// =============================================================================
// Activation
// =============================================================================

#[async_trait]
impl<S: ActorState> ActorFactory for ActorDefinition<S> {
    fn actor_type(&self) -> &str {
        self.name()
    }

    fn has_action(&self, action: &str) -> bool {
        ActorDefinition::has_action(self, action)
    }

    fn validate(&self) -> Result<()> {
        ActorDefinition::validate(self)
    }

    async fn activate(
        self: Arc<Self>,
        instance: Arc<LiveInstance>,
        mailbox: mpsc::Receiver<Envelope>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<()> {
        let task = InstanceTask::hydrate(self, instance, mailbox, dispatcher).await?;
        tokio::spawn(task.run());
        Ok(())
    }
}

/// Why an instance stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Idle,
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Idle => write!(f, "idle"),
            StopReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The task that owns one instance's state
struct InstanceTask<S: ActorState> {
    definition: Arc<ActorDefinition<S>>,
    instance: Arc<LiveInstance>,
    dispatcher: Arc<Dispatcher>,
    mailbox: mpsc::Receiver<Envelope>,
    ctx: ActionContext<S>,
    /// Last encoding read from or written to the store
    persisted: Option<Bytes>,
    state: ActivationState,
    stats: ActivationStats,
}

impl<S: ActorState> InstanceTask<S> {
    /// Load state and run `on_start`
    ///
    /// Every failure is reported as `InstanceCreationFailed`.
    #[instrument(skip_all, fields(actor_id = %instance.id()), level = "info")]
    async fn hydrate(
        definition: Arc<ActorDefinition<S>>,
        instance: Arc<LiveInstance>,
        mailbox: mpsc::Receiver<Envelope>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        let id = instance.id().clone();
        debug!(actor_id = %id, "Activating actor");

        let started = Instant::now();
        let loaded = dispatcher.store().load(&id).await;
        metrics::record_storage_operation(
            "load",
            metrics::status_label(&loaded),
            started.elapsed().as_secs_f64(),
        );
        let snapshot =
            loaded.map_err(|e| Error::instance_creation_failed(id.to_string(), e.to_string()))?;

        let state = match &snapshot {
            Some(bytes) => serde_json::from_slice::<S>(bytes).map_err(|e| {
                Error::instance_creation_failed(id.to_string(), format!("corrupt snapshot: {}", e))
            })?,
            None => {
                debug!(actor_id = %id, "No existing state, using initial state");
                definition.initial_state()
            }
        };

        let ctx = ActionContext::new(
            id.clone(),
            state,
            instance.connections().clone(),
            Client::new(dispatcher.clone(), CallChain::root().extend(&id)),
        );

        let mut task = Self {
            definition,
            instance,
            dispatcher,
            mailbox,
            ctx,
            persisted: snapshot,
            state: ActivationState::Inactive,
            stats: ActivationStats::new(),
        };
        task.transition(ActivationState::Activating);

        if let Some(hook) = task.definition.on_start_hook().cloned() {
            if let Err(e) = task.run_hook(&hook, "on_start").await {
                error!(actor_id = %id, error = %e, "on_start failed");
                task.transition(ActivationState::Inactive);
                return Err(Error::instance_creation_failed(id.to_string(), e.to_string()));
            }
        }

        task.transition(ActivationState::Active);
        metrics::record_actor_activated(id.actor_type());
        info!(actor_id = %id, "Actor activated");
        Ok(task)
    }

    fn transition(&mut self, next: ActivationState) {
        assert!(
            self.state.can_transition_to(next),
            "invalid lifecycle transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Drain the mailbox until idle eviction or runtime shutdown
    async fn run(mut self) {
        let idle_timeout = self.dispatcher.config().actor.idle_timeout();
        let shutdown = self.dispatcher.shutdown_token().clone();
        let mut deadline = self.instance.idle_deadline(idle_timeout);

        let reason = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.instance.mailbox().close();
                    // Everything accepted before the gate closed still runs
                    while let Ok(envelope) = self.mailbox.try_recv() {
                        self.process(envelope).await;
                    }
                    break StopReason::Shutdown;
                }

                envelope = self.mailbox.recv() => match envelope {
                    Some(envelope) => {
                        self.process(envelope).await;
                        deadline = self.instance.idle_deadline(idle_timeout);
                    }
                    None => {
                        // The instance holds the sender, so this is unreachable
                        // while it lives
                        self.instance.mailbox().close();
                        break StopReason::Shutdown;
                    }
                },

                _ = tokio::time::sleep_until(deadline) => {
                    match self.instance.try_close_idle(idle_timeout) {
                        IdleCheck::Closed => break StopReason::Idle,
                        IdleCheck::NotBefore(next) => deadline = next,
                    }
                }
            }
        };

        self.stop(reason).await;
    }

    /// Run one call: handler, persistence, reply
    #[instrument(skip_all, fields(actor_id = %self.instance.id(), action = %envelope.action), level = "debug")]
    async fn process(&mut self, envelope: Envelope) {
        assert!(
            self.state.can_invoke(),
            "cannot invoke when state = {}",
            self.state
        );

        let wait_time = envelope.wait_time();
        let Envelope {
            action,
            args,
            requester,
            call_chain,
            reply_tx,
            ..
        } = envelope;
        debug!(action = %action, wait_ms = wait_time.as_millis() as u64, "Processing call");

        let started = Instant::now();
        let result = self.dispatch(&action, args, requester, call_chain).await;

        // State is persisted whatever the handler returned
        let result = match self.persist().await {
            Ok(()) => result,
            Err(persist_error) => {
                if let Err(handler_error) = &result {
                    self.dispatcher
                        .report(self.instance.id(), &action, handler_error);
                }
                Err(persist_error)
            }
        };

        let elapsed = started.elapsed();
        self.stats.record_invocation(elapsed, result.is_err());
        metrics::record_action(
            &action,
            metrics::status_label(&result),
            elapsed.as_secs_f64(),
        );

        let reply = result.map_err(|e| {
            self.dispatcher.report(self.instance.id(), &action, &e);
            e.into_action_error()
        });
        if reply_tx.send(reply).is_err() {
            debug!(action = %action, "Caller stopped waiting for reply");
        }

        self.instance.touch();
        self.instance.mailbox().complete();
    }

    async fn dispatch(
        &mut self,
        action: &str,
        args: Value,
        requester: Option<ConnectionId>,
        call_chain: CallChain,
    ) -> Result<Value> {
        let Some(handler) = self.definition.handler(action).cloned() else {
            return Err(Error::UnknownAction {
                actor_type: self.instance.id().actor_type().to_string(),
                action: action.to_string(),
            });
        };

        self.ctx
            .begin_turn(requester, Client::new(self.dispatcher.clone(), call_chain));

        match AssertUnwindSafe(handler(&mut self.ctx, args))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(Error::internal(format!(
                "action {} panicked: {}",
                action,
                panic_message(panic.as_ref())
            ))),
        }
    }

    async fn run_hook(&mut self, hook: &HookFn<S>, name: &str) -> Result<()> {
        let chain = CallChain::root().extend(self.instance.id());
        self.ctx
            .begin_turn(None, Client::new(self.dispatcher.clone(), chain));

        match AssertUnwindSafe(hook(&mut self.ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Error::internal(format!(
                "{} panicked: {}",
                name,
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Write the state if its encoding changed since the last write
    async fn persist(&mut self) -> Result<()> {
        let id = self.instance.id();

        let encoded = self
            .ctx
            .encode_state()
            .map_err(|e| Error::persistence_failed(id.to_string(), e.to_string()))?;

        if self.persisted.as_deref() == Some(encoded.as_slice()) {
            return Ok(());
        }

        if encoded.len() > ACTOR_STATE_SIZE_BYTES_MAX {
            let err = Error::StateTooLarge {
                size: encoded.len(),
                limit: ACTOR_STATE_SIZE_BYTES_MAX,
            };
            return Err(Error::persistence_failed(id.to_string(), err.to_string()));
        }

        let encoded = Bytes::from(encoded);
        let started = Instant::now();
        let saved = self.dispatcher.store().save(id, encoded.clone()).await;
        metrics::record_storage_operation(
            "save",
            metrics::status_label(&saved),
            started.elapsed().as_secs_f64(),
        );
        saved.map_err(|e| Error::persistence_failed(id.to_string(), e.to_string()))?;

        debug!(actor_id = %id, bytes = encoded.len(), "Saved state to storage");
        self.persisted = Some(encoded);
        Ok(())
    }

    #[instrument(skip(self), fields(actor_id = %self.instance.id()), level = "info")]
    async fn stop(mut self, reason: StopReason) {
        debug_assert!(!self.instance.mailbox().is_open());
        self.transition(ActivationState::Deactivating);
        let id = self.instance.id().clone();

        if let Some(hook) = self.definition.on_stop_hook().cloned() {
            if let Err(e) = self.run_hook(&hook, "on_stop").await {
                warn!(actor_id = %id, error = %e, "on_stop failed");
                self.dispatcher.report(&id, "on_stop", &e);
            }
        }

        if let Err(e) = self.persist().await {
            error!(actor_id = %id, error = %e, "Final flush failed");
            self.dispatcher.report(&id, "on_stop", &e);
        }

        self.transition(ActivationState::Inactive);

        let dropped = self.instance.connections().clear();
        self.dispatcher
            .remove_slot(&id, self.instance.generation());
        if reason == StopReason::Idle {
            metrics::record_actor_evicted(id.actor_type());
        }

        info!(
            actor_id = %id,
            reason = %reason,
            invocations = self.stats.invocation_count,
            errors = self.stats.error_count,
            avg_ms = self.stats.average_processing_time().as_millis() as u64,
            connections_dropped = dropped,
            "Actor stopped"
        );

        self.instance.stopped.cancel();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::ActorKey;

    fn live_instance(config: &StagehandConfig) -> (LiveInstance, mpsc::Receiver<Envelope>) {
        let id = ActorId::new("counter", ActorKey::new(["a"]).unwrap()).unwrap();
        LiveInstance::new(id, 1, config)
    }

    #[test]
    fn test_activation_state_transitions() {
        use ActivationState::*;

        assert!(Inactive.can_transition_to(Activating));
        assert!(Activating.can_transition_to(Active));
        assert!(Activating.can_transition_to(Inactive));
        assert!(Active.can_transition_to(Deactivating));
        assert!(Deactivating.can_transition_to(Inactive));

        assert!(!Inactive.can_transition_to(Active));
        assert!(!Active.can_transition_to(Activating));
        assert!(!Deactivating.can_transition_to(Active));

        assert!(Active.can_invoke());
        assert!(!Deactivating.can_invoke());
    }

    #[test]
    fn test_activation_stats() {
        let mut stats = ActivationStats::new();
        assert_eq!(stats.average_processing_time(), Duration::ZERO);

        stats.record_invocation(Duration::from_millis(10), false);
        stats.record_invocation(Duration::from_millis(30), true);

        assert_eq!(stats.invocation_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.average_processing_time(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_check_waits_for_timeout() {
        let (instance, _rx) = live_instance(&StagehandConfig::default());
        let timeout = Duration::from_millis(100);

        assert!(matches!(
            instance.try_close_idle(timeout),
            IdleCheck::NotBefore(_)
        ));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(instance.try_close_idle(timeout), IdleCheck::Closed);
        assert!(!instance.mailbox().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_blocks_idle_close() {
        let (instance, _rx) = live_instance(&StagehandConfig::default());
        let timeout = Duration::from_millis(100);
        let connection = ConnectionId::new(1);

        let _events = instance.connect(connection).unwrap().unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(
            instance.try_close_idle(timeout),
            IdleCheck::NotBefore(_)
        ));

        instance.disconnect(connection);
        assert!(matches!(
            instance.try_close_idle(timeout),
            IdleCheck::NotBefore(_)
        ));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(instance.try_close_idle(timeout), IdleCheck::Closed);
        assert!(instance.connect(ConnectionId::new(2)).is_none());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");

        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}

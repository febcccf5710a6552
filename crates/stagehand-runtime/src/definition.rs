//! Actor definitions
//!
//! TigerStyle: Names validated at build time, typed handlers erased once.
//!
//! An [`ActorDefinition`] names an actor type and carries its initial
//! state, its action table and its lifecycle hooks. A handler borrows the
//! instance's [`ActionContext`] mutably for exactly one turn, so state can
//! only change while the runtime is running that turn:
//!
//! ```ignore
//! ActorDefinition::<Counter>::new("counter").action("increment", |ctx, by: i64| {
//!     Box::pin(async move {
//!         ctx.state.count += by;
//!         ctx.broadcast("countChanged", &ctx.state.count)?;
//!         Ok(ctx.state.count)
//!     })
//! })
//! ```

use crate::connection::{ConnectionId, ConnectionRegistry, Event};
use crate::handle::Client;
use futures::future::{self, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use stagehand_core::actor::validate_actor_type;
use stagehand_core::constants::{ACTION_NAME_LENGTH_BYTES_MAX, EVENT_NAME_LENGTH_BYTES_MAX};
use stagehand_core::metrics;
use stagehand_core::{ActorId, ActorKey, Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Bounds every actor state type satisfies
pub trait ActorState: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> ActorState for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

pub(crate) type ActionFn<S> = Arc<
    dyn for<'a> Fn(&'a mut ActionContext<S>, Value) -> BoxFuture<'a, Result<Value>> + Send + Sync,
>;

pub(crate) type HookFn<S> =
    Arc<dyn for<'a> Fn(&'a mut ActionContext<S>) -> BoxFuture<'a, Result<()>> + Send + Sync>;

fn erase_action<S, F>(handler: F) -> ActionFn<S>
where
    F: for<'a> Fn(&'a mut ActionContext<S>, Value) -> BoxFuture<'a, Result<Value>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(handler)
}

// =============================================================================
// ActionRef
// =============================================================================

/// A typed action name
///
/// Pairs an action with its argument and return types so both sides of a
/// call agree at compile time:
///
/// ```ignore
/// pub const INCREMENT: ActionRef<i64, i64> = ActionRef::new("increment");
/// let count = handle.invoke(&INCREMENT, 5).await?;
/// ```
pub struct ActionRef<A, R> {
    name: &'static str,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> ActionRef<A, R> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<A, R> Clone for ActionRef<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, R> Copy for ActionRef<A, R> {}

impl<A, R> fmt::Debug for ActionRef<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActionRef").field(&self.name).finish()
    }
}

// =============================================================================
// ActionContext
// =============================================================================

/// What a handler sees during one action turn
///
/// The instance task owns the context and lends it to one handler or hook
/// at a time. Whatever `state` holds when the turn ends is what gets
/// persisted.
///
/// The borrow ends with the turn, so state cannot be carried into work
/// that outlives it:
///
/// ```compile_fail
/// use serde::{Deserialize, Serialize};
/// use stagehand_runtime::ActorDefinition;
///
/// #[derive(Default, Serialize, Deserialize)]
/// struct Counter {
///     count: i64,
/// }
///
/// ActorDefinition::<Counter>::new("counter").action("later", |ctx, _: ()| {
///     Box::pin(async move {
///         tokio::spawn(async move {
///             ctx.state.count += 100;
///         });
///         Ok(())
///     })
/// });
/// ```
pub struct ActionContext<S> {
    /// The instance state
    pub state: S,
    actor_id: ActorId,
    connections: Arc<ConnectionRegistry>,
    requester: Option<ConnectionId>,
    client: Client,
}

impl<S: ActorState> ActionContext<S> {
    pub(crate) fn new(
        actor_id: ActorId,
        state: S,
        connections: Arc<ConnectionRegistry>,
        client: Client,
    ) -> Self {
        Self {
            state,
            actor_id,
            connections,
            requester: None,
            client,
        }
    }

    /// Reset the per-call fields before lending the context to a handler
    pub(crate) fn begin_turn(&mut self, requester: Option<ConnectionId>, client: Client) {
        self.requester = requester;
        self.client = client;
    }

    /// The instance this handler runs on
    pub fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    pub fn key(&self) -> &ActorKey {
        self.actor_id.key()
    }

    /// Connection that issued the current call, if it came through one
    pub fn requester(&self) -> Option<ConnectionId> {
        self.requester
    }

    /// Client for calls to other instances
    ///
    /// Calls made through it carry this call's chain, so a call back into
    /// any instance already waiting on this one fails with `reentrant_call`.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Number of connections currently subscribed to this instance
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Push an event to every connection subscribed right now
    ///
    /// Returns how many connections it was queued for.
    pub fn broadcast<P>(&self, event: &str, payload: &P) -> Result<usize>
    where
        P: Serialize + ?Sized,
    {
        if event.is_empty() || event.len() > EVENT_NAME_LENGTH_BYTES_MAX {
            return Err(Error::internal(format!(
                "event name length {} outside 1..={}",
                event.len(),
                EVENT_NAME_LENGTH_BYTES_MAX
            )));
        }

        let payload = serde_json::to_value(payload).map_err(|e| Error::SerializationFailed {
            reason: format!("event {}: {}", event, e),
        })?;

        let delivered = self.connections.broadcast(&Event {
            name: event.to_string(),
            payload,
        });
        metrics::record_events_delivered(delivered as u64);
        Ok(delivered)
    }

    /// Encode the current state for persistence
    pub(crate) fn encode_state(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.state).map_err(|e| Error::SerializationFailed {
            reason: format!("actor state: {}", e),
        })
    }
}

// =============================================================================
// ActorDefinition
// =============================================================================

/// An actor type: name, initial state, action table and lifecycle hooks
pub struct ActorDefinition<S> {
    name: String,
    initial_state: Arc<dyn Fn() -> S + Send + Sync>,
    actions: HashMap<String, ActionFn<S>>,
    /// Names registered more than once, reported by `validate`
    duplicate_actions: Vec<String>,
    on_start: Option<HookFn<S>>,
    on_stop: Option<HookFn<S>>,
}

impl<S: ActorState + Default> ActorDefinition<S> {
    /// Define an actor type whose instances start from `S::default()`
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_state(name, S::default)
    }
}

impl<S: ActorState> ActorDefinition<S> {
    /// Define an actor type whose instances start from `initial_state()`
    pub fn with_state<F>(name: impl Into<String>, initial_state: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            initial_state: Arc::new(initial_state),
            actions: HashMap::new(),
            duplicate_actions: Vec::new(),
            on_start: None,
            on_stop: None,
        }
    }

    /// Register an action
    ///
    /// Arguments arrive as JSON and are decoded into `A`; a payload that does
    /// not decode fails the call with `invalid_arguments` before the handler
    /// runs. The return value is encoded back to JSON.
    pub fn action<A, R, F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: for<'a> Fn(&'a mut ActionContext<S>, A) -> BoxFuture<'a, Result<R>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let action = name.clone();

        let erased = erase_action::<S, _>(move |ctx, args| match serde_json::from_value::<A>(args) {
            Ok(args) => {
                let call = handler(ctx, args);
                let action = action.clone();
                async move {
                    let output = call.await?;
                    serde_json::to_value(output).map_err(|e| Error::SerializationFailed {
                        reason: format!("result of {}: {}", action, e),
                    })
                }
                .boxed()
            }
            Err(e) => future::ready(Err(Error::InvalidArguments {
                action: action.clone(),
                reason: e.to_string(),
            }))
            .boxed(),
        });

        if self.actions.insert(name.clone(), erased).is_some() {
            self.duplicate_actions.push(name);
        }
        self
    }

    /// Register the handler for a typed action
    pub fn define<A, R, F>(self, action: &ActionRef<A, R>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: for<'a> Fn(&'a mut ActionContext<S>, A) -> BoxFuture<'a, Result<R>>
            + Send
            + Sync
            + 'static,
    {
        self.action(action.name(), handler)
    }

    /// Run after state is loaded and before the first call
    ///
    /// An error here fails instance creation.
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut ActionContext<S>) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.on_start = Some(Arc::new(hook));
        self
    }

    /// Run when the instance stops, before its final flush
    pub fn on_stop<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut ActionContext<S>) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.on_stop = Some(Arc::new(hook));
        self
    }

    /// The actor type name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }

    /// Registered action names, in no particular order
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Check the type name and every action name
    pub fn validate(&self) -> Result<()> {
        validate_actor_type(&self.name)?;

        if let Some(duplicate) = self.duplicate_actions.first() {
            return Err(Error::InvalidConfiguration {
                field: format!("{}.{}", self.name, duplicate),
                reason: "action registered more than once".into(),
            });
        }

        for action in self.actions.keys() {
            if action.is_empty() || action.len() > ACTION_NAME_LENGTH_BYTES_MAX {
                return Err(Error::InvalidConfiguration {
                    field: format!("{}.{}", self.name, action),
                    reason: format!(
                        "action name length {} outside 1..={}",
                        action.len(),
                        ACTION_NAME_LENGTH_BYTES_MAX
                    ),
                });
            }
        }

        Ok(())
    }

    pub(crate) fn initial_state(&self) -> S {
        (self.initial_state)()
    }

    pub(crate) fn handler(&self, action: &str) -> Option<&ActionFn<S>> {
        self.actions.get(action)
    }

    pub(crate) fn on_start_hook(&self) -> Option<&HookFn<S>> {
        self.on_start.as_ref()
    }

    pub(crate) fn on_stop_hook(&self) -> Option<&HookFn<S>> {
        self.on_stop.as_ref()
    }
}

impl<S> fmt::Debug for ActorDefinition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorDefinition")
            .field("name", &self.name)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

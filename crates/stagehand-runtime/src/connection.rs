//! Connection registry and client-side connections
//!
//! TigerStyle: Bounded subscriber sets, bounded per-connection buffers,
//! failures isolated to the failing connection.
//!
//! A connection is a subscriber with its own bounded event channel. The
//! registry never owns an instance and never blocks a broadcast: a
//! subscriber whose channel is closed or full is dropped from the set.

use crate::activation::LiveInstance;
use crate::definition::ActionRef;
use crate::dispatcher::Dispatcher;
use crate::handle::{decode_reply, CallResult};
use crate::mailbox::CallChain;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stagehand_core::{ActorId, Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Runtime-unique connection identifier
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A named payload pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub payload: Value,
}

// =============================================================================
// ConnectionRegistry
// =============================================================================

struct Subscriber {
    id: ConnectionId,
    tx: mpsc::Sender<Event>,
}

/// Subscribers of one actor instance, in registration order
pub struct ConnectionRegistry {
    actor_id: ActorId,
    subscribers: Mutex<Vec<Subscriber>>,
    max_connections: usize,
    buffer: usize,
}

impl ConnectionRegistry {
    pub fn new(actor_id: ActorId, max_connections: usize, buffer: usize) -> Self {
        assert!(max_connections > 0, "max_connections must be positive");
        assert!(buffer > 0, "buffer must be positive");

        Self {
            actor_id,
            subscribers: Mutex::new(Vec::new()),
            max_connections,
            buffer,
        }
    }

    /// Add a subscriber and return its event receiver
    ///
    /// # Errors
    /// Returns `TooManyConnections` when the instance is at its limit.
    pub fn subscribe(&self, id: ConnectionId) -> Result<mpsc::Receiver<Event>> {
        let mut subscribers = self.subscribers.lock();
        if subscribers.len() >= self.max_connections {
            return Err(Error::TooManyConnections {
                id: self.actor_id.to_string(),
                max: self.max_connections,
            });
        }
        debug_assert!(subscribers.iter().all(|s| s.id != id));

        let (tx, rx) = mpsc::channel(self.buffer);
        subscribers.push(Subscriber { id, tx });
        debug!(actor_id = %self.actor_id, connection_id = %id, count = subscribers.len(), "Connection subscribed");
        Ok(rx)
    }

    /// Remove a subscriber; returns false if it was already gone
    pub fn unsubscribe(&self, id: ConnectionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() < before;
        if removed {
            debug!(actor_id = %self.actor_id, connection_id = %id, "Connection unsubscribed");
        }
        removed
    }

    /// Deliver `event` to every current subscriber, in registration order
    ///
    /// Returns the number of connections the event was queued for. Zero
    /// subscribers is not an error.
    pub fn broadcast(&self, event: &Event) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0usize;

        subscribers.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    actor_id = %self.actor_id,
                    connection_id = %subscriber.id,
                    event = %event.name,
                    "Connection event buffer full, dropping connection"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    actor_id = %self.actor_id,
                    connection_id = %subscriber.id,
                    "Connection closed, dropping"
                );
                false
            }
        });

        delivered
    }

    /// Drop every subscriber, ending their event streams
    ///
    /// Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        let count = subscribers.len();
        subscribers.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.subscribers.lock().iter().any(|s| s.id == id)
    }
}

// =============================================================================
// ActorConnection
// =============================================================================

/// Identifies a registered listener so it can be removed with `off`
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Listener {
    id: ListenerId,
    callback: Callback,
    once: bool,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_event: HashMap<String, Vec<Listener>>,
}

impl Listeners {
    fn add(&mut self, event: String, callback: Callback, once: bool) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_event.entry(event).or_default().push(Listener { id, callback, once });
        id
    }

    fn remove(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        for listeners in self.by_event.values_mut() {
            let before = listeners.len();
            listeners.retain(|l| l.id != id);
            removed |= listeners.len() < before;
        }
        self.by_event.retain(|_, listeners| !listeners.is_empty());
        removed
    }

    /// Callbacks to run for `event`, consuming `once` listeners
    fn take_matching(&mut self, event: &str) -> Vec<Callback> {
        let Some(listeners) = self.by_event.get_mut(event) else {
            return Vec::new();
        };
        let callbacks = listeners.iter().map(|l| l.callback.clone()).collect();
        listeners.retain(|l| !l.once);
        if listeners.is_empty() {
            self.by_event.remove(event);
        }
        callbacks
    }
}

/// A live subscription to one actor instance
///
/// Events are dispatched to listeners on a background task, in the order the
/// instance broadcast them. Calls made through the connection carry its id as
/// the requester. Dropping the connection unsubscribes it.
pub struct ActorConnection {
    id: ConnectionId,
    instance: Arc<LiveInstance>,
    dispatcher: Arc<Dispatcher>,
    listeners: Arc<Mutex<Listeners>>,
    /// Set once the event stream ends (disposed or dropped by the registry)
    closed: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
    disposed: bool,
}

impl ActorConnection {
    pub(crate) fn open(
        id: ConnectionId,
        instance: Arc<LiveInstance>,
        dispatcher: Arc<Dispatcher>,
        mut events: mpsc::Receiver<Event>,
    ) -> Self {
        let listeners: Arc<Mutex<Listeners>> = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));

        let pump = {
            let listeners = listeners.clone();
            let closed = closed.clone();
            let actor_id = instance.id().clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let callbacks = listeners.lock().take_matching(&event.name);
                    for callback in callbacks {
                        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            callback(&event.payload)
                        }));
                        if outcome.is_err() {
                            warn!(
                                actor_id = %actor_id,
                                connection_id = %id,
                                event = %event.name,
                                "Event listener panicked"
                            );
                        }
                    }
                }
                closed.store(true, Ordering::SeqCst);
            })
        };

        Self {
            id,
            instance,
            dispatcher,
            listeners,
            closed,
            pump: Some(pump),
            disposed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The instance this connection is subscribed to
    pub fn actor_id(&self) -> &ActorId {
        self.instance.id()
    }

    /// False once disposed or dropped by the instance for a full buffer
    pub fn is_connected(&self) -> bool {
        !self.disposed
            && !self.closed.load(Ordering::SeqCst)
            && self.instance.connections().contains(self.id)
    }

    /// Run `callback` for every `event` delivered from now on
    pub fn on<F>(&self, event: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners.lock().add(event.into(), Arc::new(callback), false)
    }

    /// Run `callback` for the next `event` only
    pub fn once<F>(&self, event: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners.lock().add(event.into(), Arc::new(callback), true)
    }

    /// Remove a listener; returns false if it was already gone
    pub fn off(&self, listener: ListenerId) -> bool {
        self.listeners.lock().remove(listener)
    }

    /// Call an action with this connection as the requester
    pub async fn call<R>(&self, action: &str, args: impl Serialize) -> CallResult<R>
    where
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args).map_err(|e| {
            self.dispatcher.caller_error(
                self.actor_id(),
                action,
                Error::SerializationFailed {
                    reason: e.to_string(),
                },
            )
        })?;
        let value = self.call_raw(action, args).await?;
        decode_reply(&self.dispatcher, self.actor_id(), action, value)
    }

    /// Call an action with an untyped payload
    pub async fn call_raw(&self, action: &str, args: Value) -> CallResult<Value> {
        self.dispatcher
            .invoke(self.actor_id(), action, args, Some(self.id), &CallChain::root())
            .await
            .map_err(|e| self.dispatcher.caller_error(self.actor_id(), action, e))
    }

    /// Call a typed action
    pub async fn invoke<A, R>(&self, action: &ActionRef<A, R>, args: A) -> CallResult<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.call(action.name(), args).await
    }

    /// Unsubscribe and stop delivering events
    pub fn dispose(mut self) {
        self.disconnect();
    }

    fn disconnect(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.closed.store(true, Ordering::SeqCst);
        self.instance.disconnect(self.id);
    }
}

impl Drop for ActorConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for ActorConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorConnection")
            .field("id", &self.id)
            .field("actor_id", self.instance.id())
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagehand_core::ActorKey;

    fn registry(max: usize, buffer: usize) -> ConnectionRegistry {
        let id = ActorId::new("chatRoom", ActorKey::new(["general"]).unwrap()).unwrap();
        ConnectionRegistry::new(id, max, buffer)
    }

    fn event(name: &str, payload: Value) -> Event {
        Event {
            name: name.to_string(),
            payload,
        }
    }

    #[test]
    fn test_broadcast_no_subscribers_is_noop() {
        let registry = registry(4, 4);
        assert_eq!(registry.broadcast(&event("x", json!(1))), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_in_order() {
        let registry = registry(4, 8);
        let mut a = registry.subscribe(ConnectionId::new(1)).unwrap();
        let mut b = registry.subscribe(ConnectionId::new(2)).unwrap();

        assert_eq!(registry.broadcast(&event("msg", json!("one"))), 2);
        assert_eq!(registry.broadcast(&event("msg", json!("two"))), 2);

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap().payload, json!("one"));
            assert_eq!(rx.recv().await.unwrap().payload, json!("two"));
        }
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_dropped_others_unaffected() {
        let registry = registry(4, 8);
        let closed = registry.subscribe(ConnectionId::new(1)).unwrap();
        let mut healthy = registry.subscribe(ConnectionId::new(2)).unwrap();
        drop(closed);

        assert_eq!(registry.broadcast(&event("tick", json!(1))), 1);
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(ConnectionId::new(1)));
        assert_eq!(healthy.recv().await.unwrap().name, "tick");
    }

    #[tokio::test]
    async fn test_full_subscriber_is_dropped() {
        let registry = registry(4, 1);
        let _slow = registry.subscribe(ConnectionId::new(1)).unwrap();
        let mut fast = registry.subscribe(ConnectionId::new(2)).unwrap();

        assert_eq!(registry.broadcast(&event("tick", json!(1))), 2);
        fast.recv().await.unwrap();

        // slow never drained its single slot
        assert_eq!(registry.broadcast(&event("tick", json!(2))), 1);
        assert!(!registry.contains(ConnectionId::new(1)));
        assert_eq!(fast.recv().await.unwrap().payload, json!(2));
    }

    #[test]
    fn test_connection_limit() {
        let registry = registry(2, 4);
        let _a = registry.subscribe(ConnectionId::new(1)).unwrap();
        let _b = registry.subscribe(ConnectionId::new(2)).unwrap();

        let result = registry.subscribe(ConnectionId::new(3));
        assert!(matches!(result, Err(Error::TooManyConnections { max: 2, .. })));

        assert!(registry.unsubscribe(ConnectionId::new(1)));
        assert!(!registry.unsubscribe(ConnectionId::new(1)));
        assert!(registry.subscribe(ConnectionId::new(3)).is_ok());
    }

    #[tokio::test]
    async fn test_clear_ends_event_streams() {
        let registry = registry(4, 4);
        let mut a = registry.subscribe(ConnectionId::new(1)).unwrap();
        let _b = registry.subscribe(ConnectionId::new(2)).unwrap();

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(a.recv().await.is_none());
    }

    #[test]
    fn test_listeners_once_and_off() {
        let mut listeners = Listeners::default();
        let noop: Callback = Arc::new(|_| {});

        let persistent = listeners.add("a".into(), noop.clone(), false);
        listeners.add("a".into(), noop.clone(), true);

        assert_eq!(listeners.take_matching("a").len(), 2);
        assert_eq!(listeners.take_matching("a").len(), 1);
        assert!(listeners.take_matching("b").is_empty());

        assert!(listeners.remove(persistent));
        assert!(!listeners.remove(persistent));
        assert!(listeners.take_matching("a").is_empty());
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }
}

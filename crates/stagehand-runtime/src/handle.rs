//! Actor handles for external invocations
//!
//! TigerStyle: Location-transparent references with explicit error handling.
//!
//! A [`Client`] is the entry point for callers, obtained from a
//! [`crate::Runtime`] or, inside a handler, from the action context. Every
//! error it returns has already been converted to the caller-facing
//! [`ActionError`] shape.

use crate::connection::ActorConnection;
use crate::definition::ActionRef;
use crate::dispatcher::Dispatcher;
use crate::mailbox::CallChain;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use stagehand_core::{ActionError, ActorId, ActorKey, Error, KeyTag};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result of a call as seen by the caller
pub type CallResult<T> = std::result::Result<T, ActionError>;

/// Entry point for resolving actors
#[derive(Clone)]
pub struct Client {
    dispatcher: Arc<Dispatcher>,
    /// Chain of the call this client was handed to, empty outside actors
    call_chain: CallChain,
}

impl Client {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, call_chain: CallChain) -> Self {
        Self {
            dispatcher,
            call_chain,
        }
    }

    /// Get a handle to the instance with this type and key, creating it if
    /// it is not live
    ///
    /// The instance is hydrated before this returns, so creation failures
    /// surface here as `instance_creation_error`.
    pub async fn get_or_create<I, T>(&self, actor_type: &str, key: I) -> CallResult<ActorHandle>
    where
        I: IntoIterator<Item = T>,
        T: Into<KeyTag>,
    {
        let id = ActorKey::new(key)
            .and_then(|key| ActorId::new(actor_type, key))
            .map_err(Error::into_action_error)?;

        // Waiting on a caller's own hydration would never finish
        if self.call_chain.contains(&id) {
            return Err(Error::ReentrantCall {
                id: id.to_string(),
                action: "get_or_create".into(),
            }
            .into_action_error());
        }

        self.dispatcher
            .resolve(&id)
            .await
            .map_err(|e| self.dispatcher.caller_error(&id, "get_or_create", e))?;

        Ok(self.handle(id))
    }

    /// Get a handle without resolving; the instance is created by the
    /// first call made through it
    pub fn handle(&self, id: ActorId) -> ActorHandle {
        ActorHandle {
            id,
            dispatcher: self.dispatcher.clone(),
            call_chain: self.call_chain.clone(),
            timeout: None,
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("call_chain_depth", &self.call_chain.len())
            .finish()
    }
}

/// Handle to invoke an actor
///
/// Cheap to clone and shareable across tasks. Holding a handle does not keep
/// the instance live; a call through a handle to an evicted instance
/// rehydrates it.
#[derive(Clone)]
pub struct ActorHandle {
    id: ActorId,
    dispatcher: Arc<Dispatcher>,
    call_chain: CallChain,
    /// Caller-side wait limit for each call
    timeout: Option<Duration>,
}

impl ActorHandle {
    /// Get the actor's ID
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// Stop waiting for a reply after `timeout`
    ///
    /// The action itself still runs to completion.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        assert!(!timeout.is_zero(), "timeout must be positive");
        self.timeout = Some(timeout);
        self
    }

    /// Call an action, encoding `args` and decoding the result
    pub async fn call<R>(&self, action: &str, args: impl Serialize) -> CallResult<R>
    where
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args).map_err(|e| {
            self.dispatcher.caller_error(
                &self.id,
                action,
                Error::SerializationFailed {
                    reason: e.to_string(),
                },
            )
        })?;
        let value = self.call_raw(action, args).await?;
        decode_reply(&self.dispatcher, &self.id, action, value)
    }

    /// Call an action with an untyped payload
    pub async fn call_raw(&self, action: &str, args: Value) -> CallResult<Value> {
        let call = self
            .dispatcher
            .invoke(&self.id, action, args, None, &self.call_chain);

        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .unwrap_or_else(|_| {
                    Err(Error::ActionTimedOut {
                        action: action.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }),
            None => call.await,
        };

        result.map_err(|e| self.dispatcher.caller_error(&self.id, action, e))
    }

    /// Call a typed action
    pub async fn invoke<A, R>(&self, action: &ActionRef<A, R>, args: A) -> CallResult<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.call(action.name(), args).await
    }

    /// Open a connection that receives the instance's broadcasts
    pub async fn connect(&self) -> CallResult<ActorConnection> {
        if self.call_chain.contains(&self.id) {
            return Err(Error::ReentrantCall {
                id: self.id.to_string(),
                action: "connect".into(),
            }
            .into_action_error());
        }

        self.dispatcher
            .connect(&self.id)
            .await
            .map_err(|e| self.dispatcher.caller_error(&self.id, "connect", e))
    }
}

impl fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Decode a reply value into the type the caller asked for
pub(crate) fn decode_reply<R>(
    dispatcher: &Dispatcher,
    id: &ActorId,
    action: &str,
    value: Value,
) -> CallResult<R>
where
    R: DeserializeOwned,
{
    serde_json::from_value(value).map_err(|e| {
        dispatcher.caller_error(
            id,
            action,
            Error::DeserializationFailed {
                reason: format!("reply of {}: {}", action, e),
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ActorDefinition;
    use crate::dispatcher::ActorFactory;
    use serde::Deserialize;
    use stagehand_core::error::{CODE_INTERNAL_ERROR, CODE_INVALID_ACTOR_KEY, CODE_TIMEOUT};
    use stagehand_core::{StagehandConfig, ACTOR_KEY_TAG_LENGTH_BYTES_MAX};
    use stagehand_storage::MemoryStore;
    use std::collections::HashMap;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Echo {
        calls: u32,
    }

    const ECHO: ActionRef<String, String> = ActionRef::new("echo");

    fn client() -> Client {
        let definition = ActorDefinition::<Echo>::new("echo")
            .define(&ECHO, |ctx, text: String| {
                Box::pin(async move {
                    ctx.state.calls += 1;
                    Ok(text)
                })
            })
            .action("slow", |_ctx, ms: u64| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(ms)
                })
            });

        let mut factories: HashMap<String, Arc<dyn ActorFactory>> = HashMap::new();
        factories.insert("echo".into(), Arc::new(definition));
        let dispatcher = Arc::new(Dispatcher::new(
            factories,
            Arc::new(MemoryStore::new()),
            StagehandConfig::default(),
        ));
        Client::new(dispatcher, CallChain::root())
    }

    #[tokio::test]
    async fn test_typed_invoke() {
        let handle = client().get_or_create("echo", ["a"]).await.unwrap();
        let reply = handle.invoke(&ECHO, "hello".to_string()).await.unwrap();
        assert_eq!(reply, "hello");
        assert_eq!(handle.id().to_string(), "echo[a]");
    }

    #[tokio::test]
    async fn test_invalid_key_is_rejected() {
        let key: [&str; 0] = [];
        let handle = client().get_or_create("echo", key).await.unwrap();
        assert!(handle.id().key().is_empty());

        let long_tag = "x".repeat(ACTOR_KEY_TAG_LENGTH_BYTES_MAX + 1);
        let err = client()
            .get_or_create("echo", [long_tag])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_INVALID_ACTOR_KEY));
    }

    #[tokio::test]
    async fn test_reply_type_mismatch_is_redacted() {
        let handle = client().get_or_create("echo", ["a"]).await.unwrap();
        let err = handle.call::<u64>("echo", "text").await.unwrap_err();
        assert_eq!(err.code(), Some(CODE_INTERNAL_ERROR));
        assert!(!err.message.contains("reply"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_cancel_action() {
        let handle = client()
            .get_or_create("echo", ["a"])
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(10));

        let err = handle.call::<u64>("slow", 50).await.unwrap_err();
        assert_eq!(err.code(), Some(CODE_TIMEOUT));

        // The slow call still holds the instance; the next call queues
        // behind it and completes once it finishes
        let patient = handle.clone().with_timeout(Duration::from_secs(1));
        let reply: u64 = patient.call("slow", 1).await.unwrap();
        assert_eq!(reply, 1);
    }
}

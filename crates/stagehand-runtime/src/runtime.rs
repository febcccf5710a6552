//! Main runtime coordinator
//!
//! TigerStyle: Single entry point, explicit configuration, clean shutdown.

use crate::definition::{ActorDefinition, ActorState};
use crate::dispatcher::{ActorFactory, Diagnostic, Dispatcher};
use crate::handle::Client;
use crate::mailbox::CallChain;
use stagehand_core::{ActorId, Error, Result, StagehandConfig};
use stagehand_storage::{MemoryStore, StateStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Builder for creating a runtime
pub struct RuntimeBuilder {
    factories: Vec<Arc<dyn ActorFactory>>,
    store: Option<Arc<dyn StateStore>>,
    config: StagehandConfig,
}

impl RuntimeBuilder {
    /// Create a new runtime builder
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
            store: None,
            config: StagehandConfig::default(),
        }
    }

    /// Register an actor type
    pub fn with_actor<S: ActorState>(mut self, definition: ActorDefinition<S>) -> Self {
        self.factories.push(Arc::new(definition));
        self
    }

    /// Set the state store (defaults to an in-memory store)
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the configuration
    pub fn with_config(mut self, config: StagehandConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the runtime
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` for bad limits, no actor types, or two
    /// actor types with the same name; and any definition's own validation
    /// error.
    pub fn build(self) -> Result<Runtime> {
        self.config.validate()?;

        if self.factories.is_empty() {
            return Err(Error::InvalidConfiguration {
                field: "actors".into(),
                reason: "at least one actor type is required".into(),
            });
        }

        let mut factories: HashMap<String, Arc<dyn ActorFactory>> = HashMap::new();
        for factory in self.factories {
            factory.validate()?;
            let name = factory.actor_type().to_string();
            if factories.contains_key(&name) {
                return Err(Error::InvalidConfiguration {
                    field: format!("actors.{}", name),
                    reason: "actor type registered more than once".into(),
                });
            }
            factories.insert(name, factory);
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn StateStore>);

        info!(
            actor_types = factories.len(),
            max_actors = self.config.actor.max_actors_count,
            idle_timeout_ms = self.config.actor.idle_timeout_ms,
            "Starting Stagehand runtime"
        );

        Ok(Runtime {
            dispatcher: Arc::new(Dispatcher::new(factories, store, self.config)),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The main Stagehand runtime
///
/// Owns the live-instance map for every registered actor type. Instances run
/// on the ambient tokio runtime. Dropping the runtime stops new work; call
/// [`Runtime::shutdown`] to also wait for every instance to flush its state.
pub struct Runtime {
    dispatcher: Arc<Dispatcher>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// A client for calls from outside any actor
    pub fn client(&self) -> Client {
        Client::new(self.dispatcher.clone(), CallChain::root())
    }

    /// Full detail of every failure a caller saw redacted
    ///
    /// Only failures after subscribing are received; a receiver that falls
    /// behind skips the oldest entries.
    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.dispatcher.subscribe_diagnostics()
    }

    /// Get the runtime configuration
    pub fn config(&self) -> &StagehandConfig {
        self.dispatcher.config()
    }

    /// Number of instances live or being created
    pub fn live_actor_count(&self) -> usize {
        self.dispatcher.live_count()
    }

    pub fn is_live(&self, id: &ActorId) -> bool {
        self.dispatcher.is_live(id)
    }

    /// Stop accepting calls and wait for every instance to stop
    ///
    /// Calls already queued run to completion and every instance flushes its
    /// state. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        info!(live = self.live_actor_count(), "Stopping Stagehand runtime");
        self.dispatcher.shutdown().await;
        debug_assert_eq!(self.live_actor_count(), 0, "instances left after shutdown");
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.dispatcher.is_shutting_down()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Can't await in drop; instances flush on their own tasks
        self.dispatcher.shutdown_token().cancel();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("live", &self.live_actor_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use stagehand_core::error::CODE_SHUTTING_DOWN;

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct CounterState {
        count: i64,
    }

    fn counter() -> ActorDefinition<CounterState> {
        ActorDefinition::<CounterState>::new("counter")
            .action("increment", |ctx, _: ()| {
                Box::pin(async move {
                    ctx.state.count += 1;
                    Ok(ctx.state.count)
                })
            })
            .action("get", |ctx, _: ()| Box::pin(async move { Ok(ctx.state.count) }))
    }

    #[tokio::test]
    async fn test_runtime_basic() {
        let runtime = Runtime::builder().with_actor(counter()).build().unwrap();
        let actor = runtime
            .client()
            .get_or_create("counter", ["counter-1"])
            .await
            .unwrap();

        assert_eq!(actor.call::<i64>("increment", ()).await.unwrap(), 1);
        assert_eq!(actor.call::<i64>("increment", ()).await.unwrap(), 2);
        assert_eq!(runtime.live_actor_count(), 1);
        assert!(runtime.is_live(actor.id()));

        runtime.shutdown().await.unwrap();
        assert_eq!(runtime.live_actor_count(), 0);
    }

    #[tokio::test]
    async fn test_runtime_multiple_actors() {
        let runtime = Runtime::builder().with_actor(counter()).build().unwrap();
        let client = runtime.client();

        let actor1 = client.get_or_create("counter", ["a"]).await.unwrap();
        let actor2 = client.get_or_create("counter", ["b"]).await.unwrap();

        // Independent state
        actor1.call::<i64>("increment", ()).await.unwrap();
        actor1.call::<i64>("increment", ()).await.unwrap();
        actor2.call::<i64>("increment", ()).await.unwrap();

        assert_eq!(actor1.call::<i64>("get", ()).await.unwrap(), 2);
        assert_eq!(actor2.call::<i64>("get", ()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_runtime_state_persistence() {
        let store = Arc::new(MemoryStore::new());

        // First runtime instance
        {
            let runtime = Runtime::builder()
                .with_actor(counter())
                .with_store(store.clone())
                .build()
                .unwrap();

            let actor = runtime
                .client()
                .get_or_create("counter", ["persistent"])
                .await
                .unwrap();
            actor.call::<i64>("increment", ()).await.unwrap();
            actor.call::<i64>("increment", ()).await.unwrap();

            runtime.shutdown().await.unwrap();
        }

        // Second runtime instance - state should be restored
        {
            let runtime = Runtime::builder()
                .with_actor(counter())
                .with_store(store)
                .build()
                .unwrap();

            let actor = runtime
                .client()
                .get_or_create("counter", ["persistent"])
                .await
                .unwrap();
            assert_eq!(actor.call::<i64>("get", ()).await.unwrap(), 2);
        }
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let runtime = Runtime::builder().with_actor(counter()).build().unwrap();
        let actor = runtime.client().get_or_create("counter", ["a"]).await.unwrap();

        runtime.shutdown().await.unwrap();
        runtime.shutdown().await.unwrap();

        let err = actor.call::<i64>("get", ()).await.unwrap_err();
        assert_eq!(err.code(), Some(CODE_SHUTTING_DOWN));
    }

    #[test]
    fn test_build_validation() {
        assert!(matches!(
            Runtime::builder().build(),
            Err(Error::InvalidConfiguration { .. })
        ));

        let duplicate = Runtime::builder()
            .with_actor(counter())
            .with_actor(counter())
            .build();
        assert!(matches!(duplicate, Err(Error::InvalidConfiguration { .. })));

        let mut config = StagehandConfig::default();
        config.actor.mailbox_depth_max = 0;
        let bad_config = Runtime::builder()
            .with_actor(counter())
            .with_config(config)
            .build();
        assert!(bad_config.is_err());
    }
}

//! Stagehand Runtime
//!
//! Actor runtime, dispatcher, and client proxy for Stagehand actors.
//!
//! # Overview
//!
//! The runtime provides:
//! - On-demand instance creation with state hydration
//! - Per-instance FIFO execution of action calls
//! - State persistence after every call
//! - Event broadcast to connected subscribers
//! - Idle eviction and clean shutdown
//!
//! ```ignore
//! let runtime = Runtime::builder().with_actor(counter()).build()?;
//! let counter = runtime.client().get_or_create("counter", ["a"]).await?;
//! let connection = counter.connect().await?;
//! connection.on("countChanged", |count| println!("count = {}", count));
//! let count: i64 = counter.call("increment", 5).await?;
//! ```
//!
//! # TigerStyle
//! - Single activation guarantee (one instance per ActorId)
//! - Explicit lifecycle states
//! - Bounded mailboxes and event buffers (no silent message drops)

pub mod activation;
pub mod connection;
pub mod definition;
pub mod dispatcher;
pub mod handle;
pub mod mailbox;
pub mod runtime;

pub use activation::{ActivationState, ActivationStats};
pub use connection::{ActorConnection, ConnectionId, Event, ListenerId};
pub use definition::{ActionContext, ActionRef, ActorDefinition, ActorState};
pub use dispatcher::Diagnostic;
pub use handle::{ActorHandle, CallResult, Client};
pub use mailbox::{CallChain, Envelope, Mailbox};
pub use runtime::{Runtime, RuntimeBuilder};

pub use stagehand_core::{
    ActionError, ActorId, ActorKey, Error, KeyTag, Result, StagehandConfig, UserError,
};

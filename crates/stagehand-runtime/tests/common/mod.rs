//! Actor definitions shared by the integration tests
#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stagehand_runtime::{
    ActionRef, ActorConnection, ActorDefinition, Error, Runtime, StagehandConfig, UserError,
};
use stagehand_storage::StateStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

// =============================================================================
// Counter
// =============================================================================

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Counter {
    pub count: i64,
}

pub const INCREMENT: ActionRef<i64, i64> = ActionRef::new("increment");
pub const GET_COUNT: ActionRef<(), i64> = ActionRef::new("getCount");

pub fn counter() -> ActorDefinition<Counter> {
    ActorDefinition::<Counter>::new("counter")
        .define(&INCREMENT, |ctx, by: i64| {
            Box::pin(async move {
                ctx.state.count += by;
                ctx.broadcast("countChanged", &ctx.state.count)?;
                Ok(ctx.state.count)
            })
        })
        .define(&GET_COUNT, |ctx, _: ()| Box::pin(async move { Ok(ctx.state.count) }))
}

/// Counter that also counts its starts and stops
pub fn counter_with_hooks(
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
) -> ActorDefinition<Counter> {
    counter()
        .on_start(move |_ctx| {
            let starts = starts.clone();
            Box::pin(async move {
                starts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .on_stop(move |_ctx| {
            let stops = stops.clone();
            Box::pin(async move {
                stops.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
}

// =============================================================================
// Rate limiter
// =============================================================================

pub const RATE_LIMIT_COUNT_MAX: u32 = 5;
pub const RATE_LIMIT_WINDOW_MS: u64 = 60_000;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RateLimiter {
    pub count: u32,
    pub reset_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub resets_in_ms: u64,
}

pub const CHECK_LIMIT: ActionRef<(), LimitResult> = ActionRef::new("checkLimit");

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

pub fn rate_limiter() -> ActorDefinition<RateLimiter> {
    ActorDefinition::<RateLimiter>::new("rateLimiter").define(&CHECK_LIMIT, |ctx, _: ()| {
        Box::pin(async move {
            let now = now_ms();
            let state = &mut ctx.state;

            if now > state.reset_at_ms {
                state.count = 0;
                state.reset_at_ms = now + RATE_LIMIT_WINDOW_MS;
            }

            let allowed = state.count < RATE_LIMIT_COUNT_MAX;
            if allowed {
                state.count += 1;
            }

            Ok(LimitResult {
                allowed,
                remaining: RATE_LIMIT_COUNT_MAX - state.count,
                resets_in_ms: state.reset_at_ms.saturating_sub(now),
            })
        })
    })
}

// =============================================================================
// Chat room
// =============================================================================

pub const USERNAME_LENGTH_BYTES_MAX: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub text: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ChatRoom {
    pub messages: Vec<Message>,
}

pub const SEND_MESSAGE: ActionRef<Message, Message> = ActionRef::new("sendMessage");
pub const GET_HISTORY: ActionRef<(), Vec<Message>> = ActionRef::new("getHistory");

pub fn chat_room() -> ActorDefinition<ChatRoom> {
    ActorDefinition::<ChatRoom>::new("chatRoom")
        .define(&SEND_MESSAGE, |ctx, message: Message| {
            Box::pin(async move {
                if message.sender.len() > USERNAME_LENGTH_BYTES_MAX {
                    return Err(UserError::new("Username is too long")
                        .with_code("invalid_username")
                        .with_metadata(serde_json::json!({ "maxLength": USERNAME_LENGTH_BYTES_MAX }))
                        .into());
                }

                ctx.state.messages.push(message.clone());
                ctx.broadcast("newMessage", &message)?;
                Ok(message)
            })
        })
        .define(&GET_HISTORY, |ctx, _: ()| {
            Box::pin(async move { Ok(ctx.state.messages.clone()) })
        })
}

// =============================================================================
// Failure modes
// =============================================================================

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Flaky {
    pub attempts: u32,
}

/// Actor whose actions fail in each of the ways a handler can
pub fn flaky() -> ActorDefinition<Flaky> {
    ActorDefinition::<Flaky>::new("flaky")
        .action("attempt", |ctx, _: ()| {
            Box::pin(async move {
                ctx.state.attempts += 1;
                Ok(ctx.state.attempts)
            })
        })
        .action("leakSecret", |_ctx, _: ()| {
            Box::pin(async move { Err::<(), _>(Error::internal("db password is hunter2")) })
        })
        .action("panic", |_ctx, _: ()| {
            Box::pin(async move {
                if true {
                    panic!("handler exploded");
                }
                Ok(())
            })
        })
        .action("rejectAfterWrite", |ctx, _: ()| {
            Box::pin(async move {
                ctx.state.attempts += 1;
                Err::<(), _>(UserError::new("rejected").with_code("rejected").into())
            })
        })
        .action("sleep", |ctx, ms: u64| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ctx.state.attempts += 1;
                Ok(ms)
            })
        })
        .action("whoami", |ctx, _: ()| {
            Box::pin(async move { Ok(ctx.requester().map(|id| id.as_u64())) })
        })
}

// =============================================================================
// Helpers
// =============================================================================

pub fn runtime_with(store: Arc<dyn StateStore>, config: StagehandConfig) -> Runtime {
    Runtime::builder()
        .with_actor(counter())
        .with_actor(rate_limiter())
        .with_actor(chat_room())
        .with_actor(flaky())
        .with_store(store)
        .with_config(config)
        .build()
        .expect("runtime builds")
}

pub fn runtime() -> Runtime {
    runtime_with(
        Arc::new(stagehand_storage::MemoryStore::new()),
        StagehandConfig::default(),
    )
}

/// Forward every `event` payload the connection receives to a channel
pub fn collect(connection: &ActorConnection, event: &str) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    connection.on(event, move |payload| {
        let _ = tx.send(payload.clone());
    });
    rx
}

/// Next collected payload, failing the test if none arrives
pub async fn next(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event arrives in time")
        .expect("event stream open")
}

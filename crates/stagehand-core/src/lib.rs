//! Stagehand Core
//!
//! Core types, errors, and constants for the Stagehand actor runtime.
//!
//! # Overview
//!
//! Stagehand hosts actors: independently addressable units that combine
//! durable state with a table of named actions, and that push events to
//! connected subscribers.
//!
//! This crate holds what every other crate needs:
//! - Actor identity ([`ActorId`], [`ActorKey`], [`KeyTag`])
//! - The internal error taxonomy ([`Error`]) and the caller-facing
//!   [`ActionError`]
//! - Configuration with explicit limits ([`StagehandConfig`])
//! - Telemetry and metrics
//!
//! # TigerStyle
//!
//! - Explicit limits with big-endian naming (e.g., `ACTOR_KEY_TAGS_COUNT_MAX`)
//! - Validation at construction, immutability after

pub mod actor;
pub mod config;
pub mod constants;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub use actor::{ActorId, ActorKey, KeyTag};
pub use config::{ActorConfig, ConnectionConfig, StagehandConfig};
pub use constants::*;
pub use error::{ActionError, Error, Result, UserError};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

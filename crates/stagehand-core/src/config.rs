//! Configuration for Stagehand
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a Stagehand runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagehandConfig {
    /// Actor lifecycle and dispatch configuration
    #[serde(default)]
    pub actor: ActorConfig,

    /// Connection and broadcast configuration
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl StagehandConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.actor.validate()?;
        self.connection.validate()?;
        Ok(())
    }

    /// Parse from a JSON document, filling omitted fields with defaults
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| Error::InvalidConfiguration {
                field: "<root>".into(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    ///
    /// Reads:
    /// - `STAGEHAND_IDLE_TIMEOUT_MS`
    /// - `STAGEHAND_MAILBOX_DEPTH`
    /// - `STAGEHAND_MAX_ACTORS`
    /// - `STAGEHAND_EVENT_BUFFER`
    /// - `STAGEHAND_MAX_CONNECTIONS_PER_ACTOR`
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        let mut config = Self::default();
        if let Some(v) = var("STAGEHAND_IDLE_TIMEOUT_MS") {
            config.actor.idle_timeout_ms = v;
        }
        if let Some(v) = var("STAGEHAND_MAILBOX_DEPTH") {
            config.actor.mailbox_depth_max = v;
        }
        if let Some(v) = var("STAGEHAND_MAX_ACTORS") {
            config.actor.max_actors_count = v;
        }
        if let Some(v) = var("STAGEHAND_EVENT_BUFFER") {
            config.connection.event_buffer_count = v;
        }
        if let Some(v) = var("STAGEHAND_MAX_CONNECTIONS_PER_ACTOR") {
            config.connection.max_connections_per_actor = v;
        }
        config
    }
}

/// Actor lifecycle and dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Maximum live actor instances in this runtime
    #[serde(default = "default_max_actors")]
    pub max_actors_count: usize,

    /// Idle window before an actor without connections or work is evicted (milliseconds)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Maximum queued calls per actor
    #[serde(default = "default_mailbox_depth")]
    pub mailbox_depth_max: usize,
}

fn default_max_actors() -> usize {
    ACTOR_CONCURRENT_COUNT_DEFAULT
}

fn default_idle_timeout_ms() -> u64 {
    ACTOR_IDLE_TIMEOUT_MS_DEFAULT
}

fn default_mailbox_depth() -> usize {
    MAILBOX_DEPTH_DEFAULT
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            max_actors_count: default_max_actors(),
            idle_timeout_ms: default_idle_timeout_ms(),
            mailbox_depth_max: default_mailbox_depth(),
        }
    }
}

impl ActorConfig {
    /// Idle window as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_actors_count == 0 || self.max_actors_count > ACTOR_CONCURRENT_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "actor.max_actors_count".into(),
                reason: format!(
                    "{} outside 1..={}",
                    self.max_actors_count, ACTOR_CONCURRENT_COUNT_MAX
                ),
            });
        }

        if self.idle_timeout_ms < ACTOR_IDLE_TIMEOUT_MS_MIN
            || self.idle_timeout_ms > ACTOR_IDLE_TIMEOUT_MS_MAX
        {
            return Err(Error::InvalidConfiguration {
                field: "actor.idle_timeout_ms".into(),
                reason: format!(
                    "{} outside {}..={}",
                    self.idle_timeout_ms, ACTOR_IDLE_TIMEOUT_MS_MIN, ACTOR_IDLE_TIMEOUT_MS_MAX
                ),
            });
        }

        if self.mailbox_depth_max == 0 || self.mailbox_depth_max > MAILBOX_DEPTH_MAX {
            return Err(Error::InvalidConfiguration {
                field: "actor.mailbox_depth_max".into(),
                reason: format!("{} outside 1..={}", self.mailbox_depth_max, MAILBOX_DEPTH_MAX),
            });
        }

        Ok(())
    }
}

/// Connection and broadcast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Undelivered events buffered per connection before it is dropped
    #[serde(default = "default_event_buffer")]
    pub event_buffer_count: usize,

    /// Maximum connections subscribed to one actor
    #[serde(default = "default_max_connections")]
    pub max_connections_per_actor: usize,
}

fn default_event_buffer() -> usize {
    CONNECTION_EVENT_BUFFER_COUNT_DEFAULT
}

fn default_max_connections() -> usize {
    CONNECTIONS_PER_ACTOR_COUNT_DEFAULT
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            event_buffer_count: default_event_buffer(),
            max_connections_per_actor: default_max_connections(),
        }
    }
}

impl ConnectionConfig {
    fn validate(&self) -> Result<()> {
        if self.event_buffer_count == 0
            || self.event_buffer_count > CONNECTION_EVENT_BUFFER_COUNT_MAX
        {
            return Err(Error::InvalidConfiguration {
                field: "connection.event_buffer_count".into(),
                reason: format!(
                    "{} outside 1..={}",
                    self.event_buffer_count, CONNECTION_EVENT_BUFFER_COUNT_MAX
                ),
            });
        }

        if self.max_connections_per_actor == 0
            || self.max_connections_per_actor > CONNECTIONS_PER_ACTOR_COUNT_MAX
        {
            return Err(Error::InvalidConfiguration {
                field: "connection.max_connections_per_actor".into(),
                reason: format!(
                    "{} outside 1..={}",
                    self.max_connections_per_actor, CONNECTIONS_PER_ACTOR_COUNT_MAX
                ),
            });
        }

        Ok(())
    }
}

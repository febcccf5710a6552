//! Error types for Stagehand
//!
//! TigerStyle: Explicit error types with context, using thiserror.
//!
//! Two layers:
//! - [`Error`] is the internal taxonomy used across crates and inside action
//!   handlers. It may carry storage keys, serde messages and other details.
//! - [`ActionError`] is what a caller sees. It is produced only through
//!   [`Error::into_action_error`], which redacts everything that is not
//!   meant for the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result type alias for Stagehand operations
pub type Result<T> = std::result::Result<T, Error>;

/// Code carried by every redacted internal failure
pub const CODE_INTERNAL_ERROR: &str = "internal_error";
/// Code for calls to an action the actor type does not register
pub const CODE_UNKNOWN_ACTION: &str = "unknown_action";
/// Code for resolves of an actor type the runtime does not know
pub const CODE_UNKNOWN_ACTOR_TYPE: &str = "unknown_actor_type";
/// Code for malformed actor keys or type names
pub const CODE_INVALID_ACTOR_KEY: &str = "invalid_actor_key";
/// Code for argument payloads a typed handler could not decode
pub const CODE_INVALID_ARGUMENTS: &str = "invalid_arguments";
/// Code for failed hydration of an actor instance
pub const CODE_INSTANCE_CREATION_ERROR: &str = "instance_creation_error";
/// Code for state that could not be made durable after a call
pub const CODE_PERSISTENCE_ERROR: &str = "persistence_error";
/// Code for inline calls that would wait on their own call chain
pub const CODE_REENTRANT_CALL: &str = "reentrant_call";
/// Code for calls rejected by a full mailbox
pub const CODE_MAILBOX_FULL: &str = "mailbox_full";
/// Code for connections rejected by the per-actor limit
pub const CODE_TOO_MANY_CONNECTIONS: &str = "too_many_connections";
/// Code for calls whose caller stopped waiting
pub const CODE_TIMEOUT: &str = "timeout";
/// Code for calls made while the runtime is stopping
pub const CODE_SHUTTING_DOWN: &str = "shutting_down";

// =============================================================================
// UserError
// =============================================================================

/// Error raised deliberately by an action handler for its caller
///
/// Message, code and metadata reach the caller unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl UserError {
    /// Create a user error with only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            metadata: None,
        }
    }

    /// Attach a machine-readable code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach structured metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for UserError {}

// =============================================================================
// ActionError
// =============================================================================

/// The single terminal error a caller observes for a failed action call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ActionError {
    fn coded(code: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.to_string()),
            metadata: None,
        }
    }

    /// The error code, if any
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// True when the code equals `code`
    pub fn is(&self, code: &str) -> bool {
        self.code() == Some(code)
    }
}

impl From<UserError> for ActionError {
    fn from(err: UserError) -> Self {
        Self {
            message: err.message,
            code: err.code,
            metadata: err.metadata,
        }
    }
}

// =============================================================================
// Error
// =============================================================================

/// Stagehand error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Caller Errors (propagate verbatim)
    // =========================================================================
    #[error("user error: {0}")]
    User(UserError),

    #[error("Unknown actor type: {actor_type}")]
    UnknownActorType { actor_type: String },

    #[error("Unknown action: {actor_type}.{action}")]
    UnknownAction { actor_type: String, action: String },

    #[error("Invalid actor ID: {id}, reason: {reason}")]
    InvalidActorId { id: String, reason: String },

    #[error("Invalid arguments for action {action}: {reason}")]
    InvalidArguments { action: String, reason: String },

    /// An error returned by an inline call to another actor, already redacted
    #[error("remote action failed: {0}")]
    Remote(ActionError),

    // =========================================================================
    // Actor Errors
    // =========================================================================
    #[error("Actor instance creation failed: {id}, reason: {reason}")]
    InstanceCreationFailed { id: String, reason: String },

    #[error("Actor state persistence failed: {id}, reason: {reason}")]
    PersistenceFailed { id: String, reason: String },

    #[error("Reentrant call: {id}.{action} is already on the call chain")]
    ReentrantCall { id: String, action: String },

    #[error("Actor mailbox full: {id}, depth: {depth}, max: {max}")]
    MailboxFull {
        id: String,
        depth: usize,
        max: usize,
    },

    #[error("Actor connection limit reached: {id}, max: {max}")]
    TooManyConnections { id: String, max: usize },

    #[error("Maximum live actor count reached: {max}")]
    ActorCapacityExceeded { max: usize },

    #[error("Action timed out: {action} after {timeout_ms}ms")]
    ActionTimedOut { action: String, timeout_ms: u64 },

    #[error("Actor state too large: {size} bytes exceeds limit of {limit} bytes")]
    StateTooLarge { size: usize, limit: usize },

    #[error("Runtime is shutting down")]
    ShuttingDown,

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Storage read failed: {key}, reason: {reason}")]
    StorageReadFailed { key: String, reason: String },

    #[error("Storage write failed: {key}, reason: {reason}")]
    StorageWriteFailed { key: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<UserError> for Error {
    fn from(err: UserError) -> Self {
        Self::User(err)
    }
}

impl From<ActionError> for Error {
    fn from(err: ActionError) -> Self {
        Self::Remote(err)
    }
}

impl Error {
    /// Create a user error with a message and code
    pub fn user(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::User(UserError::new(message).with_code(code))
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Create an instance creation error
    pub fn instance_creation_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstanceCreationFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PersistenceFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage write failed error
    pub fn storage_write_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageWriteFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage read failed error
    pub fn storage_read_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageReadFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// The code the caller will observe for this error
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::User(user) => user.code.as_deref(),
            Self::Remote(remote) => remote.code(),
            Self::UnknownActorType { .. } => Some(CODE_UNKNOWN_ACTOR_TYPE),
            Self::UnknownAction { .. } => Some(CODE_UNKNOWN_ACTION),
            Self::InvalidActorId { .. } => Some(CODE_INVALID_ACTOR_KEY),
            Self::InvalidArguments { .. } => Some(CODE_INVALID_ARGUMENTS),
            Self::InstanceCreationFailed { .. } => Some(CODE_INSTANCE_CREATION_ERROR),
            Self::PersistenceFailed { .. } => Some(CODE_PERSISTENCE_ERROR),
            Self::ReentrantCall { .. } => Some(CODE_REENTRANT_CALL),
            Self::MailboxFull { .. } => Some(CODE_MAILBOX_FULL),
            Self::TooManyConnections { .. } => Some(CODE_TOO_MANY_CONNECTIONS),
            Self::ActionTimedOut { .. } => Some(CODE_TIMEOUT),
            Self::ShuttingDown => Some(CODE_SHUTTING_DOWN),
            _ => Some(CODE_INTERNAL_ERROR),
        }
    }

    /// Whether the caller loses detail when this error is converted
    ///
    /// Redacted errors are reported on the operator diagnostics channel.
    pub fn is_redacted(&self) -> bool {
        !matches!(
            self,
            Self::User(_)
                | Self::Remote(_)
                | Self::UnknownActorType { .. }
                | Self::UnknownAction { .. }
                | Self::InvalidActorId { .. }
                | Self::InvalidArguments { .. }
                | Self::ReentrantCall { .. }
                | Self::MailboxFull { .. }
                | Self::TooManyConnections { .. }
                | Self::ActionTimedOut { .. }
                | Self::ShuttingDown
        )
    }

    /// Convert into the caller-facing shape
    ///
    /// User and remote errors pass through unchanged. Storage and hydration
    /// failures keep only their code. Everything else collapses to
    /// `internal_error` with no metadata.
    pub fn into_action_error(self) -> ActionError {
        match self {
            Self::User(user) => user.into(),
            Self::Remote(remote) => remote,
            Self::InstanceCreationFailed { .. } => ActionError::coded(
                CODE_INSTANCE_CREATION_ERROR,
                "actor instance could not be created",
            ),
            Self::PersistenceFailed { .. } => ActionError::coded(
                CODE_PERSISTENCE_ERROR,
                "actor state could not be persisted",
            ),
            err if err.is_redacted() => {
                ActionError::coded(CODE_INTERNAL_ERROR, "internal error")
            }
            err => {
                let code = err.code().unwrap_or(CODE_INTERNAL_ERROR).to_string();
                ActionError {
                    message: err.to_string(),
                    code: Some(code),
                    metadata: None,
                }
            }
        }
    }
}

//! TigerStyle constants for Stagehand
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Actor Identity Limits
// =============================================================================

/// Maximum length of an actor type name in bytes
pub const ACTOR_TYPE_LENGTH_BYTES_MAX: usize = 128;

/// Maximum number of tags in an actor key
pub const ACTOR_KEY_TAGS_COUNT_MAX: usize = 16;

/// Maximum length of a single string key tag in bytes
pub const ACTOR_KEY_TAG_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of an action name in bytes
pub const ACTION_NAME_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of an event name in bytes
pub const EVENT_NAME_LENGTH_BYTES_MAX: usize = 128;

// =============================================================================
// Actor Runtime Limits
// =============================================================================

/// Maximum size of an encoded actor state snapshot in bytes (10 MB)
pub const ACTOR_STATE_SIZE_BYTES_MAX: usize = 10 * 1024 * 1024;

/// Default idle timeout before an unused actor is evicted in milliseconds (5 min)
pub const ACTOR_IDLE_TIMEOUT_MS_DEFAULT: u64 = 5 * 60 * 1000;

/// Minimum idle timeout in milliseconds
pub const ACTOR_IDLE_TIMEOUT_MS_MIN: u64 = 10;

/// Maximum idle timeout in milliseconds (24 hours)
pub const ACTOR_IDLE_TIMEOUT_MS_MAX: u64 = 24 * 60 * 60 * 1000;

/// Maximum number of live actor instances per runtime
pub const ACTOR_CONCURRENT_COUNT_MAX: usize = 1_000_000;

/// Default number of live actor instances per runtime
pub const ACTOR_CONCURRENT_COUNT_DEFAULT: usize = 100_000;

/// Maximum depth of an actor's mailbox
pub const MAILBOX_DEPTH_MAX: usize = 10_000;

/// Default depth of an actor's mailbox
pub const MAILBOX_DEPTH_DEFAULT: usize = 1_024;

/// Maximum length of an inline call chain (A calls B calls C ...)
pub const CALL_CHAIN_DEPTH_MAX: usize = 32;

// =============================================================================
// Connection Limits
// =============================================================================

/// Maximum number of connections subscribed to a single actor
pub const CONNECTIONS_PER_ACTOR_COUNT_MAX: usize = 100_000;

/// Default number of connections subscribed to a single actor
pub const CONNECTIONS_PER_ACTOR_COUNT_DEFAULT: usize = 10_000;

/// Maximum number of undelivered events buffered per connection
pub const CONNECTION_EVENT_BUFFER_COUNT_MAX: usize = 65_536;

/// Default number of undelivered events buffered per connection
pub const CONNECTION_EVENT_BUFFER_COUNT_DEFAULT: usize = 256;

// =============================================================================
// Diagnostics
// =============================================================================

/// Capacity of the operator diagnostics broadcast channel
pub const DIAGNOSTICS_CHANNEL_CAPACITY_COUNT: usize = 1_024;

// =============================================================================
// Observability - Metric Names (TigerStyle: explicit, with units)
// =============================================================================

/// Metric: Total number of actor activations (counter, labels: actor_type)
pub const METRIC_NAME_ACTORS_ACTIVATED_TOTAL: &str = "stagehand_actors_activated_total";

/// Metric: Total number of actor evictions (counter, labels: actor_type)
pub const METRIC_NAME_ACTORS_EVICTED_TOTAL: &str = "stagehand_actors_evicted_total";

/// Metric: Total number of actions (counter, labels: action, status)
pub const METRIC_NAME_ACTIONS_TOTAL: &str = "stagehand_actions_total";

/// Metric: Action duration in seconds (histogram, labels: action)
pub const METRIC_NAME_ACTION_DURATION_SECONDS: &str = "stagehand_action_duration_seconds";

/// Metric: Total number of broadcast events delivered (counter)
pub const METRIC_NAME_EVENTS_DELIVERED_TOTAL: &str = "stagehand_events_delivered_total";

/// Metric: Storage operation duration in seconds (histogram, labels: operation)
pub const METRIC_NAME_STORAGE_DURATION_SECONDS: &str = "stagehand_storage_duration_seconds";

/// Metric: Total storage operations (counter, labels: operation, status)
pub const METRIC_NAME_STORAGE_OPERATIONS_TOTAL: &str = "stagehand_storage_operations_total";

// Compile-time assertions for constant validity
const _: () = {
    assert!(ACTOR_TYPE_LENGTH_BYTES_MAX >= 32);
    assert!(ACTOR_IDLE_TIMEOUT_MS_MIN < ACTOR_IDLE_TIMEOUT_MS_DEFAULT);
    assert!(ACTOR_IDLE_TIMEOUT_MS_DEFAULT <= ACTOR_IDLE_TIMEOUT_MS_MAX);
    assert!(MAILBOX_DEPTH_DEFAULT <= MAILBOX_DEPTH_MAX);
    assert!(ACTOR_CONCURRENT_COUNT_DEFAULT <= ACTOR_CONCURRENT_COUNT_MAX);
    assert!(CONNECTIONS_PER_ACTOR_COUNT_DEFAULT <= CONNECTIONS_PER_ACTOR_COUNT_MAX);
    assert!(CONNECTION_EVENT_BUFFER_COUNT_DEFAULT <= CONNECTION_EVENT_BUFFER_COUNT_MAX);
    assert!(CALL_CHAIN_DEPTH_MAX >= 2);
};

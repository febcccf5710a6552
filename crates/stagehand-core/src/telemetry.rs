//! Telemetry and observability infrastructure
//!
//! TigerStyle: Explicit telemetry configuration with bounded resource usage.
//!
//! Installs a `tracing` subscriber with an env filter and a fmt layer.
//! With the `otel` feature, also sets up a Prometheus-backed meter provider
//! for the instruments in [`crate::metrics`].

use crate::error::{Error, Result};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to metrics
    pub service_name: String,
    /// Log level filter, used when `RUST_LOG` is not set
    pub log_level: String,
    /// Whether to write log records to stdout
    pub stdout_enabled: bool,
    /// Emit log records as JSON lines
    pub json: bool,
    /// Whether to enable metrics collection
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "stagehand".to_string(),
            log_level: "info".to_string(),
            stdout_enabled: true,
            json: false,
            metrics_enabled: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Emit JSON log lines
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Disable stdout logging
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Enable metrics collection
    pub fn with_metrics(mut self) -> Self {
        self.metrics_enabled = true;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `STAGEHAND_SERVICE_NAME`: Service name (default: "stagehand")
    /// - `RUST_LOG`: Log level filter (default: "info")
    /// - `STAGEHAND_LOG_JSON`: Emit JSON logs (default: false)
    /// - `METRICS_ENABLED`: Enable metrics collection (default: false)
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("STAGEHAND_SERVICE_NAME").unwrap_or_else(|_| "stagehand".to_string());

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let json = std::env::var("STAGEHAND_LOG_JSON")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        let metrics_enabled = std::env::var("METRICS_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        Self {
            service_name,
            log_level,
            stdout_enabled: true,
            json,
            metrics_enabled,
        }
    }
}

/// Guard returned by [`init_telemetry`]; keep it alive for the process
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    metrics_registry: Option<prometheus::Registry>,
}

impl TelemetryGuard {
    /// Prometheus registry holding exported metrics, when enabled
    #[cfg(feature = "otel")]
    pub fn metrics_registry(&self) -> Option<&prometheus::Registry> {
        self.metrics_registry.as_ref()
    }
}

/// Initialize logging (and metrics with the `otel` feature)
///
/// # Example
///
/// ```rust,ignore
/// use stagehand_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(TelemetryConfig::new("chat").with_json())?;
/// ```
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let plain_layer =
        (config.stdout_enabled && !config.json).then(|| tracing_subscriber::fmt::layer());
    let json_layer =
        (config.stdout_enabled && config.json).then(|| tracing_subscriber::fmt::layer().json());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(plain_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| Error::Internal {
            reason: format!("failed to initialize tracing subscriber: {}", e),
        })?;

    tracing::info!(
        service = %config.service_name,
        json = config.json,
        "Telemetry initialized"
    );

    #[cfg(feature = "otel")]
    {
        let metrics_registry = init_metrics(&config)?;
        Ok(TelemetryGuard { metrics_registry })
    }

    #[cfg(not(feature = "otel"))]
    {
        if config.metrics_enabled {
            tracing::warn!("metrics requested but the `otel` feature is disabled");
        }
        Ok(TelemetryGuard {})
    }
}

/// Initialize Prometheus metrics
///
/// Returns a Registry that can be scraped by whatever serves `/metrics`.
#[cfg(feature = "otel")]
fn init_metrics(config: &TelemetryConfig) -> Result<Option<prometheus::Registry>> {
    if !config.metrics_enabled {
        return Ok(None);
    }

    use opentelemetry_sdk::metrics::MeterProviderBuilder;
    use opentelemetry_sdk::Resource;

    let registry = prometheus::Registry::new();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .map_err(|e| Error::Internal {
            reason: format!("failed to create Prometheus exporter: {}", e),
        })?;

    let resource = Resource::new(vec![opentelemetry::KeyValue::new(
        "service.name",
        config.service_name.clone(),
    )]);

    let provider = MeterProviderBuilder::default()
        .with_resource(resource)
        .with_reader(exporter)
        .build();

    opentelemetry::global::set_meter_provider(provider);

    tracing::info!(service = %config.service_name, "Metrics initialized");

    Ok(Some(registry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "stagehand");
        assert_eq!(config.log_level, "info");
        assert!(config.stdout_enabled);
        assert!(!config.json);
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("chat-service")
            .with_log_level("debug")
            .with_json()
            .with_metrics();

        assert_eq!(config.service_name, "chat-service");
        assert_eq!(config.log_level, "debug");
        assert!(config.json);
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_second_init_fails() {
        let first = init_telemetry(TelemetryConfig::default().without_stdout());
        let second = init_telemetry(TelemetryConfig::default().without_stdout());
        // Another test binary thread may have installed one first; at most one wins.
        assert!(first.is_err() || second.is_err());
    }
}

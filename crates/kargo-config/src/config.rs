//! Main configuration type.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{AuthorizationConfig, ConfigError, LoggingConfig, MetricsConfig, ServerConfig};

/// Complete Kargo API configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use kargo_config::ApiConfig;
///
/// let config = ApiConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert!(!config.authorization.skip_authorization);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Authorization configuration.
    #[serde(default)]
    pub authorization: AuthorizationConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ApiConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The server address is not a socket address
    /// - Authorization is skipped while binding to a non-loopback address
    /// - A global service account namespace is blank or has surrounding
    ///   whitespace
    /// - The log filter directives do not parse
    /// - Metrics are enabled without latency buckets
    pub fn validate(&self) -> Result<(), ConfigError> {
        let addr: SocketAddr = self.server.http_addr.parse().map_err(|_| {
            ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            )
        })?;

        if self.authorization.skip_authorization && !addr.ip().is_loopback() {
            return Err(ConfigError::validation_error(format!(
                "authorization.skip_authorization requires a loopback server address, got {addr}"
            )));
        }

        if self
            .authorization
            .global_service_account_namespaces
            .iter()
            .any(|ns| ns.trim().is_empty())
        {
            return Err(ConfigError::invalid_value(
                "authorization.global_service_account_namespaces",
                "namespace names must not be empty",
            ));
        }

        if let Some(ns) = self
            .authorization
            .global_service_account_namespaces
            .iter()
            .find(|ns| ns.trim() != ns.as_str())
        {
            return Err(ConfigError::invalid_value(
                "authorization.global_service_account_namespaces",
                format!("namespace name {ns:?} has surrounding whitespace"),
            ));
        }

        if self.logging.enabled {
            if let Err(err) = kargo_telemetry::logging::create_env_filter(&self.logging.level) {
                return Err(ConfigError::invalid_value("logging.level", err.to_string()));
            }
        }

        if self.metrics.enabled && self.metrics.review_duration_buckets.is_empty() {
            return Err(ConfigError::invalid_value(
                "metrics.review_duration_buckets",
                "at least one bucket is required",
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Binds to loopback, skips authorization and logs pretty debug output.
    ///
    /// # Example
    ///
    /// ```
    /// use kargo_config::ApiConfig;
    ///
    /// let config = ApiConfig::development();
    /// assert!(config.authorization.skip_authorization);
    /// assert!(config.validate().is_ok());
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.server.http_addr = "127.0.0.1:8080".to_string();
        config.authorization.skip_authorization = true;
        config.logging.level = "debug".to_string();
        config.logging.format = kargo_telemetry::LogFormat::Pretty;
        config.logging.span_events = true;
        config.logging.file_line_info = true;
        config
    }

    /// Create a production configuration preset.
    ///
    /// # Example
    ///
    /// ```
    /// use kargo_config::ApiConfig;
    ///
    /// let config = ApiConfig::production();
    /// assert_eq!(config.logging.format, kargo_telemetry::LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.logging.level = "info".to_string();
        config.logging.format = kargo_telemetry::LogFormat::Json;
        config
    }

    /// Options for building a `kargo_authz::AuthorizingClient`.
    pub fn client_options(&self) -> kargo_authz::ClientOptions {
        self.authorization.client_options()
    }

    /// Telemetry settings for `kargo_telemetry::init_telemetry`.
    pub fn telemetry_config(&self) -> kargo_telemetry::TelemetryConfig {
        kargo_telemetry::TelemetryConfig {
            logging: self.logging.log_config(),
            metrics: self.metrics.metrics_config(),
        }
    }
}

//! Configuration schema types.

use kargo_telemetry::LogFormat;
use serde::{Deserialize, Deserializer, Serialize};

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// API server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Authorization configuration section.
///
/// # Example
///
/// ```
/// use kargo_config::AuthorizationConfig;
///
/// let config = AuthorizationConfig {
///     skip_authorization: false,
///     global_service_account_namespaces: vec!["kargo-shared".to_string()],
/// };
/// assert_eq!(config.client_options().global_service_account_namespaces.len(), 1);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthorizationConfig {
    /// Perform every operation with the API server's own credential.
    /// Only accepted when the server binds to a loopback address.
    #[serde(default)]
    pub skip_authorization: bool,

    /// Namespaces searched for caller service accounts after the target
    /// object's own namespace, in order. Surrounding whitespace is trimmed
    /// when the section is deserialized.
    #[serde(default, deserialize_with = "trimmed_names")]
    pub global_service_account_namespaces: Vec<String>,
}

fn trimmed_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    Ok(names.into_iter().map(|ns| ns.trim().to_string()).collect())
}

impl AuthorizationConfig {
    /// Options for building a `kargo_authz::AuthorizingClient`.
    pub fn client_options(&self) -> kargo_authz::ClientOptions {
        kargo_authz::ClientOptions {
            skip_authorization: self.skip_authorization,
            global_service_account_namespaces: self
                .global_service_account_namespaces
                .iter()
                .map(|ns| ns.trim().to_string())
                .collect(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directives (e.g. "info", "info,kargo_authz=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Log span open and close events.
    #[serde(default)]
    pub span_events: bool,

    /// Include file and line in log lines.
    #[serde(default)]
    pub file_line_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::Json,
            span_events: false,
            file_line_info: false,
        }
    }
}

impl LoggingConfig {
    /// The equivalent `kargo_telemetry::LogConfig`.
    pub fn log_config(&self) -> kargo_telemetry::LogConfig {
        kargo_telemetry::LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            format: self.format,
            span_events: self.span_events,
            file_line_info: self.file_line_info,
            include_target: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable the Prometheus recorder.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Access review latency buckets, in seconds.
    #[serde(default = "default_review_buckets")]
    pub review_duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            review_duration_buckets: default_review_buckets(),
        }
    }
}

impl MetricsConfig {
    /// The equivalent `kargo_telemetry::MetricsConfig`.
    pub fn metrics_config(&self) -> kargo_telemetry::MetricsConfig {
        kargo_telemetry::MetricsConfig {
            enabled: self.enabled,
            review_duration_buckets: self.review_duration_buckets.clone(),
        }
    }
}

fn default_review_buckets() -> Vec<f64> {
    kargo_telemetry::MetricsConfig::default().review_duration_buckets
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        assert_eq!(ServerConfig::default().http_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_client_options_keep_order() {
        let config = AuthorizationConfig {
            skip_authorization: true,
            global_service_account_namespaces: vec![
                "kargo".to_string(),
                " shared ".to_string(),
                "kargo".to_string(),
            ],
        };
        let options = config.client_options();
        assert!(options.skip_authorization);
        let namespaces: Vec<&str> = options
            .global_service_account_namespaces
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(namespaces, ["kargo", "shared"]);
    }

    #[test]
    fn test_namespaces_trimmed_on_deserialize() {
        let config: AuthorizationConfig =
            toml::from_str(r#"global_service_account_namespaces = [" kargo ", "shared\t"]"#)
                .unwrap();
        assert_eq!(config.global_service_account_namespaces, ["kargo", "shared"]);

        let config: AuthorizationConfig = serde_json::from_str(r#"{"skip_authorization": true}"#).unwrap();
        assert!(config.global_service_account_namespaces.is_empty());
    }

    #[test]
    fn test_log_config_conversion() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            ..LoggingConfig::default()
        };
        let log = logging.log_config();
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Pretty);
        assert!(log.enabled);
    }

    #[test]
    fn test_metrics_defaults_match_telemetry() {
        assert_eq!(
            MetricsConfig::default().metrics_config(),
            kargo_telemetry::MetricsConfig::default()
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<LoggingConfig, _> = toml::from_str("colour = true");
        assert!(result.is_err());
    }
}

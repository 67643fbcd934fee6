//! Typed configuration for the Kargo API authorization core.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict parsing (unknown fields are rejected)
//! - Layered configuration (defaults → file → env)
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//!
//! [authorization]
//! skip_authorization = false
//! global_service_account_namespaces = ["kargo-shared"]
//!
//! [logging]
//! level = "info,kargo_authz=debug"
//! format = "json"
//!
//! [metrics]
//! enabled = true
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `KARGO__SERVER__HTTP_ADDR=127.0.0.1:8080`
//! - `KARGO__AUTHORIZATION__SKIP_AUTHORIZATION=true`
//! - `KARGO__AUTHORIZATION__GLOBAL_SERVICE_ACCOUNT_NAMESPACES=kargo,kargo-shared`
//! - `KARGO__LOGGING__FORMAT=pretty`

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::ApiConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{AuthorizationConfig, LoggingConfig, MetricsConfig, ServerConfig};

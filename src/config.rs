//! Configuration management for the congestion gate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::congestion::{OperationName, RateLimitPolicy};
use crate::error::{CongestionError, Result};

/// Prefix for environment overrides, e.g. `CCGATE_SERVER__GRPC_ADDR`.
pub const ENV_PREFIX: &str = "CCGATE";

/// Main configuration for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Congestion control configuration
    #[serde(default)]
    pub congestion: CongestionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address of the gated application listener
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,

    /// Address of the admin listener
    #[serde(default = "default_admin_addr")]
    pub admin_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            admin_addr: default_admin_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Congestion control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionConfig {
    /// Operations never shed, as full gRPC paths (`/package.Service/Method`)
    #[serde(default = "default_exempt_operations")]
    pub exempt_operations: Vec<String>,

    /// Whether the limit is engaged at startup
    #[serde(default)]
    pub enabled: bool,

    /// Startup limit; only meaningful when `enabled`
    #[serde(default)]
    pub max_requests_per_second: Option<u32>,

    /// How long control callers wait for an update to be acknowledged
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            exempt_operations: default_exempt_operations(),
            enabled: false,
            max_requests_per_second: None,
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

fn default_exempt_operations() -> Vec<String> {
    vec!["/samples.api.GreeterService/Ping".to_string()]
}

fn default_ack_timeout_ms() -> u64 {
    1000
}

impl CongestionConfig {
    pub fn exempt_operations(&self) -> BTreeSet<OperationName> {
        self.exempt_operations
            .iter()
            .map(|op| OperationName::new(op.as_str()))
            .collect()
    }

    /// The policy the server starts with.
    pub fn initial_policy(&self) -> Result<RateLimitPolicy> {
        let policy = RateLimitPolicy {
            enabled: self.enabled,
            max_requests_per_second: self.max_requests_per_second,
            exempt_operations: self.exempt_operations(),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from an optional file, layered under environment
    /// variables prefixed with [`ENV_PREFIX`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("congestion.exempt_operations"),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.congestion.initial_policy()?;
        Ok(app)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let app: AppConfig = serde_yaml::from_str(yaml)
            .map_err(|e| CongestionError::Config(format!("Failed to parse config: {}", e)))?;
        app.congestion.initial_policy()?;
        Ok(app)
    }
}

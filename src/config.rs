use crate::messaging::StreamConfig;
use serde::{Deserialize, Serialize};

/// Profile used when `RELAY_PROFILE` is not set
pub const DEFAULT_PROFILE: &str = "kafka";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Binders and channel bindings
    #[serde(default)]
    pub stream: StreamConfig,
}

impl Config {
    /// Load configuration for the profile named by `RELAY_PROFILE`
    pub fn load() -> Result<Self, config::ConfigError> {
        let profile = std::env::var("RELAY_PROFILE").unwrap_or_else(|_| DEFAULT_PROFILE.to_string());
        Self::load_profile(&profile)
    }

    /// Load configuration from built-in defaults, the profile file and environment.
    ///
    /// Later sources override earlier ones: `config/default.toml` (compiled in),
    /// `config/<profile>.toml`, the file named by `RELAY_CONFIG`, then
    /// `RELAY__*` environment variables.
    pub fn load_profile(profile: &str) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name(&format!("config/{}", profile)).required(false));

        // Override with config file if one is named
        if let Ok(path) = std::env::var("RELAY_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        builder
            // Override with environment variables (prefix: RELAY__)
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Load configuration from a single file on top of the built-in defaults
    pub fn from_file(path: &std::path::Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            observability: ObservabilityConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

//! Configuration management.

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Plugin runtime configuration
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Plugin artifact store configuration
    #[serde(default)]
    pub filestore: FileStoreConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
        }
    }
}

/// Plugin runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginsConfig {
    /// Artifact filenames loaded unconditionally at startup
    #[serde(default)]
    pub autoload: Vec<String>,

    /// Per-request timeout for plugin HTTP handlers, in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Maximum request body size forwarded into a plugin, in bytes
    #[serde(default = "default_http_max_body_bytes")]
    pub http_max_body_bytes: usize,

    /// Per-call timeout for plugin event handlers, in seconds
    #[serde(default = "default_event_call_timeout_secs")]
    pub event_call_timeout_secs: u64,

    /// Response body cap for the HTTP egress capability, in bytes
    #[serde(default = "default_egress_max_body_bytes")]
    pub egress_max_body_bytes: usize,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            autoload: Vec::new(),
            http_timeout_secs: default_http_timeout_secs(),
            http_max_body_bytes: default_http_max_body_bytes(),
            event_call_timeout_secs: default_event_call_timeout_secs(),
            egress_max_body_bytes: default_egress_max_body_bytes(),
        }
    }
}

/// Plugin artifact store configuration.
///
/// The DSN selects the flavour: `local:<path>` for the filesystem store,
/// `s3://<access>:<secret>@<endpoint>/<bucket>?ssl=<bool>` for the object store.
#[derive(Debug, Clone, Deserialize)]
pub struct FileStoreConfig {
    #[serde(default = "default_filestore_dsn")]
    pub dsn: String,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            dsn: default_filestore_dsn(),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for bearer JWTs
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwt_secret: None }
    }
}

impl Config {
    /// Load configuration from `config/default.toml`, an optional
    /// environment-specific file, and `GSHUB_`-prefixed environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_env = std::env::var("GSHUB_ENV").unwrap_or_else(|_| "development".into());

        config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", run_env)).required(false))
            .add_source(config::Environment::with_prefix("GSHUB").separator("__"))
            .build()?
            .try_deserialize()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8025
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_filestore_dsn() -> String {
    "local:plugins".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_http_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_event_call_timeout_secs() -> u64 {
    30
}

fn default_egress_max_body_bytes() -> usize {
    5 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugins_defaults() {
        let cfg = PluginsConfig::default();
        assert_eq!(cfg.http_timeout_secs, 30);
        assert_eq!(cfg.http_max_body_bytes, 1024 * 1024);
        assert!(cfg.autoload.is_empty());
    }

    #[test]
    fn test_server_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8025);
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Port for the WebSocket + health API
    #[serde(default = "default_port")]
    pub port: u16,
    /// Unresolved predictions pushed to a freshly connected agent
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: i64,
    /// Seconds of read silence before the server pings a connection
    #[serde(default = "default_idle_ping_secs")]
    pub idle_ping_secs: u64,
}

fn default_port() -> u16 {
    8765
}

fn default_snapshot_limit() -> i64 {
    50
}

fn default_idle_ping_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            snapshot_limit: default_snapshot_limit(),
            idle_ping_secs: default_idle_ping_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Shared token agents must present at connect time. When unset,
    /// connections are accepted without a token (local development).
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Concurrent specialization lookups per fan-out
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
}

fn default_max_concurrent_lookups() -> usize {
    crate::broadcast::DEFAULT_MAX_CONCURRENT_LOOKUPS
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_concurrent_lookups: default_max_concurrent_lookups(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a directory: `default.toml`, then the
    /// `TRUSTSWARM_ENV`-named file, then environment overrides
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("server.port", default_port() as i64)?
            .set_default("server.snapshot_limit", default_snapshot_limit())?
            .set_default("server.idle_ping_secs", default_idle_ping_secs() as i64)?
            .set_default("database.max_connections", default_max_connections() as i64)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRUSTSWARM_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TRUSTSWARM_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("TRUSTSWARM")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI usage and tests
    pub fn default_config(database_url: &str) -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: database_url.to_string(),
                max_connections: default_max_connections(),
            },
            auth: AuthConfig::default(),
            broadcast: BroadcastConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.is_empty() {
            errors.push("database.url must be set".to_string());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be positive".to_string());
        }
        if self.server.snapshot_limit <= 0 {
            errors.push("server.snapshot_limit must be positive".to_string());
        }
        if self.server.idle_ping_secs == 0 {
            errors.push("server.idle_ping_secs must be positive".to_string());
        }
        if self.broadcast.max_concurrent_lookups == 0 {
            errors.push("broadcast.max_concurrent_lookups must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

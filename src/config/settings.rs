//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub dispatch: DispatchConfig,
    pub feed: FeedConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base used when building the `imageURL` of feed events
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    16384
}

fn default_public_url() -> String {
    "http://localhost:16384".to_string()
}

/// Generation server registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Heartbeat age after which a server stops being selectable
    #[serde(default = "default_server_timeout")]
    pub server_timeout_secs: u64,
    /// Jobs a single generation server accepts at once
    #[serde(default = "default_per_server_concurrency")]
    pub per_server_concurrency: usize,
    /// Endpoint returning `[{"url": ...}]`, fetched when no server is alive
    #[serde(default)]
    pub discovery_url: Option<String>,
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_ms: u64,
}

fn default_server_timeout() -> u64 {
    45
}

fn default_per_server_concurrency() -> usize {
    3
}

fn default_discovery_timeout() -> u64 {
    5000
}

/// Result cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Persist generated images to `dir`
    #[serde(default = "default_true")]
    pub persist: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    /// Completed records kept in memory before falling back to disk
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> String {
    "./cache".to_string()
}

fn default_memory_capacity() -> usize {
    512
}

/// Admission queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Generations allowed to run system-wide at once
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,
    /// In-flight job count above which per-client backpressure applies
    #[serde(default = "default_busy_threshold")]
    pub busy_threshold: usize,
    /// Client backlog at which the placeholder image is returned
    #[serde(default = "default_backlog_limit")]
    pub backlog_limit: usize,
    /// Delay per queued job of the same client
    #[serde(default = "default_backlog_delay")]
    pub backlog_delay_ms: u64,
    /// JPEG served when a client's queue is full; built-in image if unset
    #[serde(default)]
    pub placeholder_path: Option<String>,
}

fn default_global_concurrency() -> usize {
    4
}

fn default_busy_threshold() -> usize {
    2
}

fn default_backlog_limit() -> usize {
    8
}

fn default_backlog_delay() -> u64 {
    1000
}

/// Backend dispatch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * backoff_ms`
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_safety_delay")]
    pub safety_delay_secs: u64,
    /// Third-party provider serving the alternate model family
    #[serde(default)]
    pub alternate_url: Option<String>,
    #[serde(default)]
    pub alternate_api_key: Option<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> u64 {
    1000
}

fn default_timeout() -> u64 {
    120000
}

fn default_safety_delay() -> u64 {
    15
}

/// Feed broadcaster configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_replay_capacity() -> usize {
    20
}

fn default_channel_capacity() -> usize {
    256
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut builder = Config::builder()
            // Start with default values
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("server.public_url", default_public_url())?
            .set_default("registry.server_timeout_secs", default_server_timeout())?
            .set_default("registry.per_server_concurrency", default_per_server_concurrency() as u64)?
            .set_default("registry.discovery_timeout_ms", default_discovery_timeout())?
            .set_default("cache.persist", true)?
            .set_default("cache.dir", default_cache_dir())?
            .set_default("cache.memory_capacity", default_memory_capacity() as u64)?
            .set_default("queue.global_concurrency", default_global_concurrency() as u64)?
            .set_default("queue.busy_threshold", default_busy_threshold() as u64)?
            .set_default("queue.backlog_limit", default_backlog_limit() as u64)?
            .set_default("queue.backlog_delay_ms", default_backlog_delay())?
            .set_default("dispatch.max_attempts", default_max_attempts())?
            .set_default("dispatch.backoff_ms", default_backoff())?
            .set_default("dispatch.timeout_ms", default_timeout())?
            .set_default("dispatch.safety_delay_secs", default_safety_delay())?
            .set_default("feed.replay_capacity", default_replay_capacity() as u64)?
            .set_default("feed.channel_capacity", default_channel_capacity() as u64)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            // Load from configuration file
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with IMG_DISPATCH_)
            .add_source(
                Environment::with_prefix("IMG_DISPATCH")
                    .separator("__")
                    .try_parsing(true),
            );

        // The bare PORT variable wins over everything else
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port.trim().parse().map_err(|_| {
                AppError::Config(config::ConfigError::Message(format!("Invalid PORT value '{}'", port)))
            })?;
            builder = builder.set_override("server.port", port)?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }
        if self.registry.per_server_concurrency == 0 {
            return Err(invalid("registry.per_server_concurrency must be at least 1"));
        }
        if self.queue.global_concurrency == 0 {
            return Err(invalid("queue.global_concurrency must be at least 1"));
        }
        if self.queue.backlog_limit == 0 {
            return Err(invalid("queue.backlog_limit must be at least 1"));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(invalid("dispatch.max_attempts must be at least 1"));
        }
        if self.feed.channel_capacity == 0 {
            return Err(invalid("feed.channel_capacity must be at least 1"));
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(invalid(&format!(
                "Invalid log format '{}'. Must be 'json' or 'pretty'",
                self.logging.format
            )));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                public_url: default_public_url(),
            },
            registry: RegistryConfig {
                server_timeout_secs: default_server_timeout(),
                per_server_concurrency: default_per_server_concurrency(),
                discovery_url: None,
                discovery_timeout_ms: default_discovery_timeout(),
            },
            cache: CacheConfig {
                persist: true,
                dir: default_cache_dir(),
                memory_capacity: default_memory_capacity(),
            },
            queue: QueueConfig {
                global_concurrency: default_global_concurrency(),
                busy_threshold: default_busy_threshold(),
                backlog_limit: default_backlog_limit(),
                backlog_delay_ms: default_backlog_delay(),
                placeholder_path: None,
            },
            dispatch: DispatchConfig {
                max_attempts: default_max_attempts(),
                backoff_ms: default_backoff(),
                timeout_ms: default_timeout(),
                safety_delay_secs: default_safety_delay(),
                alternate_url: None,
                alternate_api_key: None,
            },
            feed: FeedConfig {
                replay_capacity: default_replay_capacity(),
                channel_capacity: default_channel_capacity(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
        }
    }
}

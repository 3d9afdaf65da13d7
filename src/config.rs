//! Configuration management for Turnstile.
//!
//! Settings are read once at startup from an optional YAML file and then the
//! process environment, environment winning. Raw values land in the flat
//! [`Settings`] struct, keyed by the lower-cased variable names
//! (`WINDOW_SECONDS` → `window_seconds`), and are validated into the
//! immutable [`TurnstileConfig`]. Nothing is re-read while serving.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{FailurePolicy, LimiterSettings};
use crate::store::MAX_TTL_SECS;

/// Raw settings as they appear in the environment or config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    #[serde(default)]
    pub store_backend: StoreBackend,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            max_requests: default_max_requests(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            failure_policy: FailurePolicy::default(),
            store_timeout_ms: default_store_timeout_ms(),
            store_backend: StoreBackend::default(),
            listen_addr: default_listen_addr(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_window_seconds() -> u64 {
    60
}

fn default_max_requests() -> u64 {
    3
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_store_timeout_ms() -> u64 {
    1000
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

/// Which counter store backs the limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server; required when running several instances.
    #[default]
    Redis,
    /// Process-local map, for development.
    Memory,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone)]
pub struct TurnstileConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Admission control configuration
    pub rate_limiting: RateLimitingConfig,

    /// Counter store configuration
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub listen_addr: SocketAddr,
}

/// Rate limiting configuration.
#[derive(Debug, Clone)]
pub struct RateLimitingConfig {
    /// Window length for every key's counter
    pub window_seconds: u64,

    /// Admits allowed per window
    pub max_requests: u64,

    /// What to decide when the counter store fails
    pub failure_policy: FailurePolicy,

    /// Deadline for each counter store call
    pub store_timeout: Duration,
}

impl RateLimitingConfig {
    pub fn limiter_settings(&self) -> LimiterSettings {
        LimiterSettings {
            window_seconds: self.window_seconds,
            max_requests: self.max_requests,
            failure_policy: self.failure_policy,
            store_timeout: self.store_timeout,
        }
    }
}

/// Counter store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,

    /// Bound on connecting and on each command's reply
    pub command_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            host: default_redis_host(),
            port: default_redis_port(),
            command_timeout: Duration::from_millis(default_store_timeout_ms()),
        }
    }
}

impl StoreConfig {
    /// Connection URL for the Redis backend.
    pub fn redis_url(&self) -> String {
        if self.host.contains(':') {
            format!("redis://[{}]:{}/", self.host, self.port)
        } else {
            format!("redis://{}:{}/", self.host, self.port)
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Copy)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration, reading variables from `env` instead of the
    /// process environment when given.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let settings: Settings = builder
            .add_source(Environment::default().try_parsing(true).source(env))
            .build()?
            .try_deserialize()?;

        Self::validate(settings)
    }

    /// Check ranges and split the flat settings into sections.
    pub fn validate(settings: Settings) -> Result<Self> {
        if settings.window_seconds == 0 {
            return Err(TurnstileError::Config(
                "WINDOW_SECONDS must be greater than zero".to_string(),
            ));
        }
        if settings.window_seconds > MAX_TTL_SECS {
            return Err(TurnstileError::Config(format!(
                "WINDOW_SECONDS must be at most {MAX_TTL_SECS}"
            )));
        }
        if settings.max_requests == 0 {
            return Err(TurnstileError::Config(
                "MAX_REQUESTS must be greater than zero".to_string(),
            ));
        }
        if settings.store_timeout_ms == 0 {
            return Err(TurnstileError::Config(
                "STORE_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        let store_timeout = Duration::from_millis(settings.store_timeout_ms);
        if settings.store_backend == StoreBackend::Redis {
            if settings.redis_host.trim().is_empty() {
                return Err(TurnstileError::Config("REDIS_HOST must not be empty".to_string()));
            }
            if settings.redis_port == 0 {
                return Err(TurnstileError::Config("REDIS_PORT must not be zero".to_string()));
            }
        }

        Ok(Self {
            server: ServerConfig {
                listen_addr: settings.listen_addr,
            },
            rate_limiting: RateLimitingConfig {
                window_seconds: settings.window_seconds,
                max_requests: settings.max_requests,
                failure_policy: settings.failure_policy,
                store_timeout,
            },
            store: StoreConfig {
                backend: settings.store_backend,
                host: settings.redis_host.trim().to_string(),
                port: settings.redis_port,
                command_timeout: store_timeout,
            },
            logging: LoggingConfig {
                format: settings.log_format,
            },
        })
    }
}

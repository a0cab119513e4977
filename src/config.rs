use clap::Parser;
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::rate_limit::{MAX_WINDOW_SECS, RateLimit};

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "token-gate")]
#[command(about = "Token checking, rate limiting gateway backed by Redis")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "TOKEN_GATE_PORT", default_value_t = 8080)]
    pub port: u16,

    // Upstream servers (comma-separated)
    // Example: "localhost:9000,localhost:9001"
    #[arg(short, long, env = "TOKEN_GATE_UPSTREAMS", default_value = "localhost:9000")]
    pub upstreams: String,

    // JSON config file, flags below override its values
    #[arg(short, long, env = "TOKEN_GATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "TOKEN_GATE_REDIS_HOST")]
    pub redis_host: Option<String>,

    #[arg(long, env = "TOKEN_GATE_REDIS_USERNAME")]
    pub redis_username: Option<String>,

    #[arg(long, env = "TOKEN_GATE_REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    #[arg(long, env = "TOKEN_GATE_REDIS_DB")]
    pub redis_db: Option<i64>,

    // Requests allowed per token per window, 0 disables limiting
    #[arg(long, env = "TOKEN_GATE_MAX_REQUEST_COUNT")]
    pub max_request_count: Option<u64>,

    // Window length in seconds
    #[arg(long, env = "TOKEN_GATE_TOKEN_REFRESH_TIME")]
    pub token_refresh_time: Option<u64>,

    // Prefix for counter keys in redis
    #[arg(long, env = "TOKEN_GATE_COUNTER_PREFIX")]
    pub counter_prefix: Option<String>,

    // Timeout for all store calls of one request, in milliseconds
    #[arg(long, env = "TOKEN_GATE_STORE_TIMEOUT_MS", default_value_t = 3000)]
    pub store_timeout_ms: u64,

    // Upstream health check interval in seconds
    #[arg(long, env = "TOKEN_GATE_HEALTH_INTERVAL", default_value_t = 30)]
    pub health_interval: u64,

    // Path probed on each upstream by the health checker
    #[arg(long, env = "TOKEN_GATE_HEALTH_PATH", default_value = "/")]
    pub health_path: String,

    // Largest request body forwarded upstream
    #[arg(long, env = "TOKEN_GATE_MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,

    // Keep tokens in process memory instead of redis (local development)
    #[arg(long)]
    pub memory_store: bool,

    // Token to load into the memory store, as TABLE=TOKEN, repeatable
    #[arg(long = "seed-token", value_name = "TABLE=TOKEN")]
    pub seed_tokens: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid redis settings: {0}")]
    Redis(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// Redis connection settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String, // host:port
    pub username: String,
    pub password: String,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:6379".to_string(),
            username: String::new(),
            password: String::new(),
            db: 0,
        }
    }
}

impl RedisConfig {
    /// Connection URL for the redis client. Credentials are percent-encoded.
    pub fn url(&self) -> Result<String, ConfigError> {
        let mut url = Url::parse(&format!("redis://{}", self.host))
            .map_err(|e| ConfigError::Redis(format!("bad host {:?}: {}", self.host, e)))?;

        if !self.username.is_empty() {
            url.set_username(&self.username)
                .map_err(|_| ConfigError::Redis("username not accepted".to_string()))?;
        }
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| ConfigError::Redis("password not accepted".to_string()))?;
        }
        url.set_path(&format!("/{}", self.db));

        Ok(url.to_string())
    }
}

/// Gate settings, as stored in the JSON config file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    pub redis: RedisConfig,
    pub max_request_count: u64,
    pub token_refresh_time: u64,
    pub counter_prefix: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            max_request_count: 100,
            token_refresh_time: 3600 * 24, // reset counts every day
            counter_prefix: String::new(),
        }
    }
}

impl GateConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// File (or defaults) first, then any CLI/env overrides, then validation.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, args: &Args) {
        if let Some(host) = &args.redis_host {
            self.redis.host = host.clone();
        }
        if let Some(username) = &args.redis_username {
            self.redis.username = username.clone();
        }
        if let Some(password) = &args.redis_password {
            self.redis.password = password.clone();
        }
        if let Some(db) = args.redis_db {
            self.redis.db = db;
        }
        if let Some(max) = args.max_request_count {
            self.max_request_count = max;
        }
        if let Some(window) = args.token_refresh_time {
            self.token_refresh_time = window;
        }
        if let Some(prefix) = &args.counter_prefix {
            self.counter_prefix = prefix.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_request_count > 0 && self.token_refresh_time == 0 {
            return Err(ConfigError::Invalid(
                "token_refresh_time must be positive when max_request_count is set".to_string(),
            ));
        }
        if self.token_refresh_time > MAX_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "token_refresh_time must be at most {} seconds, got {}",
                MAX_WINDOW_SECS, self.token_refresh_time
            )));
        }
        if self.redis.db < 0 {
            return Err(ConfigError::Invalid(format!(
                "redis db index must not be negative, got {}",
                self.redis.db
            )));
        }
        Ok(())
    }

    pub fn rate_limit(&self) -> RateLimit {
        RateLimit {
            max_request_count: self.max_request_count,
            window_secs: self.token_refresh_time,
            key_prefix: self.counter_prefix.clone(),
        }
    }
}

impl Args {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    // Parses every --seed-token into (table, token)
    pub fn seeds(&self) -> Result<Vec<(String, String)>, ConfigError> {
        self.seed_tokens
            .iter()
            .map(|seed| match seed.split_once('=') {
                Some((table, token)) if !table.is_empty() && !token.is_empty() => {
                    Ok((table.to_string(), token.to_string()))
                }
                _ => Err(ConfigError::Invalid(format!(
                    "seed token {seed:?} is not TABLE=TOKEN"
                ))),
            })
            .collect()
    }
}

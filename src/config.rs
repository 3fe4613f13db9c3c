//! Configuration management for the reminder service.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `5123`.
//! - `REMINDER_TICK_SECS` - Optional. Evaluator period in seconds. Defaults to `60`.
//! - `TASK_STORE_TIMEOUT_SECS` - Optional. Bound on each Task Store query. Defaults to `10`.
//! - `TASK_STORE` - Optional. `memory` or `sqlite`. Defaults to `sqlite`.
//! - `TASK_DB_PATH` - Optional. SQLite database path. Defaults to `./data/tasks.db`.
//! - `DEV_MODE` - Optional. When true, WebSocket clients identify with `?user_id=`. Defaults to `true`.
//! - `JWT_SECRET` - Required when `DEV_MODE` is false. Verifies WebSocket tokens.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::store::TaskStoreType;
use crate::util::env_var_bool;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Period of the reminder evaluator
    pub tick_interval: Duration,

    /// Bound on a single Task Store query
    pub store_timeout: Duration,

    /// Task Store backend
    pub task_store: TaskStoreType,

    /// SQLite database path (sqlite backend only)
    pub task_db_path: PathBuf,

    /// Trust `?user_id=` on the WebSocket instead of requiring a JWT
    pub dev_mode: bool,

    /// Secret for verifying WebSocket JWTs
    pub jwt_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparseable or zero durations and ports,
    /// and `ConfigError::MissingEnvVar` if `DEV_MODE` is off without a `JWT_SECRET`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "5123".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let tick_interval = duration_secs_from_env("REMINDER_TICK_SECS", 60)?;
        let store_timeout = duration_secs_from_env("TASK_STORE_TIMEOUT_SECS", 10)?;

        let task_store = std::env::var("TASK_STORE")
            .map(|s| TaskStoreType::from_str(&s))
            .unwrap_or_default();

        let task_db_path = std::env::var("TASK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/tasks.db"));

        let dev_mode = env_var_bool("DEV_MODE", true);
        let jwt_secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        if !dev_mode && jwt_secret.is_none() {
            return Err(ConfigError::MissingEnvVar("JWT_SECRET".to_string()));
        }

        Ok(Self {
            host,
            port,
            tick_interval,
            store_timeout,
            task_store,
            task_db_path,
            dev_mode,
            jwt_secret,
        })
    }

    /// Create a config with defaults and an in-memory store (useful for testing).
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5123,
            tick_interval: Duration::from_secs(60),
            store_timeout: Duration::from_secs(10),
            task_store: TaskStoreType::Memory,
            task_db_path: PathBuf::from("./data/tasks.db"),
            dev_mode: true,
            jwt_secret: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_secs_from_env(name: &str, default: u64) -> Result<Duration, ConfigError> {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    parse_positive_secs(name, &raw)
}

fn parse_positive_secs(name: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

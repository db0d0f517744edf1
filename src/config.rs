//! Runtime configuration: defaults, then `TWITTOR_*` environment overrides,
//! then validation.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use log::LevelFilter;
use thiserror::Error;

use crate::db::Backend;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0}")]
    Rejected(&'static str),
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    /// Default page size when a request omits `limit`.
    pub records_limit: u64,
    pub log_level: LevelFilter,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// 0 = one worker per CPU.
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: Backend,
    /// SQLite DSN or MongoDB connection string.
    pub url: String,
    /// Document database name; empty selects the backend's default.
    pub database: String,
    /// Budget applied to every storage call.
    pub timeout: Duration,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub signing_key: String,
    pub token_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            workers: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Relational,
            url: "sqlite://twittor.db".to_string(),
            database: String::new(),
            timeout: Duration::from_secs(5),
            max_connections: 10,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_key: String::new(),
            token_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
            records_limit: 20,
            log_level: LevelFilter::Info,
        }
    }
}

impl StorageConfig {
    /// Relational backend on a private in-memory SQLite database.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            ..Self::default()
        }
    }

    /// Storage settings from the process environment, as used by the seeder.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut storage = Self::default();
        storage.apply_overrides(&|key| env::var(key).ok())?;
        storage.validate()?;
        Ok(storage)
    }

    /// Configured database name, or the default of the selected backend.
    pub fn database_name(&self) -> &str {
        if !self.database.is_empty() {
            return &self.database;
        }
        match self.backend {
            Backend::DocumentEmbedded => "twitton",
            _ => "twittor",
        }
    }

    fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(backend) = lookup("TWITTOR_BACKEND") {
            self.backend = backend
                .parse()
                .map_err(|e| ConfigError::invalid("TWITTOR_BACKEND", &backend, e))?;
        }
        if let Some(url) = lookup("TWITTOR_DB_URL") {
            self.url = url;
        }
        if let Some(database) = lookup("TWITTOR_DB_NAME") {
            self.database = database;
        }
        if let Some(timeout) = lookup("TWITTOR_DB_TIMEOUT") {
            self.timeout = parse_duration(&timeout)
                .map_err(|e| ConfigError::invalid("TWITTOR_DB_TIMEOUT", &timeout, e))?;
        }
        if let Some(max) = lookup("TWITTOR_DB_MAX_CONNECTIONS") {
            self.max_connections = max
                .parse()
                .map_err(|e| ConfigError::invalid("TWITTOR_DB_MAX_CONNECTIONS", &max, e))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing("TWITTOR_DB_URL"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Rejected("storage timeout must be positive"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Rejected("pool needs at least one connection"));
        }
        Ok(())
    }
}

impl Config {
    /// Defaults overridden by the process environment, validated.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(addr) = lookup("TWITTOR_BIND_ADDR") {
            self.server.bind_addr = addr
                .parse()
                .map_err(|e| ConfigError::invalid("TWITTOR_BIND_ADDR", &addr, e))?;
        }
        if let Some(workers) = lookup("TWITTOR_WORKERS") {
            self.server.workers = workers
                .parse()
                .map_err(|e| ConfigError::invalid("TWITTOR_WORKERS", &workers, e))?;
        }

        self.storage.apply_overrides(lookup)?;

        if let Some(limit) = lookup("TWITTOR_RECORDS_LIMIT") {
            self.records_limit = limit
                .parse()
                .map_err(|e| ConfigError::invalid("TWITTOR_RECORDS_LIMIT", &limit, e))?;
        }
        if let Some(key) = lookup("TWITTOR_JWT_SIGNING_KEY") {
            self.auth.signing_key = key;
        }
        if let Some(ttl) = lookup("TWITTOR_TOKEN_TTL") {
            self.auth.token_ttl = parse_duration(&ttl)
                .map_err(|e| ConfigError::invalid("TWITTOR_TOKEN_TTL", &ttl, e))?;
        }
        if let Some(level) = lookup("TWITTOR_LOG_LEVEL") {
            self.log_level = level
                .parse()
                .map_err(|e| ConfigError::invalid("TWITTOR_LOG_LEVEL", &level, e))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;
        if self.records_limit == 0 {
            return Err(ConfigError::Rejected("records limit must be positive"));
        }
        if self.server.workers > 1024 {
            return Err(ConfigError::Rejected("too many workers (maximum 1024)"));
        }
        if self.auth.signing_key.is_empty() {
            return Err(ConfigError::Missing("TWITTOR_JWT_SIGNING_KEY"));
        }
        if self.auth.token_ttl.is_zero() {
            return Err(ConfigError::Rejected("token lifetime must be positive"));
        }
        Ok(())
    }

    pub fn optimal_workers(&self) -> usize {
        if self.server.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.server.workers
        }
    }
}

/// Parses a humantime span such as `250ms`, `5s`, `10m` or `1h 30m`. A bare
/// number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        return humantime::parse_duration(&format!("{raw}s"));
    }
    humantime::parse_duration(raw)
}

use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// `options.{block_timeout, hmget_count, hscan_count,
/// max_hmget_connections, timeout, xread_count}` (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
pub struct RedisOptions {
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout: u64,
    #[serde(default = "default_hmget_count")]
    pub hmget_count: usize,
    #[serde(default = "default_hscan_count")]
    pub hscan_count: usize,
    #[serde(default = "default_max_hmget_connections")]
    pub max_hmget_connections: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    #[serde(default = "default_xread_count")]
    pub xread_count: usize,
}

fn default_block_timeout_ms() -> u64 {
    1000
}
fn default_hmget_count() -> usize {
    100
}
fn default_hscan_count() -> usize {
    1000
}
fn default_max_hmget_connections() -> usize {
    8
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_xread_count() -> usize {
    100
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            block_timeout: default_block_timeout_ms(),
            hmget_count: default_hmget_count(),
            hscan_count: default_hscan_count(),
            max_hmget_connections: default_max_hmget_connections(),
            timeout: default_timeout_ms(),
            xread_count: default_xread_count(),
        }
    }
}

impl RedisOptions {
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub password_file: Option<String>,
    pub database: Option<u8>,
    #[serde(default)]
    pub tls: bool,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub ca: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub options: RedisOptions,
}

impl RedisConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(6379)
    }

    pub fn resolved_password(&self) -> Result<Option<String>, ConfigError> {
        match &self.password_file {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                Ok(Some(contents.trim_end_matches(['\n', '\r']).to_string()))
            }
            None => Ok(self.password.clone()),
        }
    }

    /// spec.md §6 validation constraints scoped to the Redis config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.options.block_timeout == 0 {
            return Err(ConfigError::Invalid("block_timeout must be > 0".into()));
        }
        if self.options.timeout == 0 {
            return Err(ConfigError::Invalid("timeout must be non-zero".into()));
        }
        if self.username.is_some() && self.resolved_password()?.is_none() {
            return Err(ConfigError::Invalid("password must be set when username is set".into()));
        }
        Ok(())
    }

    /// Informational form mirroring [`crate::DatabaseConfig::database_uri`].
    pub fn connection_uri(&self) -> String {
        let scheme = if self.tls { "redis+tls" } else { "redis" };
        let user = self.username.as_deref().unwrap_or("");
        let db = self.database.unwrap_or(0);
        format!("{scheme}://{user}@{}:{}/{db}", self.host, self.port())
    }
}

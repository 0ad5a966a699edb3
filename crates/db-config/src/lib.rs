pub mod database;
pub mod error;
pub mod loader;
pub mod redis;
pub mod tls;

pub use database::{DatabaseConfig, DatabaseOptions, DbType};
pub use error::ConfigError;
pub use loader::load;
pub use redis::{RedisConfig, RedisOptions};

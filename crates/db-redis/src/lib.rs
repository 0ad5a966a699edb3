pub mod client;
pub mod error;
pub mod retry;

pub use client::{hmyield, hyield, xread_until_result};
pub use error::RedisStreamError;

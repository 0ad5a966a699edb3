use thiserror::Error;

/// No library function swallows errors on this path except a `nil`
/// reply during block-polling `XREAD`, which [`crate::client::xread_until_result`]
/// treats as "retry", not a failure (spec.md §7).
#[derive(Debug, Error)]
pub enum RedisStreamError {
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cancelled before a result was available")]
    Cancelled,
}

use crate::error::RedisStreamError;
use db_retry::RetryOutcome;

/// Connection-level conditions worth retrying: dropped/refused
/// connections, timeouts, and generic I/O errors. Protocol-level
/// errors (bad command, wrong type) are not retried.
pub fn retryable(err: &RedisStreamError) -> bool {
    match err {
        RedisStreamError::Redis(e) => {
            e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error()
        }
        RedisStreamError::Cancelled => false,
    }
}

pub fn flatten(outcome: RetryOutcome<RedisStreamError>) -> RedisStreamError {
    match outcome {
        RetryOutcome::NotRetryable(e) | RetryOutcome::PolicyExhausted(e) | RetryOutcome::Cancelled(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_never_retryable() {
        assert!(!retryable(&RedisStreamError::Cancelled));
    }
}

pub mod backoff;
pub mod classify;
pub mod engine;

pub use backoff::{Exponential, InvalidBackoffRange, default_backoff};
pub use classify::{TransientHint, is_retryable_io};
pub use engine::{RetryDisposition, RetryOutcome, RetrySettings, with_backoff};

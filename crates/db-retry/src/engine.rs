use crate::backoff::Exponential;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{sleep, sleep_until, Instant as TokioInstant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Whether an error observed by the retry engine should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

/// The reason a retried operation ultimately failed, replacing the
/// wrapped-error-message control flow the source library used
/// (Design Notes: "Exception-like control flow").
#[derive(Debug)]
pub enum RetryOutcome<E> {
    /// `retryable(err)` returned false; op was invoked exactly once
    /// more than any prior successful attempts.
    NotRetryable(E),
    /// Every attempt allowed by `settings` was exhausted, or the
    /// deadline elapsed and the one permitted final attempt also
    /// failed.
    PolicyExhausted(E),
    /// The cancellation token fired before a final answer was
    /// reached; `E` is the last error observed, if any.
    Cancelled(E),
}

impl<E: fmt::Display> fmt::Display for RetryOutcome<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOutcome::NotRetryable(e) => write!(f, "can't retry: {e}"),
            RetryOutcome::PolicyExhausted(e) => write!(f, "retry deadline exceeded: {e}"),
            RetryOutcome::Cancelled(e) => write!(f, "retry cancelled: {e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryOutcome<E> {}

/// Tunables for a single `with_backoff` call.
#[derive(Default)]
pub struct RetrySettings<E> {
    pub timeout: Option<Duration>,
    pub on_retry: Option<Box<dyn Fn(&E, u32) + Send + Sync>>,
    pub on_success: Option<Box<dyn Fn(Duration, u32, Option<&E>) + Send + Sync>>,
}

impl<E> RetrySettings<E> {
    pub fn new() -> Self {
        Self {
            timeout: None,
            on_retry: None,
            on_success: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_retry(mut self, f: impl Fn(&E, u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(Duration, u32, Option<&E>) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }
}

/// Re-invokes `op` under `backoff` until it succeeds, `retryable`
/// rejects the error, the deadline in `settings.timeout` is exceeded,
/// or `cancel` fires. Attempt numbering starts at 1.
pub async fn with_backoff<F, Fut, T, E, R>(
    cancel: &CancellationToken,
    mut op: F,
    retryable: R,
    backoff: &Exponential,
    settings: RetrySettings<E>,
) -> Result<T, RetryOutcome<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let deadline = settings.timeout.map(|t| Instant::now() + t);
    let start = Instant::now();
    let mut attempt: u32 = 0;
    let mut prev_err: Option<E> = None;
    let mut final_attempt_after_deadline = false;

    loop {
        // The deadline can only abort a call that would otherwise be a
        // *retry*: the first attempt always runs regardless of the
        // timeout, matching "never invokes the operation after its
        // deadline has already elapsed" (elapsed relative to a prior
        // attempt, not before any attempt has been made at all).
        if !final_attempt_after_deadline {
            if let Some((dl, err)) = deadline.zip(prev_err.take()) {
                if Instant::now() >= dl {
                    return Err(RetryOutcome::PolicyExhausted(err));
                }
                prev_err = Some(err);
            }
        }

        attempt += 1;

        if cancel.is_cancelled() {
            return match prev_err {
                Some(err) => Err(RetryOutcome::Cancelled(err)),
                None => {
                    // No attempt has run yet; run one anyway so the
                    // contract "op ran at least once unless the
                    // deadline had already elapsed" holds even when
                    // cancellation races the very first attempt.
                    match op().await {
                        Ok(v) => {
                            fire_on_success(&settings, start.elapsed(), attempt, None);
                            Ok(v)
                        }
                        Err(err) => Err(RetryOutcome::Cancelled(err)),
                    }
                }
            };
        }

        match op().await {
            Ok(value) => {
                fire_on_success(&settings, start.elapsed(), attempt, prev_err.as_ref());
                return Ok(value);
            }
            Err(err) => {
                if !retryable(&err) {
                    return Err(RetryOutcome::NotRetryable(err));
                }

                if final_attempt_after_deadline {
                    return Err(RetryOutcome::PolicyExhausted(err));
                }

                if let Some(cb) = &settings.on_retry {
                    cb(&err, attempt);
                }
                debug!(attempt, "retrying after retryable error");

                let delay = backoff.delay(attempt);
                prev_err = Some(err);

                // The deadline races the sleep itself, not just the turn after
                // it: a deadline several seconds out must not be masked by a
                // backoff delay that's longer than that (spec.md §4.2 "select
                // on backoff-delay / timeout / ctx.Done").
                match deadline {
                    Some(dl) => {
                        tokio::select! {
                            _ = sleep(delay) => {
                                if Instant::now() >= dl {
                                    final_attempt_after_deadline = true;
                                }
                            }
                            _ = sleep_until(TokioInstant::from_std(dl)) => {
                                final_attempt_after_deadline = true;
                            }
                            _ = cancel.cancelled() => {
                                return Err(RetryOutcome::Cancelled(prev_err.take().unwrap()));
                            }
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = cancel.cancelled() => {
                                return Err(RetryOutcome::Cancelled(prev_err.take().unwrap()));
                            }
                        }
                    }
                }
            }
        }
    }
}

fn fire_on_success<E>(settings: &RetrySettings<E>, elapsed: Duration, attempt: u32, prev: Option<&E>) {
    if let Some(cb) = &settings.on_success {
        cb(elapsed, attempt, prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn tiny_backoff() -> Exponential {
        Exponential::new(Duration::from_millis(1), Duration::from_millis(5)).unwrap()
    }

    #[tokio::test]
    async fn static_non_retryable_failure_invokes_op_exactly_once() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let a = attempts.clone();

        let result: Result<(), RetryOutcome<&str>> = with_backoff(
            &cancel,
            || {
                a.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
            |_| false,
            &tiny_backoff(),
            RetrySettings::new(),
        )
        .await;

        assert!(matches!(result, Err(RetryOutcome::NotRetryable("boom"))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_failure_succeeds_on_nth_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let a = attempts.clone();
        let success_attempt = Arc::new(AtomicU32::new(0));
        let sa = success_attempt.clone();

        let result = with_backoff(
            &cancel,
            || {
                let a = a.clone();
                async move {
                    let n = a.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 4 { Err("transient") } else { Ok::<_, &str>(n) }
                }
            },
            |_| true,
            &tiny_backoff(),
            RetrySettings::new().on_success(move |_elapsed, attempt, _prev| {
                sa.store(attempt, Ordering::SeqCst);
            }),
        )
        .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(success_attempt.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancellation_aborts_with_last_error() {
        let cancel = CancellationToken::new();
        let cancel_for_op = cancel.clone();

        let result: Result<(), RetryOutcome<&str>> = with_backoff(
            &cancel,
            move || {
                cancel_for_op.cancel();
                async { Err("down") }
            },
            |_| true,
            &tiny_backoff(),
            RetrySettings::new(),
        )
        .await;

        assert!(matches!(result, Err(RetryOutcome::Cancelled("down"))));
    }

    #[tokio::test]
    async fn deadline_elapsed_before_call_aborts_without_invoking_op() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let a = attempts.clone();

        // First attempt always fails so we have a prev_err to report;
        // the deadline is already in the past by the second loop turn.
        let result: Result<(), RetryOutcome<&str>> = with_backoff(
            &cancel,
            || {
                a.fetch_add(1, Ordering::SeqCst);
                async { Err("slow") }
            },
            |_| true,
            &tiny_backoff(),
            RetrySettings::new().with_timeout(Duration::from_millis(1)),
        )
        .await;

        assert!(matches!(result, Err(RetryOutcome::PolicyExhausted("slow"))));
        // One or two attempts may have run depending on scheduling,
        // but op is never invoked again once the deadline is observed
        // elapsed at the top of the loop.
        assert!(attempts.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn deadline_firing_mid_sleep_cuts_the_wait_short() {
        let cancel = CancellationToken::new();
        // A backoff delay much longer than the deadline: without racing the
        // deadline against the sleep itself, this would block out the whole
        // ~500ms before the timeout is ever observed.
        let backoff = Exponential::new(Duration::from_millis(500), Duration::from_millis(600)).unwrap();

        let start = std::time::Instant::now();
        let result: Result<(), RetryOutcome<&str>> = with_backoff(
            &cancel,
            || async { Err("slow") },
            |_| true,
            &backoff,
            RetrySettings::new().with_timeout(Duration::from_millis(20)),
        )
        .await;

        let elapsed = start.elapsed();
        assert!(matches!(result, Err(RetryOutcome::PolicyExhausted("slow"))));
        assert!(elapsed < Duration::from_millis(400), "elapsed = {elapsed:?}");
    }
}

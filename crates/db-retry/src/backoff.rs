use rand::Rng;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("backoff min ({min:?}) must be strictly less than max ({max:?})")]
pub struct InvalidBackoffRange {
    pub min: Duration,
    pub max: Duration,
}

/// `min * 2^attempt`, jittered into `[raw/2, raw)`, then clamped to
/// `max`. `min<=0` falls back to 100ms, `max<=0` falls back to 10s;
/// `min >= max` after those substitutions fails construction.
#[derive(Debug, Clone, Copy)]
pub struct Exponential {
    min: Duration,
    max: Duration,
}

impl Exponential {
    pub fn new(min: Duration, max: Duration) -> Result<Self, InvalidBackoffRange> {
        let min = if min.is_zero() {
            Duration::from_millis(100)
        } else {
            min
        };
        let max = if max.is_zero() {
            Duration::from_secs(10)
        } else {
            max
        };
        if min >= max {
            return Err(InvalidBackoffRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Delay for `attempt` (1-based, matching the retry engine's
    /// attempt numbering, though any non-negative value works here).
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.raw(attempt);
        jitter(raw).min(self.max)
    }

    fn raw(&self, attempt: u32) -> Duration {
        let min_nanos = self.min.as_nanos();
        let shift = attempt.min(127);
        let factor = 1u128 << shift;
        let raw_nanos = match min_nanos.checked_mul(factor) {
            Some(v) => v,
            None => return self.max,
        };
        let capped = raw_nanos.min(self.max.as_nanos());
        nanos_to_duration(capped)
    }
}

fn jitter(raw: Duration) -> Duration {
    if raw.is_zero() {
        return raw;
    }
    let raw_nanos = raw.as_nanos();
    let half = raw_nanos / 2;
    if half >= raw_nanos {
        return raw;
    }
    let jittered = rand::thread_rng().gen_range(half..raw_nanos);
    nanos_to_duration(jittered)
}

fn nanos_to_duration(nanos: u128) -> Duration {
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// The shared default: 128ms..60s, used by the connector (C5) and any
/// caller that doesn't supply its own backoff.
pub fn default_backoff() -> Exponential {
    Exponential::new(Duration::from_millis(128), Duration::from_secs(60))
        .expect("default backoff range is valid by construction")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_min_not_less_than_max() {
        let err = Exponential::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap_err();
        assert_eq!(
            err,
            InvalidBackoffRange {
                min: Duration::from_secs(1),
                max: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn substitutes_defaults_for_non_positive_bounds() {
        let b = Exponential::new(Duration::ZERO, Duration::ZERO).unwrap();
        for attempt in 0..5 {
            let d = b.delay(attempt);
            assert!(d >= Duration::from_millis(50)); // min/2 lower bound, roughly
            assert!(d <= Duration::from_secs(10));
        }
    }

    #[test]
    fn delay_is_always_within_min_and_max() {
        let b = Exponential::new(Duration::from_millis(10), Duration::from_secs(1)).unwrap();
        for attempt in 0..40 {
            let d = b.delay(attempt);
            assert!(d <= Duration::from_secs(1), "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn large_attempt_counts_clamp_to_max_without_overflow() {
        let b = Exponential::new(Duration::from_millis(10), Duration::from_secs(1)).unwrap();
        let d = b.delay(u32::MAX);
        assert!(d <= Duration::from_secs(1));
    }

    #[test]
    fn eventually_saturates_at_max() {
        let b = Exponential::new(Duration::from_millis(10), Duration::from_millis(100)).unwrap();
        // by attempt 10, 10ms * 2^10 = 10240ms >> max, so raw clamps to max
        // and jitter(max) is in [max/2, max) which still respects delay()'s
        // own outer clamp to max.
        let d = b.delay(10);
        assert!(d <= Duration::from_millis(100));
    }

    #[test]
    fn default_backoff_spans_128ms_to_60s() {
        let b = default_backoff();
        assert!(b.delay(0) >= Duration::from_millis(64));
        assert!(b.delay(20) <= Duration::from_secs(60));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn delay_always_lies_within_min_and_max(
            min_ms in 1u64..5_000,
            max_extra_ms in 1u64..60_000,
            attempt in 0u32..200,
        ) {
            let min = Duration::from_millis(min_ms);
            let max = min + Duration::from_millis(max_extra_ms);
            let b = Exponential::new(min, max).unwrap();
            let d = b.delay(attempt);
            prop_assert!(d <= max);
        }

        #[test]
        fn jitter_lies_in_half_open_upper_half(raw_ms in 2u64..1_000_000) {
            let raw = Duration::from_millis(raw_ms);
            let jittered = jitter(raw);
            prop_assert!(jittered.as_nanos() >= raw.as_nanos() / 2);
            prop_assert!(jittered.as_nanos() < raw.as_nanos());
        }
    }
}

//! # Backoff policy for store reconnection.
//!
//! [`BackoffPolicy`] controls how retry delays grow when the task watcher
//! (or any other store-facing worker) hits consecutive transient errors.
//! It is parameterized by:
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::max`] the maximum delay cap;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::jitter`] the randomization applied on top.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use taskgrid::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(None), Duration::from_millis(100));
//! assert_eq!(backoff.next(Some(Duration::from_millis(100))), Duration::from_millis(200));
//! // Capped at max.
//! assert_eq!(backoff.next(Some(Duration::from_secs(20))), Duration::from_secs(10));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Reconnect backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Initial delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap for retries.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter applied to the computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a policy with `first = 100ms`, `max = 30s`, `factor = 2.0`,
    /// no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the next delay based on the previous one.
    ///
    /// - If `prev` is `None`, returns `first` clamped to `max`.
    /// - Otherwise multiplies the previous delay by `factor` and caps it at
    ///   `max`.
    ///
    /// Jitter is applied last, so the returned delay may be below the
    /// deterministic value but never above `max`.
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        let unclamped = match prev {
            None => self.first,
            Some(d) => {
                let mul = d.as_secs_f64() * self.factor;
                if mul.is_finite() {
                    d.mul_f64(self.factor)
                } else {
                    self.max
                }
            }
        };

        self.jitter.apply(unclamped.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_factor_until_capped() {
        let p = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };

        let d1 = p.next(None);
        let d2 = p.next(Some(d1));
        let d3 = p.next(Some(Duration::from_millis(900)));

        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_secs(1));
    }

    #[test]
    fn jittered_delay_never_exceeds_max() {
        let p = BackoffPolicy {
            first: Duration::from_millis(500),
            max: Duration::from_millis(500),
            factor: 2.0,
            jitter: JitterPolicy::Full,
        };

        for _ in 0..32 {
            assert!(p.next(Some(Duration::from_secs(4))) <= p.max);
        }
    }
}

//! # Jitter for reconnect delays.
//!
//! [`JitterPolicy`] randomizes backoff delays so that several nodes watching
//! the same store do not reconnect in lockstep after a shared outage.
//!
//! - [`JitterPolicy::None`] no randomization, predictable delays
//! - [`JitterPolicy::Full`] random delay in `[0, delay]`
//! - [`JitterPolicy::Equal`] `delay/2 + random[0, delay/2]` (balanced)

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of reconnect delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No jitter: use the exact backoff delay.
    #[default]
    None,

    /// Full jitter: random in `[0, delay]`. Most aggressive spreading.
    Full,

    /// Equal jitter: `delay/2 + random[0, delay/2]`.
    ///
    /// Preserves roughly 75% of the original delay on average; the
    /// recommended default for watch reconnection.
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => full_jitter(delay),
            JitterPolicy::Equal => equal_jitter(delay),
        }
    }
}

/// Full jitter: random in `[0, delay]`.
fn full_jitter(delay: Duration) -> Duration {
    let ms = (delay.as_millis().min(u128::from(u64::MAX))) as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

/// Equal jitter: `delay/2 + random[0, delay/2]`.
fn equal_jitter(delay: Duration) -> Duration {
    let ms = (delay.as_millis().min(u128::from(u64::MAX))) as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    let half = ms / 2;
    let jitter = if half == 0 {
        0
    } else {
        rand::rng().random_range(0..=half)
    };
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(750);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn equal_stays_within_half_to_full() {
        let d = Duration::from_millis(1000);
        for _ in 0..32 {
            let j = JitterPolicy::Equal.apply(d);
            assert!(j >= Duration::from_millis(500) && j <= d);
        }
    }

    #[test]
    fn full_stays_within_zero_to_full() {
        let d = Duration::from_millis(1000);
        for _ in 0..32 {
            assert!(JitterPolicy::Full.apply(d) <= d);
        }
    }
}

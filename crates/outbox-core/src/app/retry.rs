//! Retry policy: decides backoff delays and when to give up.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use super::config::{BackoffConfig, DispatcherConfig, to_time_delta};

/// What to do with an event whose handler just failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Release the claim and try again at `next_attempt_at`.
    Retry {
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        delay: Duration,
    },

    /// Attempt budget exhausted. The row stays unprocessed and is never
    /// claimed again until an operator replays it.
    DeadLetter { attempts: u32 },
}

impl RetryDecision {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Retry { attempts, .. } | Self::DeadLetter { attempts } => *attempts,
        }
    }

    pub fn is_dead_letter(&self) -> bool {
        matches!(self, Self::DeadLetter { .. })
    }
}

/// Retry policy for failed events.
///
/// Exponential backoff: `delay = base^attempts * unit`, where `attempts`
/// already counts the failure being handled.
///
/// With base=5, unit=1s:
/// - 1st failure: 5s
/// - 2nd failure: 25s
/// - 3rd failure: 125s
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: BackoffConfig,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(backoff: BackoffConfig, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts,
        }
    }

    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self::new(config.backoff.clone(), config.max_attempts)
    }

    /// Deterministic delay for the given attempt count (jitter not applied).
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn compute_backoff(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let factor = f64::from(self.backoff.base).powi(exponent);
        let secs = self.backoff.unit.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// `compute_backoff`, shortened by a random fraction up to `jitter`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let delay = self.compute_backoff(attempts);
        if self.backoff.jitter <= 0.0 {
            return delay;
        }
        let cut = rand::thread_rng().gen_range(0.0..=self.backoff.jitter.min(1.0));
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 - cut)).unwrap_or(delay)
    }

    /// `attempts` is the count after the failure was added.
    pub fn decide(&self, attempts: u32, now: DateTime<Utc>) -> RetryDecision {
        if attempts >= self.max_attempts {
            return RetryDecision::DeadLetter { attempts };
        }
        let delay = self.delay_for(attempts);
        let next_attempt_at = now
            .checked_add_signed(to_time_delta(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        RetryDecision::Retry {
            attempts,
            next_attempt_at,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatcherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[rstest]
    #[case(0, 1_000)]
    #[case(1, 5_000)]
    #[case(2, 25_000)]
    #[case(3, 125_000)]
    #[case(4, 625_000)]
    fn default_backoff_is_powers_of_five_seconds(#[case] attempts: u32, #[case] expected_ms: u128) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.compute_backoff(attempts).as_millis(), expected_ms);
    }

    #[test]
    fn backoff_is_monotonic() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=6).map(|a| policy.compute_backoff(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.compute_backoff(u32::MAX), Duration::MAX);

        match policy.decide(4, DateTime::<Utc>::MAX_UTC - TimeDelta::seconds(1)) {
            RetryDecision::Retry { next_attempt_at, .. } => {
                assert_eq!(next_attempt_at, DateTime::<Utc>::MAX_UTC)
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn decide_reschedules_below_max() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(1, t0());
        assert_eq!(
            decision,
            RetryDecision::Retry {
                attempts: 1,
                next_attempt_at: t0() + TimeDelta::seconds(5),
                delay: Duration::from_secs(5),
            }
        );
    }

    #[rstest]
    #[case(5)]
    #[case(6)]
    fn decide_dead_letters_at_max(#[case] attempts: u32) {
        let policy = RetryPolicy::default();
        let decision = policy.decide(attempts, t0());
        assert!(decision.is_dead_letter());
        assert_eq!(decision.attempts(), attempts);
    }

    #[test]
    fn jitter_only_shortens() {
        let policy = RetryPolicy::new(
            BackoffConfig {
                jitter: 0.5,
                ..BackoffConfig::default()
            },
            5,
        );
        for _ in 0..50 {
            let delay = policy.delay_for(2);
            assert!(delay <= Duration::from_secs(25));
            assert!(delay >= Duration::from_millis(12_500));
        }
    }
}

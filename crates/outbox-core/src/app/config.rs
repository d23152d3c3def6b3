//! Dispatcher configuration.
//!
//! Defaults give roughly one-second responsiveness. Every knob can be
//! overridden through `OUTBOX_*` environment variables.

use std::time::Duration;

use chrono::TimeDelta;

use crate::domain::{ClaimPolicy, OutboxError, OutboxResult};

pub const ENV_POLL_INTERVAL_MS: &str = "OUTBOX_POLL_INTERVAL_MS";
pub const ENV_BATCH_SIZE: &str = "OUTBOX_BATCH_SIZE";
pub const ENV_MAX_ATTEMPTS: &str = "OUTBOX_MAX_ATTEMPTS";
pub const ENV_CLAIM_TIMEOUT_SECS: &str = "OUTBOX_CLAIM_TIMEOUT_SECS";
pub const ENV_BACKOFF_BASE: &str = "OUTBOX_BACKOFF_BASE";
pub const ENV_BACKOFF_UNIT_MS: &str = "OUTBOX_BACKOFF_UNIT_MS";
pub const ENV_BACKOFF_JITTER: &str = "OUTBOX_BACKOFF_JITTER";

/// Exponential backoff parameters: `delay = base^attempts * unit`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base: u32,
    pub unit: Duration,

    /// Fraction in `[0, 1]` by which a delay may be randomly shortened.
    /// `0.0` keeps delays exact.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: 5,
            unit: Duration::from_secs(1),
            jitter: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Time between two ticks of one poller.
    pub poll_interval: Duration,

    /// Maximum events claimed per tick.
    pub batch_size: usize,

    /// Attempts after which an event is dead-lettered.
    pub max_attempts: u32,

    /// Age after which a claim counts as abandoned and the event is reclaimable.
    pub claim_timeout: Duration,

    pub backoff: BackoffConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 10,
            max_attempts: 5,
            claim_timeout: Duration::from_secs(300),
            backoff: BackoffConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// Defaults overridden by `OUTBOX_*` environment variables.
    pub fn from_env() -> OutboxResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> OutboxResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(size) = parse::<usize>(&lookup, ENV_BATCH_SIZE)? {
            config.batch_size = size;
        }
        if let Some(max) = parse::<u32>(&lookup, ENV_MAX_ATTEMPTS)? {
            config.max_attempts = max;
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_CLAIM_TIMEOUT_SECS)? {
            config.claim_timeout = Duration::from_secs(secs);
        }
        if let Some(base) = parse::<u32>(&lookup, ENV_BACKOFF_BASE)? {
            config.backoff.base = base;
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_BACKOFF_UNIT_MS)? {
            config.backoff.unit = Duration::from_millis(ms);
        }
        if let Some(jitter) = parse::<f64>(&lookup, ENV_BACKOFF_JITTER)? {
            config.backoff.jitter = jitter;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OutboxResult<()> {
        if self.poll_interval.is_zero() {
            return Err(OutboxError::Config("poll_interval must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(OutboxError::Config("batch_size must be > 0".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(OutboxError::Config("max_attempts must be > 0".to_string()));
        }
        if self.claim_timeout.is_zero() {
            return Err(OutboxError::Config("claim_timeout must be > 0".to_string()));
        }
        if self.backoff.base < 1 {
            return Err(OutboxError::Config("backoff base must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(OutboxError::Config(format!(
                "backoff jitter must be within [0, 1], got {}",
                self.backoff.jitter
            )));
        }
        Ok(())
    }

    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            claim_timeout: to_time_delta(self.claim_timeout),
            max_attempts: self.max_attempts,
        }
    }
}

/// std → chrono, saturating at a century instead of failing.
pub(crate) fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::days(36_500))
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> OutboxResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| OutboxError::Config(format!("{key}={raw:?} is not a valid value"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = DispatcherConfig::default();
        config.validate().unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff.base, 5);
        assert_eq!(config.backoff.unit, Duration::from_secs(1));
        assert_eq!(config.backoff.jitter, 0.0);
    }

    #[test]
    fn no_variables_means_defaults() {
        let config = DispatcherConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DispatcherConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = DispatcherConfig::from_lookup(lookup(&[
            (ENV_POLL_INTERVAL_MS, "250"),
            (ENV_BATCH_SIZE, "50"),
            (ENV_MAX_ATTEMPTS, "8"),
            (ENV_CLAIM_TIMEOUT_SECS, "60"),
            (ENV_BACKOFF_BASE, "2"),
            (ENV_BACKOFF_UNIT_MS, "500"),
            (ENV_BACKOFF_JITTER, "0.2"),
        ]))
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_attempts, 8);
        assert_eq!(config.claim_timeout, Duration::from_secs(60));
        assert_eq!(config.backoff.base, 2);
        assert_eq!(config.backoff.unit, Duration::from_millis(500));
        assert_eq!(config.backoff.jitter, 0.2);
        assert_eq!(config.claim_policy().claim_timeout, TimeDelta::seconds(60));
    }

    #[test]
    fn unparsable_variable_is_a_config_error() {
        let err = DispatcherConfig::from_lookup(lookup(&[(ENV_BATCH_SIZE, "ten")])).unwrap_err();
        assert!(matches!(err, OutboxError::Config(msg) if msg.contains(ENV_BATCH_SIZE)));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(DispatcherConfig::from_lookup(lookup(&[(ENV_BATCH_SIZE, "0")])).is_err());
        assert!(DispatcherConfig::from_lookup(lookup(&[(ENV_MAX_ATTEMPTS, "0")])).is_err());
        assert!(DispatcherConfig::from_lookup(lookup(&[(ENV_BACKOFF_JITTER, "1.5")])).is_err());
        assert!(DispatcherConfig::from_lookup(lookup(&[(ENV_POLL_INTERVAL_MS, "0")])).is_err());
    }
}

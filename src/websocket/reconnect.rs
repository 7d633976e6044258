use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::serde_helpers::duration_ms;

/// Configuration for reconnection behavior
///
/// The delay before retry `n` (counting from zero) is
/// `min(base_delay * backoff_factor^n, max_delay)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Number of automatic retries before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 1.5,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay for the given zero-based attempt number
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_delay.is_zero() {
            return Err(Error::Config("Base reconnect delay must be > 0".to_string()));
        }
        if self.max_delay < self.base_delay {
            return Err(Error::Config(
                "Max reconnect delay must be >= base reconnect delay".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::Config("Backoff factor must be >= 1.0".to_string()));
        }
        Ok(())
    }
}

/// Exponential backoff calculator with an attempt budget
#[derive(Debug, Clone)]
pub(crate) struct ExponentialBackoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ExponentialBackoff {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Delay for the next retry, or `None` once the budget is spent
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset the backoff to the base delay
    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }
}

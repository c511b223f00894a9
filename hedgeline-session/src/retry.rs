//! Reconnect retry policy.
//!
//! An explicit value describing how many times the supervisor retries a
//! failed connection attempt and how long it waits in between. The loop
//! itself lives in the supervisor; this module only computes delays.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default number of connection attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default upper bound for any single delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(60_000);

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// base, 2·base, 3·base, ...
    Linear,
    /// base, 2·base, 4·base, ...
    #[default]
    Exponential,
}

impl fmt::Display for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Linear => write!(f, "linear"),
            Backoff::Exponential => write!(f, "exponential"),
        }
    }
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Backoff::Linear),
            "exponential" | "exp" => Ok(Backoff::Exponential),
            other => Err(format!("unknown backoff '{}', expected linear or exponential", other)),
        }
    }
}

/// Retry policy for connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Cap applied to every delay
    pub max_delay: Duration,
    /// Growth curve
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt.saturating_add(1)),
            Backoff::Exponential => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            },
        };
        delay.min(self.max_delay)
    }

    /// Whether another attempt may follow failed attempt number `attempt` (0-based).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff: Backoff::Exponential,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

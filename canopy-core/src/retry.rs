//! Unit retry policy
//!
//! Transient failures are retried with exponential backoff until the
//! attempt limit; permanent failures fail the unit immediately.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::OrchestrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per unit, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// What to do with a unit after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the unit back, visible again after `delay`
    Retry { delay: Duration },
    /// Mark the unit failed
    GiveUp,
}

impl RetryPolicy {
    /// Backoff before the attempt following `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn decide(&self, attempt: u32, error: &OrchestrationError) -> RetryDecision {
        if error.is_transient() && attempt < self.max_attempts {
            RetryDecision::Retry {
                delay: self.backoff(attempt),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable() -> OrchestrationError {
        OrchestrationError::ServiceUnavailable("timeout".to_string())
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(5), Duration::from_secs(10));
        assert_eq!(policy.backoff(100), Duration::from_secs(10));
    }

    #[test]
    fn test_transient_retried_until_limit() {
        let policy = RetryPolicy::default();
        assert!(matches!(policy.decide(1, &unavailable()), RetryDecision::Retry { .. }));
        assert!(matches!(policy.decide(2, &unavailable()), RetryDecision::Retry { .. }));
        assert_eq!(policy.decide(3, &unavailable()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_permanent_never_retried() {
        let policy = RetryPolicy::default();
        let error = OrchestrationError::RemoteInferenceError {
            status: Some(400),
            message: "bad request".to_string(),
        };
        assert_eq!(policy.decide(1, &error), RetryDecision::GiveUp);
    }
}

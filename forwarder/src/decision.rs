//! What to do with a failed delivery.
//!
//! Everything here is a pure function of the retry index, the error and the
//! configured budget, so the terminal/retryable split is testable without
//! any I/O.

use crate::config::RetryConfig;
use crate::errors::{DeliveryError, ErrorKind};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The runtime will try again. Nothing is recorded.
    Retryable,
    /// The retry budget is spent: record a dead-letter row and alert.
    Terminal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailureDecision {
    pub kind: ErrorKind,
    pub disposition: Disposition,
}

impl FailureDecision {
    pub fn should_record(&self) -> bool {
        self.disposition == Disposition::Terminal
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    max_retry_count: u32,
    minimum_interval: Duration,
    maximum_interval: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_retry_count: config.max_retry_count,
            minimum_interval: Duration::from_secs(config.minimum_interval_secs),
            maximum_interval: Duration::from_secs(config.maximum_interval_secs),
        }
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    /// `None` never reaches the budget.
    pub fn is_final_attempt(&self, retry_index: Option<u32>) -> bool {
        retry_index.is_some_and(|index| index >= self.max_retry_count)
    }

    pub fn decide(&self, retry_index: Option<u32>, error: &DeliveryError) -> FailureDecision {
        let disposition = match self.is_final_attempt(retry_index) {
            true => Disposition::Terminal,
            false => Disposition::Retryable,
        };
        FailureDecision {
            kind: error.kind(),
            disposition,
        }
    }

    /// Backoff hint for the runtime: `minimum * 2^retry_index`, capped at the maximum.
    pub fn retry_after(&self, retry_index: Option<u32>) -> Duration {
        let min_secs = self.minimum_interval.as_secs();
        let secs = 2u64
            .checked_pow(retry_index.unwrap_or(0))
            .and_then(|factor| min_secs.checked_mul(factor))
            .unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.maximum_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(&RetryConfig::default())
    }

    fn http_error() -> DeliveryError {
        DeliveryError::Http {
            status: 500,
            body: "boom".into(),
        }
    }

    #[test]
    fn test_retryable_below_budget() {
        for index in [None, Some(0), Some(1), Some(3)] {
            let decision = policy().decide(index, &http_error());
            assert_eq!(decision.disposition, Disposition::Retryable, "{index:?}");
            assert!(!decision.should_record());
        }
    }

    #[test]
    fn test_terminal_at_or_above_budget() {
        for index in [4, 5, 100] {
            let decision = policy().decide(Some(index), &http_error());
            assert_eq!(
                decision,
                FailureDecision {
                    kind: ErrorKind::HttpError,
                    disposition: Disposition::Terminal,
                }
            );
            assert!(decision.should_record());
        }
    }

    #[test]
    fn test_zero_budget_makes_first_attempt_final() {
        let policy = RetryPolicy::new(&RetryConfig {
            max_retry_count: 0,
            ..RetryConfig::default()
        });
        assert!(policy.is_final_attempt(Some(0)));
        assert!(!policy.is_final_attempt(None));
    }

    #[test]
    fn test_retry_after_grows_and_is_capped() {
        let policy = policy();
        assert_eq!(policy.retry_after(None), Duration::from_secs(10));
        assert_eq!(policy.retry_after(Some(0)), Duration::from_secs(10));
        assert_eq!(policy.retry_after(Some(1)), Duration::from_secs(20));
        assert_eq!(policy.retry_after(Some(3)), Duration::from_secs(80));
        assert_eq!(policy.retry_after(Some(5)), Duration::from_secs(300));
        assert_eq!(policy.retry_after(Some(200)), Duration::from_secs(300));
    }
}

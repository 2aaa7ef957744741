//! Retry state machine for backend calls.
//!
//! A [`CallState`] tracks one logical call across attempts. After each failed attempt the
//! [`RetryPolicy`] decides whether to sleep and try again or to give up, so the whole policy is
//! testable without a backend.

use std::time::Duration;

use crate::summarization::SummarizationClientError;

use super::types::SourceFailure;

/// Backoff never grows beyond this delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Attempt budget and exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Allow `max_attempts` attempts (at least one) with backoff starting at `base_delay`.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: MAX_BACKOFF,
        }
    }

    /// Attempts allowed, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then make attempt number `next_attempt`.
    Retry {
        /// Attempt number of the next try.
        next_attempt: u32,
        /// Backoff before the next try.
        delay: Duration,
    },
    /// Stop; the call failed with `failure`.
    GiveUp {
        /// Classification of the final error.
        failure: SourceFailure,
        /// The final error.
        error: SummarizationClientError,
    },
}

/// Progress of one logical backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallState {
    attempt: u32,
    last_error: Option<SummarizationClientError>,
}

impl Default for CallState {
    fn default() -> Self {
        Self::new()
    }
}

impl CallState {
    /// State before the first attempt.
    pub fn new() -> Self {
        Self {
            attempt: 1,
            last_error: None,
        }
    }

    /// Current attempt number (1-based).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Error of the most recent failed attempt.
    pub fn last_error(&self) -> Option<&SummarizationClientError> {
        self.last_error.as_ref()
    }

    /// Record a failed attempt and decide what happens next.
    pub fn on_failure(
        &mut self,
        error: SummarizationClientError,
        policy: &RetryPolicy,
    ) -> RetryDecision {
        let transient = error.is_transient();
        self.last_error = Some(error.clone());

        if !transient {
            return RetryDecision::GiveUp {
                failure: SourceFailure::BackendPermanent,
                error,
            };
        }
        if self.attempt >= policy.max_attempts() {
            return RetryDecision::GiveUp {
                failure: SourceFailure::BackendTransient,
                error,
            };
        }

        let delay = policy.backoff(self.attempt);
        self.attempt += 1;
        RetryDecision::Retry {
            next_attempt: self.attempt,
            delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited() -> SummarizationClientError {
        SummarizationClientError::Status {
            status: 429,
            body: "slow down".into(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(4), Duration::from_millis(4000));
        assert_eq!(policy.backoff(5), MAX_BACKOFF);
        assert_eq!(policy.backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn transient_failures_retry_until_attempts_run_out() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let mut state = CallState::new();

        assert_eq!(
            state.on_failure(rate_limited(), &policy),
            RetryDecision::Retry {
                next_attempt: 2,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            state.on_failure(SummarizationClientError::Timeout(Duration::from_secs(1)), &policy),
            RetryDecision::Retry {
                next_attempt: 3,
                delay: Duration::from_millis(200)
            }
        );
        let decision = state.on_failure(rate_limited(), &policy);
        assert!(matches!(
            decision,
            RetryDecision::GiveUp {
                failure: SourceFailure::BackendTransient,
                ..
            }
        ));
        assert_eq!(state.attempt(), 3);
        assert_eq!(state.last_error(), Some(&rate_limited()));
    }

    #[test]
    fn permanent_failures_stop_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let mut state = CallState::new();
        let decision = state.on_failure(
            SummarizationClientError::Status {
                status: 401,
                body: "bad key".into(),
            },
            &policy,
        );
        assert!(matches!(
            decision,
            RetryDecision::GiveUp {
                failure: SourceFailure::BackendPermanent,
                ..
            }
        ));
        assert_eq!(state.attempt(), 1);
    }

    #[test]
    fn zero_attempts_still_allows_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        assert_eq!(policy.max_attempts(), 1);
        let mut state = CallState::new();
        assert!(matches!(
            state.on_failure(rate_limited(), &policy),
            RetryDecision::GiveUp { .. }
        ));
    }
}

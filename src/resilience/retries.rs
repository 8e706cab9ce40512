//! Retry policy and failure classification.
//!
//! # Responsibilities
//! - Classify an attempt's failure (timeout, connection, 5xx, 4xx, circuit open)
//! - Decide whether a failure class is transient, and therefore retryable
//! - Bound the number of attempts per call
//!
//! # Design Decisions
//! - Only transient classes are retried; 4xx and circuit-open never are
//! - Transient classes are exactly the ones the circuit breaker counts
//! - Non-idempotent methods are retried unless `idempotent_only` is set

use axum::http::{Method, StatusCode};

use crate::config::RetryConfig;
use crate::resilience::backoff::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Timeout,
    Connect,
    ServerError,
    ClientError,
    CircuitOpen,
}

impl FailureClass {
    /// Class of a response status; `None` for anything below 400.
    pub fn of_status(status: StatusCode) -> Option<Self> {
        if status.is_server_error() {
            Some(FailureClass::ServerError)
        } else if status.is_client_error() {
            Some(FailureClass::ClientError)
        } else {
            None
        }
    }

    /// Transient failures may succeed on retry and count against the breaker.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureClass::Timeout | FailureClass::Connect | FailureClass::ServerError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Timeout => "timeout",
            FailureClass::Connect => "connect",
            FailureClass::ServerError => "server_error",
            FailureClass::ClientError => "client_error",
            FailureClass::CircuitOpen => "circuit_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub idempotent_only: bool,
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::new(0, 0),
            idempotent_only: false,
        }
    }

    /// Total attempts allowed for a call with `method`.
    pub fn attempts_for(&self, method: &Method) -> u32 {
        if self.idempotent_only && !method.is_idempotent() {
            1
        } else {
            self.max_attempts.max(1)
        }
    }

    /// Whether another attempt should follow the `attempt`-th one.
    pub fn should_retry(&self, attempt: u32, max_attempts: u32, class: FailureClass) -> bool {
        class.is_transient() && attempt < max_attempts
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        if !config.enabled {
            return RetryPolicy::none();
        }
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::new(config.base_delay_ms, config.max_delay_ms),
            idempotent_only: config.idempotent_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(FailureClass::of_status(StatusCode::OK), None);
        assert_eq!(FailureClass::of_status(StatusCode::FOUND), None);
        assert_eq!(
            FailureClass::of_status(StatusCode::NOT_FOUND),
            Some(FailureClass::ClientError)
        );
        assert_eq!(
            FailureClass::of_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(FailureClass::ServerError)
        );
    }

    #[test]
    fn test_only_transient_failures_retry() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Backoff::new(10, 100),
            idempotent_only: false,
        };

        assert!(policy.should_retry(1, 3, FailureClass::Timeout));
        assert!(policy.should_retry(2, 3, FailureClass::Connect));
        assert!(policy.should_retry(1, 3, FailureClass::ServerError));
        assert!(!policy.should_retry(3, 3, FailureClass::ServerError));
        assert!(!policy.should_retry(1, 3, FailureClass::ClientError));
        assert!(!policy.should_retry(1, 3, FailureClass::CircuitOpen));
    }

    #[test]
    fn test_idempotent_only_limits_post() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Backoff::new(10, 100),
            idempotent_only: true,
        };
        assert_eq!(policy.attempts_for(&Method::GET), 3);
        assert_eq!(policy.attempts_for(&Method::PUT), 3);
        assert_eq!(policy.attempts_for(&Method::POST), 1);
    }

    #[test]
    fn test_disabled_config_means_single_attempt() {
        let config = RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        };
        assert_eq!(RetryPolicy::from(&config).attempts_for(&Method::GET), 1);
    }
}

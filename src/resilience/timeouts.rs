//! Timeout enforcement.
//!
//! Every outbound wait has a deadline: the per-attempt upstream timeout and
//! the whole-request deadline both go through [`enforce`].

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {}ms", .0.as_millis())]
pub struct TimedOut(pub Duration);

/// Run `fut` for at most `limit`; the future is dropped when the limit passes.
pub async fn enforce<F: Future>(limit: Duration, fut: F) -> Result<F::Output, TimedOut> {
    tokio::time::timeout(limit, fut).await.map_err(|_| TimedOut(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slow_future_times_out() {
        let slow = tokio::time::sleep(Duration::from_secs(10));
        assert_eq!(
            enforce(Duration::from_secs(5), slow).await,
            Err(TimedOut(Duration::from_secs(5)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_future_completes() {
        let fast = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            42
        };
        assert_eq!(enforce(Duration::from_secs(5), fast).await, Ok(42));
    }
}

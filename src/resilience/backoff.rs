//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms),
        }
    }

    /// Delay after the `attempt`-th failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base.as_millis() as u64, self.max.as_millis() as u64)
    }
}

/// `base * 2^(attempt-1)`, capped at `max_ms`, plus up to 10% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 || base_ms == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1 >= Duration::from_millis(100) && b1 < Duration::from_millis(110));

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2 >= Duration::from_millis(200));

        let capped = calculate_backoff(10, 100, 1000);
        assert!(capped >= Duration::from_millis(1000) && capped < Duration::from_millis(1100));
    }

    #[test]
    fn test_zero_base_disables_delay() {
        assert_eq!(Backoff::new(0, 1000).delay(3), Duration::ZERO);
        assert_eq!(calculate_backoff(0, 100, 1000), Duration::ZERO);
    }
}

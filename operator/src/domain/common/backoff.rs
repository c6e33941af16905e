use std::time::Duration;

use rand::Rng;

/// Exponential backoff with full jitter on the upper half of each window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    /// Upper bound of the delay after `failures` consecutive failures (1-based).
    pub fn ceiling(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }

    /// Delay drawn uniformly from `[ceiling / 2, ceiling]`.
    pub fn delay<G: Rng + ?Sized>(&self, failures: u32, rng: &mut G) -> Duration {
        let ceiling = self.ceiling(failures);
        let floor = ceiling / 2;
        let spread = (ceiling - floor).as_millis() as u64;
        floor + Duration::from_millis(rng.random_range(0..=spread))
    }
}

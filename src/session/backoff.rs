//! Pure capped exponential backoff with jitter

use rand::Rng;
use std::time::Duration;

/// Reconnection delay policy.
///
/// Attempt `n` (1-based) waits `base * 2^(n-1)`, never more than `max`.
/// Jitter shortens each wait by a random fraction of up to `jitter` so a fleet
/// that lost its link together does not reconnect together.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction in `[0, 1]`; zero disables jitter
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self { base, max, jitter }
    }

    /// Nominal delay before retry number `attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1);
        // 2^31 * base overflows any sane cap long before u32 runs out
        if doublings >= 31 {
            return self.max;
        }
        self.base
            .checked_mul(1u32 << doublings)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Delay following `current` when a failure happens mid-backoff
    pub fn next_delay(&self, current: Duration) -> Duration {
        current
            .checked_mul(2)
            .map_or(self.max, |delay| delay.min(self.max))
            .max(self.base.min(self.max))
    }

    /// Actual wait for a nominal delay, after jitter
    pub fn jittered<R: Rng + ?Sized>(&self, delay: Duration, rng: &mut R) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let fraction = rng.gen_range(0.0..self.jitter.min(1.0));
        delay.mul_f64(1.0 - fraction)
    }

    /// Check the policy is usable
    pub fn validate(&self) -> Result<(), String> {
        if self.base.is_zero() {
            return Err("backoff base must be greater than 0".to_string());
        }
        if self.max < self.base {
            return Err(format!(
                "backoff max ({}ms) must not be below base ({}ms)",
                self.max.as_millis(),
                self.base.as_millis()
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("jitter must be within [0, 1], got {}", self.jitter));
        }
        Ok(())
    }
}

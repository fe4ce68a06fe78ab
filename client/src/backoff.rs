use rand::Rng;
use std::time::Duration;

use crate::constants::{BACKOFF_INITIAL, BACKOFF_JITTER, BACKOFF_MAX};

/// Exponential reconnect delay with a cap and proportional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    /// Fraction of the delay randomly added or removed, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: BACKOFF_INITIAL,
            max: BACKOFF_MAX,
            jitter: BACKOFF_JITTER,
        }
    }
}

impl Backoff {
    /// Un-jittered delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn jittered<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.delay_for_attempt(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rng.random_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor).min(self.max)
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.jittered(attempt, &mut rand::rng())
    }
}

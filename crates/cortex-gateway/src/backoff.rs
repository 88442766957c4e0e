//! Capped exponential reconnect backoff with jitter.

use cortex_core::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Delay schedule for reconnect attempts.
///
/// The nth consecutive failure waits `initial * multiplier^n`, capped at
/// `max`, spread by ±`jitter`. The cap holds after jitter is applied.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: f64,
    max_ms: f64,
    multiplier: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            initial_ms: config.initial_ms as f64,
            // Never below 1ms, whatever the config says.
            max_ms: config.max_ms.max(config.initial_ms).max(1) as f64,
            multiplier: config.multiplier.max(1.0),
            jitter: if config.jitter.is_finite() {
                config.jitter.clamp(0.0, 0.99)
            } else {
                0.0
            },
            attempt: 0,
        }
    }

    /// Delay for the current attempt before jitter.
    pub fn base_delay(&self) -> Duration {
        let exp = self.attempt.min(64) as i32;
        let ms = (self.initial_ms * self.multiplier.powi(exp)).min(self.max_ms);
        Duration::from_millis(ms as u64)
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay().as_millis() as f64;
        let spread = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        let ms = (base * (1.0 + spread)).clamp(1.0, self.max_ms);

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(ms as u64)
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failed attempts so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

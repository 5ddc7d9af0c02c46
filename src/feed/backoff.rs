//! Exponential backoff for feed reconnection

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff calculator with jitter
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_delay_ms: u64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms;
        Self {
            config,
            current_delay_ms: initial,
            attempt: 0,
        }
    }

    /// Get the next delay duration.
    ///
    /// The first delay is the configured initial delay; each later one grows
    /// by `multiplier` up to `max_delay_ms`.
    pub fn next_delay(&mut self) -> Duration {
        let base = if self.attempt == 0 {
            self.current_delay_ms as f64
        } else {
            self.current_delay_ms as f64 * self.config.multiplier
        };
        self.attempt += 1;

        let capped = base.min(self.config.max_delay_ms as f64);
        self.current_delay_ms = capped.max(1.0) as u64;

        let delay = if self.config.jitter_factor > 0.0 {
            let range = capped * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-range..=range);
            (capped + jitter).max(1.0) as u64
        } else {
            self.current_delay_ms
        };

        Duration::from_millis(delay)
    }

    /// Reset the backoff after a successful (re)connection
    pub fn reset(&mut self) {
        self.current_delay_ms = self.config.initial_delay_ms;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

//! Backoff for the optimistic allocation strategy.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::config::OptimisticConfig;

/// Bounded retry policy for optimistic compare-and-swap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    builder: ExponentialBuilder,
}

impl RetryPolicy {
    /// - Min delay: `min_delay_ms`
    /// - Max delay: `max_delay_ms`
    /// - Max attempts: `max_attempts` (first attempt included)
    /// - Jitter when enabled
    pub fn from_config(config: &OptimisticConfig) -> Self {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(config.min_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
            .with_max_times(config.max_attempts.saturating_sub(1) as usize);
        if config.jitter {
            builder = builder.with_jitter();
        }

        Self {
            max_attempts: config.max_attempts.max(1),
            builder,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delays to wait between consecutive attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        self.builder.clone().build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OptimisticConfig::default())
    }
}

//! Allocator configuration types.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;
use crate::domain::TenantId;

/// First number issued in a new domain.
pub const DEFAULT_START_OFFSET: u64 = 1001;
/// Lock wait budget for a counter hold.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;
/// Attempts of the optimistic variant, including the first.
pub const DEFAULT_OPTIMISTIC_ATTEMPTS: u32 = 5;

/// How a domain's counter is protected during allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Hold the counter row until the caller's transaction ends.
    #[default]
    Pessimistic,
    /// Conditional write without a prior hold, retried with backoff.
    Optimistic,
}

/// Allocator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// The single tenant whose channels share one sequence.
    pub legacy_tenant_id: Option<i64>,
    /// First number issued in a new domain. Fixed for a domain once used.
    pub start_offset: u64,
    /// Lock wait budget in milliseconds.
    pub lock_timeout_ms: u64,
    /// Locking strategy.
    pub strategy: StrategyKind,
    /// Retry policy of the optimistic strategy.
    pub optimistic: OptimisticConfig,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            legacy_tenant_id: None,
            start_offset: DEFAULT_START_OFFSET,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            strategy: StrategyKind::default(),
            optimistic: OptimisticConfig::default(),
        }
    }
}

impl AllocatorConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Validated legacy tenant.
    pub fn legacy_tenant(&self) -> Result<Option<TenantId>, ConfigError> {
        self.legacy_tenant_id
            .map(TenantId::new)
            .transpose()
            .map_err(|e| ConfigError::Invalid(format!("allocator.legacy_tenant_id: {}", e)))
    }

    /// Reject settings the allocator cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_offset == 0 {
            return Err(ConfigError::Invalid(
                "allocator.start_offset must be positive".to_string(),
            ));
        }
        if self.start_offset > i64::MAX as u64 {
            return Err(ConfigError::Invalid(format!(
                "allocator.start_offset must not exceed {}",
                i64::MAX
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "allocator.lock_timeout_ms must be positive".to_string(),
            ));
        }
        self.legacy_tenant()?;
        self.optimistic.validate()
    }
}

/// Retry policy of the optimistic strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimisticConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub min_delay_ms: u64,
    /// Delay cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Randomize delays to spread out competing writers.
    pub jitter: bool,
}

impl Default for OptimisticConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_OPTIMISTIC_ATTEMPTS,
            min_delay_ms: 10,
            max_delay_ms: 500,
            jitter: true,
        }
    }
}

impl OptimisticConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "allocator.optimistic.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(
                "allocator.optimistic.min_delay_ms exceeds max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

//! Allocation error taxonomy.

use thiserror::Error;

/// Result alias used throughout the allocator and counter stores.
pub type Result<T> = std::result::Result<T, AllocationError>;

/// Errors surfaced by [`crate::allocator::Allocator`] and the counter stores.
///
/// The allocator only reports the kind of failure. Deciding whether to retry
/// the enclosing transaction, and what to tell the user, belongs to the
/// caller.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Tenant id not positive, or channel text not a known channel.
    #[error("Invalid domain input: {0}")]
    InvalidDomainInput(String),

    /// The domain's counter row could not be held within the wait budget.
    #[error("Lock wait timed out for domain {domain}")]
    LockTimeout { domain: String },

    /// The enclosing transaction read a snapshot that a concurrent commit has
    /// since replaced, so it can no longer write the domain's counter.
    ///
    /// Raised by SQLite when a deferred transaction that already read tries
    /// to become a writer, and by PostgreSQL serialization failures. Only a
    /// fresh transaction can succeed; SQLite callers avoid it by starting
    /// allocation transactions with `SqlCounterStore::begin`.
    #[error("Transaction snapshot is stale for domain {domain}")]
    StaleTransaction { domain: String },

    /// Optimistic compare-and-swap lost every attempt.
    #[error("Counter conflict on domain {domain} persisted after {attempts} attempts")]
    ConflictExhausted { domain: String, attempts: u32 },

    /// The backing store could not be reached or rejected the operation.
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(#[source] sqlx::Error),

    /// The counter cannot advance without leaving the storable range.
    #[error("Counter overflow on domain {domain} at {last_issued}")]
    Overflow { domain: String, last_issued: u64 },

    /// The counter row changed underneath a hold this transaction owns.
    #[error("Counter for domain {domain} changed while held")]
    HoldViolated { domain: String },
}

impl AllocationError {
    /// Whether re-running the whole enclosing transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AllocationError::LockTimeout { .. }
                | AllocationError::StaleTransaction { .. }
                | AllocationError::ConflictExhausted { .. }
        )
    }
}

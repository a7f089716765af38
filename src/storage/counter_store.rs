//! CounterStore trait definition.

use async_trait::async_trait;

use super::Result;
use crate::domain::DomainKey;

/// Interface for durable per-domain counters.
///
/// Maps a [`DomainKey`] to the last number issued in that domain. Every
/// operation runs on the caller's transactional connection (`Conn`); the
/// store never begins, commits or rolls back a transaction. Anything written
/// here becomes visible only when the caller commits, and disappears if the
/// caller rolls back.
///
/// Counters are only ever mutated through [`crate::allocator::Allocator`].
///
/// # Implementations
///
/// - `PostgresCounterStore`: PostgreSQL storage, `SELECT ... FOR UPDATE` row holds
/// - `SqliteCounterStore`: SQLite storage, database write lock as the hold
/// - `MockCounterStore`: In-memory mock for testing
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Connection the caller's transaction runs on.
    type Conn: Send;

    /// Per-allocation setup on the caller's transaction.
    ///
    /// Called once before any other operation of an allocation. Settings
    /// applied here are transaction-scoped and stay in force after
    /// `allocate` returns: on PostgreSQL, `SET LOCAL lock_timeout` also
    /// bounds every later lock wait of the caller's transaction, including
    /// its own document insert. Callers needing a different budget for
    /// their own statements set it again after allocating.
    async fn prepare(&self, _conn: &mut Self::Conn) -> Result<()> {
        Ok(())
    }

    /// Read the last issued number and hold the domain's row until the
    /// enclosing transaction ends.
    ///
    /// Blocks while another transaction holds the same domain. Returns `None`
    /// if the domain has never been used.
    async fn read_for_update(&self, conn: &mut Self::Conn, domain: &DomainKey)
        -> Result<Option<u64>>;

    /// Read the last issued number without taking a hold.
    async fn read_current(&self, conn: &mut Self::Conn, domain: &DomainKey) -> Result<Option<u64>>;

    /// Create the counter row of an unused domain with its first number.
    ///
    /// Returns `false` when the row already exists, which happens when a
    /// concurrent transaction bootstrapped the same domain first. Losing that
    /// race must not poison the caller's transaction.
    async fn create(&self, conn: &mut Self::Conn, domain: &DomainKey, first: u64) -> Result<bool>;

    /// Replace `expected` with `next` on an existing counter row.
    ///
    /// Returns `false` when the stored value is no longer `expected`.
    async fn write(
        &self,
        conn: &mut Self::Conn,
        domain: &DomainKey,
        expected: u64,
        next: u64,
    ) -> Result<bool>;
}

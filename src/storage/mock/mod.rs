//! Mock storage implementation for testing.
//!
//! Behaves like a transactional store with row holds: every domain has an
//! async lock that a [`MockTransaction`] keeps until it commits or is dropped.
//! Writes are staged on the transaction and only applied by
//! [`MockTransaction::commit`]; dropping the transaction rolls back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{CounterStore, Result};
use crate::domain::DomainKey;
use crate::error::AllocationError;

type Rows = Arc<RwLock<HashMap<DomainKey, u64>>>;

/// Transaction on a [`MockCounterStore`].
pub struct MockTransaction {
    rows: Rows,
    held: HashMap<DomainKey, OwnedMutexGuard<()>>,
    staged: HashMap<DomainKey, u64>,
}

impl MockTransaction {
    /// Apply staged writes, then release every hold.
    pub async fn commit(self) {
        let MockTransaction { rows, held, staged } = self;
        rows.write().await.extend(staged);
        drop(held);
    }

    /// Discard staged writes and release every hold.
    pub fn rollback(self) {}

    /// Whether this transaction holds the domain's row.
    pub fn holds(&self, domain: &DomainKey) -> bool {
        self.held.contains_key(domain)
    }
}

/// Mock counter store that keeps counters in memory.
pub struct MockCounterStore {
    rows: Rows,
    locks: Mutex<HashMap<DomainKey, Arc<Mutex<()>>>>,
    lock_timeout: Duration,
    unavailable: RwLock<bool>,
    fail_on_write: RwLock<bool>,
    forced_conflicts: RwLock<u32>,
    forced_stale: RwLock<u32>,
}

impl Default for MockCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCounterStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            locks: Mutex::new(HashMap::new()),
            lock_timeout,
            unavailable: RwLock::new(false),
            fail_on_write: RwLock::new(false),
            forced_conflicts: RwLock::new(0),
            forced_stale: RwLock::new(0),
        }
    }

    /// Start a transaction.
    pub fn begin(&self) -> MockTransaction {
        MockTransaction {
            rows: Arc::clone(&self.rows),
            held: HashMap::new(),
            staged: HashMap::new(),
        }
    }

    /// Committed counter value of a domain.
    pub async fn last_issued(&self, domain: &DomainKey) -> Option<u64> {
        self.rows.read().await.get(domain).copied()
    }

    /// Fail every operation as if the store could not be reached.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    /// Fail `create` and `write` after their hold has been taken.
    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    /// Make the next `count` creates or writes report a lost race.
    pub async fn force_conflicts(&self, count: u32) {
        *self.forced_conflicts.write().await = count;
    }

    /// Make the next `count` creates or writes fail as if the transaction's
    /// snapshot were older than a concurrent commit.
    pub async fn force_stale(&self, count: u32) {
        *self.forced_stale.write().await = count;
    }

    async fn check_available(&self) -> Result<()> {
        if *self.unavailable.read().await {
            return Err(AllocationError::StoreUnavailable(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    async fn check_writable(&self, domain: &DomainKey) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(AllocationError::StoreUnavailable(sqlx::Error::PoolTimedOut));
        }

        let mut stale = self.forced_stale.write().await;
        if *stale > 0 {
            *stale -= 1;
            return Err(AllocationError::StaleTransaction {
                domain: domain.to_string(),
            });
        }
        Ok(())
    }

    async fn take_forced_conflict(&self) -> bool {
        let mut remaining = self.forced_conflicts.write().await;
        if *remaining > 0 {
            *remaining -= 1;
            return true;
        }
        false
    }

    /// Take the domain's row hold for the transaction, waiting up to the lock timeout.
    async fn hold(&self, tx: &mut MockTransaction, domain: &DomainKey) -> Result<()> {
        if tx.held.contains_key(domain) {
            return Ok(());
        }

        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(*domain).or_default())
        };

        let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| AllocationError::LockTimeout {
                domain: domain.to_string(),
            })?;

        tx.held.insert(*domain, guard);
        Ok(())
    }

    /// Value visible to the transaction: its own staged write, else the committed one.
    async fn visible(&self, tx: &MockTransaction, domain: &DomainKey) -> Option<u64> {
        match tx.staged.get(domain) {
            Some(value) => Some(*value),
            None => tx.rows.read().await.get(domain).copied(),
        }
    }
}

#[async_trait]
impl CounterStore for MockCounterStore {
    type Conn = MockTransaction;

    async fn read_for_update(
        &self,
        conn: &mut MockTransaction,
        domain: &DomainKey,
    ) -> Result<Option<u64>> {
        self.check_available().await?;
        self.hold(conn, domain).await?;
        Ok(self.visible(conn, domain).await)
    }

    async fn read_current(
        &self,
        conn: &mut MockTransaction,
        domain: &DomainKey,
    ) -> Result<Option<u64>> {
        self.check_available().await?;
        Ok(self.visible(conn, domain).await)
    }

    async fn create(
        &self,
        conn: &mut MockTransaction,
        domain: &DomainKey,
        first: u64,
    ) -> Result<bool> {
        self.check_available().await?;
        self.hold(conn, domain).await?;
        self.check_writable(domain).await?;

        if self.take_forced_conflict().await || self.visible(conn, domain).await.is_some() {
            return Ok(false);
        }
        conn.staged.insert(*domain, first);
        Ok(true)
    }

    async fn write(
        &self,
        conn: &mut MockTransaction,
        domain: &DomainKey,
        expected: u64,
        next: u64,
    ) -> Result<bool> {
        self.check_available().await?;
        self.hold(conn, domain).await?;
        self.check_writable(domain).await?;

        if self.take_forced_conflict().await
            || self.visible(conn, domain).await != Some(expected)
        {
            return Ok(false);
        }
        conn.staged.insert(*domain, next);
        Ok(true)
    }
}

//! Unified SQL CounterStore implementation.
//!
//! Uses a macro to generate implementations for each SQL backend,
//! eliminating code duplication while maintaining type safety.

use std::marker::PhantomData;
use std::time::Duration;

use tracing::{error, warn};

use super::{LockFailure, SqlDatabase};
use crate::domain::DomainKey;
use crate::error::{AllocationError, Result};

/// Lock wait budget used when none is configured.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// SQL-based implementation of CounterStore.
///
/// This generic implementation works with any SQL database that implements
/// the `SqlDatabase` trait (PostgreSQL, SQLite).
pub struct SqlCounterStore<DB: SqlDatabase> {
    pool: DB::Pool,
    lock_timeout: Duration,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlCounterStore<DB> {
    /// Create a new SQL counter store with the given pool.
    pub fn new(pool: DB::Pool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            _marker: PhantomData,
        }
    }

    /// Set the lock wait budget applied to each allocation.
    ///
    /// PostgreSQL applies it with `SET LOCAL`, so it remains the caller's
    /// lock budget until the transaction ends. Backends that configure the
    /// wait on the connection (SQLite's `busy_timeout`) ignore this.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &DB::Pool {
        &self.pool
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }
}

/// Classify a database failure for one domain.
fn map_error<DB: SqlDatabase>(err: sqlx::Error, domain: &DomainKey) -> AllocationError {
    if let sqlx::Error::Database(db_err) = &err {
        match DB::lock_failure(db_err.as_ref()) {
            Some(LockFailure::Wait) => {
                warn!(
                    "Could not hold counter for domain {} ({}): {}",
                    domain,
                    db_err.code().unwrap_or_default(),
                    db_err.message()
                );
                return AllocationError::LockTimeout {
                    domain: domain.to_string(),
                };
            }
            Some(LockFailure::StaleSnapshot) => {
                warn!(
                    "Transaction snapshot is stale for domain {} ({}): {}",
                    domain,
                    db_err.code().unwrap_or_default(),
                    db_err.message()
                );
                return AllocationError::StaleTransaction {
                    domain: domain.to_string(),
                };
            }
            None => {}
        }
    }

    error!("Counter store failed for domain {}: {}", domain, err);
    AllocationError::StoreUnavailable(err)
}

/// Counter value as stored (signed 64-bit).
fn to_stored(value: u64, domain: &DomainKey) -> Result<i64> {
    i64::try_from(value).map_err(|_| AllocationError::Overflow {
        domain: domain.to_string(),
        last_issued: value,
    })
}

/// Stored counter value back to an issued number.
fn from_stored(value: i64, domain: &DomainKey) -> Result<u64> {
    u64::try_from(value).map_err(|_| {
        AllocationError::StoreUnavailable(sqlx::Error::Protocol(format!(
            "negative counter {} stored for domain {}",
            value, domain
        )))
    })
}

/// Macro to implement CounterStore for a specific SQL backend.
///
/// This eliminates duplication between PostgreSQL and SQLite implementations
/// while maintaining full type safety.
macro_rules! impl_counter_store {
    ($db_type:ty, $sqlx_db:ty, $conn_type:ty, $feature:literal) => {
        #[cfg(feature = $feature)]
        impl SqlCounterStore<$db_type> {
            /// Begin a transaction to allocate in.
            ///
            /// Callers must open allocation transactions here rather than
            /// with `pool.begin()`. On SQLite this issues `BEGIN IMMEDIATE`,
            /// so the write lock is taken (waiting up to `busy_timeout`)
            /// before the caller's own reads; a deferred transaction that
            /// reads first fails with `StaleTransaction` as soon as another
            /// connection commits.
            ///
            /// A busy database surfaces here as the backend's own
            /// `sqlx::Error` once `busy_timeout` has been spent.
            pub async fn begin(&self) -> sqlx::Result<sqlx::Transaction<'static, $sqlx_db>> {
                self.pool.begin_with(<$db_type as SqlDatabase>::BEGIN).await
            }

            /// Initialize the database schema.
            pub async fn init(&self) -> Result<()> {
                sqlx::raw_sql(<$db_type as SqlDatabase>::CREATE_COUNTERS_TABLE)
                    .execute(&self.pool)
                    .await
                    .map_err(AllocationError::StoreUnavailable)?;
                Ok(())
            }

            async fn fetch_last_issued(
                conn: &mut $conn_type,
                domain: &DomainKey,
                hold: bool,
            ) -> Result<Option<u64>> {
                use sqlx::Row;

                use super::query::select_last_issued;

                let sql = <$db_type>::build_select(select_last_issued(domain, hold));
                let row = sqlx::query(&sql)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(|e| map_error::<$db_type>(e, domain))?;

                match row {
                    Some(row) => {
                        let last_issued: i64 = row
                            .try_get(0)
                            .map_err(|e| map_error::<$db_type>(e, domain))?;
                        Ok(Some(from_stored(last_issued, domain)?))
                    }
                    None => Ok(None),
                }
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::storage::CounterStore for SqlCounterStore<$db_type> {
            type Conn = $conn_type;

            async fn prepare(&self, conn: &mut $conn_type) -> Result<()> {
                if let Some(stmt) = <$db_type>::lock_timeout_statement(self.lock_timeout) {
                    sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&stmt))
                        .await
                        .map_err(AllocationError::StoreUnavailable)?;
                }
                Ok(())
            }

            async fn read_for_update(
                &self,
                conn: &mut $conn_type,
                domain: &DomainKey,
            ) -> Result<Option<u64>> {
                use super::query::touch_counter;

                if !<$db_type as SqlDatabase>::ROW_LOCKS {
                    // Becoming a writer before reading keeps the read and the
                    // following write under one lock.
                    let sql = <$db_type>::build_update(touch_counter(domain));
                    sqlx::query(&sql)
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| map_error::<$db_type>(e, domain))?;
                }

                Self::fetch_last_issued(conn, domain, <$db_type as SqlDatabase>::ROW_LOCKS).await
            }

            async fn read_current(
                &self,
                conn: &mut $conn_type,
                domain: &DomainKey,
            ) -> Result<Option<u64>> {
                Self::fetch_last_issued(conn, domain, false).await
            }

            async fn create(
                &self,
                conn: &mut $conn_type,
                domain: &DomainKey,
                first: u64,
            ) -> Result<bool> {
                use super::query::insert_counter;

                let sql = <$db_type>::build_insert(insert_counter(domain, to_stored(first, domain)?));
                let result = sqlx::query(&sql)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| map_error::<$db_type>(e, domain))?;

                Ok(result.rows_affected() == 1)
            }

            async fn write(
                &self,
                conn: &mut $conn_type,
                domain: &DomainKey,
                expected: u64,
                next: u64,
            ) -> Result<bool> {
                use super::query::update_counter;

                let stmt = update_counter(domain, to_stored(expected, domain)?, to_stored(next, domain)?);
                let sql = <$db_type>::build_update(stmt);
                let result = sqlx::query(&sql)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| map_error::<$db_type>(e, domain))?;

                Ok(result.rows_affected() == 1)
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_counter_store!(
    super::postgres::Postgres,
    sqlx::Postgres,
    sqlx::PgConnection,
    "postgres"
);
impl_counter_store!(
    super::sqlite::Sqlite,
    sqlx::Sqlite,
    sqlx::SqliteConnection,
    "sqlite"
);

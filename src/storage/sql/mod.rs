//! Unified SQL storage implementations.
//!
//! This module provides the shared counter store for SQL-based storage
//! backends (PostgreSQL, SQLite). The implementation is parameterized by
//! database type using the `SqlDatabase` trait.

mod counter_store;
pub mod query;

pub use counter_store::SqlCounterStore;
pub use query::{LockFailure, SqlDatabase};

#[cfg(feature = "postgres")]
pub mod postgres {
    //! PostgreSQL database backend.

    use std::time::Duration;

    use sea_query::PostgresQueryBuilder;
    use sqlx::error::DatabaseError;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;

    use super::LockFailure;
    use crate::storage::schema::POSTGRES_CREATE_COUNTERS_TABLE;

    /// `lock_not_available`, raised when `lock_timeout` expires.
    const LOCK_NOT_AVAILABLE: &str = "55P03";
    /// `deadlock_detected`.
    const DEADLOCK_DETECTED: &str = "40P01";
    /// `serialization_failure`, raised under REPEATABLE READ and stricter.
    const SERIALIZATION_FAILURE: &str = "40001";

    /// PostgreSQL database marker type.
    pub struct Postgres;

    impl super::SqlDatabase for Postgres {
        type Pool = PgPool;

        const CREATE_COUNTERS_TABLE: &'static str = POSTGRES_CREATE_COUNTERS_TABLE;
        const ROW_LOCKS: bool = true;
        const BEGIN: &'static str = "BEGIN";

        fn build_select(stmt: sea_query::SelectStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }

        fn build_insert(stmt: sea_query::InsertStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }

        fn build_update(stmt: sea_query::UpdateStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }

        fn lock_timeout_statement(timeout: Duration) -> Option<String> {
            Some(format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis()))
        }

        fn lock_failure(err: &dyn DatabaseError) -> Option<LockFailure> {
            match err.code().as_deref() {
                Some(LOCK_NOT_AVAILABLE) | Some(DEADLOCK_DETECTED) => Some(LockFailure::Wait),
                Some(SERIALIZATION_FAILURE) => Some(LockFailure::StaleSnapshot),
                _ => None,
            }
        }
    }

    /// Connect a PostgreSQL pool.
    pub async fn connect(uri: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(uri)
            .await
    }

    /// PostgreSQL counter store.
    pub type PostgresCounterStore = super::SqlCounterStore<Postgres>;
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    //! SQLite database backend.

    use std::time::Duration;

    use sea_query::SqliteQueryBuilder;
    use sqlx::error::DatabaseError;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use sqlx::SqlitePool;

    use super::LockFailure;
    use crate::storage::schema::SQLITE_CREATE_COUNTERS_TABLE;

    const SQLITE_BUSY: i32 = 5;
    const SQLITE_LOCKED: i32 = 6;
    /// `SQLITE_BUSY | (2 << 8)`: a WAL reader cannot upgrade to writer
    /// because another connection committed after its snapshot.
    const SQLITE_BUSY_SNAPSHOT: i32 = 517;

    /// SQLite database marker type.
    pub struct Sqlite;

    impl super::SqlDatabase for Sqlite {
        type Pool = SqlitePool;

        const CREATE_COUNTERS_TABLE: &'static str = SQLITE_CREATE_COUNTERS_TABLE;
        const ROW_LOCKS: bool = false;
        // Take the write lock up front; the busy handler only waits for
        // locks requested before the transaction has read anything.
        const BEGIN: &'static str = "BEGIN IMMEDIATE";

        fn build_select(stmt: sea_query::SelectStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        fn build_insert(stmt: sea_query::InsertStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        fn build_update(stmt: sea_query::UpdateStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        fn lock_timeout_statement(_timeout: Duration) -> Option<String> {
            None
        }

        fn lock_failure(err: &dyn DatabaseError) -> Option<LockFailure> {
            let code = err.code()?.parse::<i32>().ok()?;
            if code == SQLITE_BUSY_SNAPSHOT {
                return Some(LockFailure::StaleSnapshot);
            }
            // Extended result codes carry the primary code in the low byte.
            matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED).then_some(LockFailure::Wait)
        }
    }

    /// Connect a SQLite pool on a database file.
    ///
    /// WAL journaling lets readers proceed while a writer holds the lock;
    /// `busy_timeout` is the lock wait budget for every connection.
    pub async fn connect(
        path: &str,
        busy_timeout: Duration,
        max_connections: u32,
    ) -> Result<SqlitePool, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path.trim_start_matches("sqlite:"))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
    }

    /// SQLite counter store.
    pub type SqliteCounterStore = super::SqlCounterStore<Sqlite>;
}

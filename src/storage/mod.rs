//! Counter storage.
//!
//! The [`CounterStore`] trait plus its SQL backends and an in-memory mock.

use std::time::Duration;

use tracing::{error, info};

use crate::config::{StorageConfig, StorageType};

pub mod counter_store;
pub mod mock;
pub mod schema;
pub mod sql;

pub use crate::error::{AllocationError, Result};
pub use counter_store::CounterStore;
pub use mock::{MockCounterStore, MockTransaction};
pub use sql::{SqlCounterStore, SqlDatabase};

#[cfg(feature = "postgres")]
pub use sql::postgres::PostgresCounterStore;
#[cfg(feature = "sqlite")]
pub use sql::sqlite::SqliteCounterStore;

/// A counter store connected to the configured backend.
pub enum Storage {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteCounterStore),
    #[cfg(feature = "postgres")]
    Postgres(PostgresCounterStore),
}

/// Initialize storage based on configuration.
///
/// Connects to the configured backend, creates the counters schema if it is
/// missing, and returns the store. `lock_timeout` is the wait budget for a
/// counter hold.
pub async fn init_storage(
    config: &StorageConfig,
    lock_timeout: Duration,
) -> std::result::Result<Storage, Box<dyn std::error::Error>> {
    match config.storage_type {
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!("Storage: sqlite at {}", config.sqlite.path);

            if let Some(parent) = std::path::Path::new(&config.sqlite.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool = sql::sqlite::connect(
                &config.sqlite.path,
                lock_timeout,
                config.sqlite.max_connections,
            )
            .await?;

            let store = SqliteCounterStore::new(pool).with_lock_timeout(lock_timeout);
            store.init().await?;
            info!("Counter schema ready (sqlite)");

            Ok(Storage::Sqlite(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
        #[cfg(feature = "postgres")]
        StorageType::Postgres => {
            info!("Storage: postgres");

            let pool =
                sql::postgres::connect(&config.postgres.uri, config.postgres.max_connections)
                    .await?;

            let store = PostgresCounterStore::new(pool).with_lock_timeout(lock_timeout);
            store.init().await?;
            info!("Counter schema ready (postgres)");

            Ok(Storage::Postgres(store))
        }
        #[cfg(not(feature = "postgres"))]
        StorageType::Postgres => {
            error!("PostgreSQL storage requested but 'postgres' feature is not enabled");
            Err("PostgreSQL feature not enabled".into())
        }
    }
}

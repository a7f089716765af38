//! docseq-migrate: counter schema setup
//!
//! Creates the `document_counters` table and its domain index on the
//! configured backend. Safe to run repeatedly.
//!
//! ## Usage
//! ```text
//! docseq-migrate [CONFIG_PATH]
//! ```
//!
//! ## Configuration
//! - DOCSEQ_CONFIG: Path to a YAML config file (optional)
//! - DOCSEQ__STORAGE__TYPE: `sqlite` or `postgres`
//! - DOCSEQ_LOG: Log filter (default: info)

use tracing::info;

use docseq::config::Config;
use docseq::storage::init_storage;
use docseq::utils::bootstrap::{connection_backoff, connect_with_retry, init_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    let lock_timeout = config.allocator.lock_timeout();

    info!(
        storage = ?config.storage.storage_type,
        "docseq-migrate starting"
    );

    let target = format!("{:?} storage", config.storage.storage_type).to_lowercase();
    connect_with_retry(&target, connection_backoff(), || {
        init_storage(&config.storage, lock_timeout)
    })
    .await?;

    info!("docseq-migrate finished");
    Ok(())
}

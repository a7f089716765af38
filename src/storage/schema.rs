//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Document counters table schema. One row per numbering domain.
#[derive(Iden)]
pub enum DocumentCounters {
    Table,
    #[iden = "domain_tenant_id"]
    DomainTenantId,
    #[iden = "domain_channel"]
    DomainChannel,
    #[iden = "last_issued"]
    LastIssued,
}

/// SQL for creating the document counters table (SQLite).
///
/// `domain_channel` is NULL for the collapsed legacy domain. The unique index
/// folds NULL into a single value so a collapsed domain cannot be created
/// twice either.
pub const SQLITE_CREATE_COUNTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS document_counters (
    domain_tenant_id INTEGER NOT NULL CHECK (domain_tenant_id > 0),
    domain_channel TEXT CHECK (domain_channel IN ('online', 'offline')),
    last_issued INTEGER NOT NULL CHECK (last_issued > 0)
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_document_counters_domain
    ON document_counters (domain_tenant_id, COALESCE(domain_channel, ''));
"#;

/// SQL for creating the document counters table (PostgreSQL).
pub const POSTGRES_CREATE_COUNTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS document_counters (
    domain_tenant_id BIGINT NOT NULL CHECK (domain_tenant_id > 0),
    domain_channel TEXT CHECK (domain_channel IN ('online', 'offline')),
    last_issued BIGINT NOT NULL CHECK (last_issued > 0)
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_document_counters_domain
    ON document_counters (domain_tenant_id, COALESCE(domain_channel, ''));
"#;

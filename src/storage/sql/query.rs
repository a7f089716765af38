//! SQL database abstraction trait and counter statements.

use std::time::Duration;

use sea_query::{
    Cond, Condition, Expr, InsertStatement, LockType, OnConflict, Query, SelectStatement,
    UpdateStatement,
};
use sqlx::error::DatabaseError;

use crate::domain::DomainKey;
use crate::storage::schema::DocumentCounters;

/// Why a database refused to let the transaction hold or write a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFailure {
    /// The wait budget ran out, or the wait was broken to resolve a deadlock.
    Wait,
    /// The transaction's snapshot predates a concurrent commit.
    StaleSnapshot,
}

/// Trait for SQL database backends.
///
/// This trait abstracts over different SQL databases (PostgreSQL, SQLite)
/// by providing the pool type, query building, and the backend's way of
/// holding a counter row.
pub trait SqlDatabase: Send + Sync + 'static {
    /// The connection pool type for this database.
    type Pool: Clone + Send + Sync;

    /// DDL creating the counters table and its domain uniqueness index.
    const CREATE_COUNTERS_TABLE: &'static str;

    /// Whether `SELECT ... FOR UPDATE` holds the selected row.
    ///
    /// Backends without row locks take their write lock with a no-op update
    /// before reading instead.
    const ROW_LOCKS: bool;

    /// Statement that opens an allocation transaction.
    ///
    /// Must take whatever lock the backend needs so that later reads and the
    /// counter write see one consistent state.
    const BEGIN: &'static str;

    /// Build a SQL query string from a sea-query SELECT statement.
    fn build_select(stmt: SelectStatement) -> String;

    /// Build a SQL query string from a sea-query INSERT statement.
    fn build_insert(stmt: InsertStatement) -> String;

    /// Build a SQL query string from a sea-query UPDATE statement.
    fn build_update(stmt: UpdateStatement) -> String;

    /// Statement bounding lock waits for the rest of the current transaction.
    ///
    /// `None` when the wait budget is a connection setting instead.
    fn lock_timeout_statement(timeout: Duration) -> Option<String>;

    /// Classify a database error that stems from concurrent access.
    ///
    /// `None` for every other error.
    fn lock_failure(err: &dyn DatabaseError) -> Option<LockFailure>;
}

/// `WHERE` condition selecting one domain's row.
fn domain_condition(domain: &DomainKey) -> Condition {
    let channel = match domain.channel() {
        Some(channel) => Expr::col(DocumentCounters::DomainChannel).eq(channel.as_str()),
        None => Expr::col(DocumentCounters::DomainChannel).is_null(),
    };

    Cond::all()
        .add(Expr::col(DocumentCounters::DomainTenantId).eq(domain.tenant().get()))
        .add(channel)
}

/// Select a domain's last issued number, optionally holding the row.
pub fn select_last_issued(domain: &DomainKey, hold: bool) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.column(DocumentCounters::LastIssued)
        .from(DocumentCounters::Table)
        .cond_where(domain_condition(domain));

    if hold {
        stmt.lock(LockType::Update);
    }

    stmt
}

/// No-op update on a domain's row; makes the transaction a writer.
pub fn touch_counter(domain: &DomainKey) -> UpdateStatement {
    Query::update()
        .table(DocumentCounters::Table)
        .value(
            DocumentCounters::LastIssued,
            Expr::col(DocumentCounters::LastIssued),
        )
        .cond_where(domain_condition(domain))
        .to_owned()
}

/// Insert a domain's first counter value; a row that already exists wins.
pub fn insert_counter(domain: &DomainKey, first: i64) -> InsertStatement {
    let channel = domain.channel().map(|channel| channel.as_str().to_string());

    Query::insert()
        .into_table(DocumentCounters::Table)
        .columns([
            DocumentCounters::DomainTenantId,
            DocumentCounters::DomainChannel,
            DocumentCounters::LastIssued,
        ])
        .values_panic([domain.tenant().get().into(), channel.into(), first.into()])
        .on_conflict(OnConflict::new().do_nothing().to_owned())
        .to_owned()
}

/// Conditionally advance a domain's counter from `expected` to `next`.
pub fn update_counter(domain: &DomainKey, expected: i64, next: i64) -> UpdateStatement {
    Query::update()
        .table(DocumentCounters::Table)
        .value(DocumentCounters::LastIssued, next)
        .cond_where(domain_condition(domain))
        .and_where(Expr::col(DocumentCounters::LastIssued).eq(expected))
        .to_owned()
}

//! docseq - per-tenant document number allocation
//!
//! Issues gap-free, monotonically increasing document numbers per numbering
//! domain (tenant and channel), inside the caller's database transaction.
//!
//! ```text
//! caller tx ──► Allocator::allocate ──► DomainResolver ──► DomainKey
//!                     │
//!                     └──► CounterStore (hold row, read, write last + 1)
//! ```
//!
//! A number is consumed only when the caller's transaction commits.

pub mod allocator;
pub mod config;
pub mod domain;
pub mod error;
pub mod storage;
pub mod utils;

pub use allocator::{Allocator, LockingStrategy, RetryPolicy};
pub use domain::{Channel, DomainKey, DomainResolver, TenantId};
pub use error::{AllocationError, Result};
pub use storage::CounterStore;

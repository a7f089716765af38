//! Document number allocation.
//!
//! [`Allocator::allocate`] issues the next number of a numbering domain on
//! the caller's transaction:
//!
//! 1. resolve `(tenant, channel)` to a [`DomainKey`]
//! 2. read the domain's counter while holding its row
//! 3. `next = last + 1`, or the start offset for an unused domain
//! 4. persist `next` and return it
//!
//! The caller embeds the number in its document and commits. Rolling back
//! undoes the counter write, so a number is only consumed when its
//! transaction commits. The allocator never commits, never rolls back, never
//! retries a lock timeout, and keeps no counter values between calls.

use std::num::NonZeroU64;

use tracing::{debug, error, info, warn};

use crate::config::{AllocatorConfig, ConfigError, StrategyKind, DEFAULT_START_OFFSET};
use crate::domain::{Channel, DomainKey, DomainResolver, TenantId};
use crate::error::{AllocationError, Result};
use crate::storage::CounterStore;

pub mod retry;

pub use retry::RetryPolicy;

/// How the counter row is protected between read and write.
#[derive(Debug, Clone, Default)]
pub enum LockingStrategy {
    /// Hold the row from the read until the caller's transaction ends.
    #[default]
    Pessimistic,
    /// Read without a hold and write only if the value is unchanged,
    /// retrying lost races with bounded backoff.
    Optimistic(RetryPolicy),
}

/// Issues document numbers per numbering domain.
pub struct Allocator<S: CounterStore> {
    store: S,
    resolver: DomainResolver,
    start_offset: u64,
    strategy: LockingStrategy,
}

impl<S: CounterStore> Allocator<S> {
    /// Pessimistic allocator starting new domains at 1001.
    pub fn new(store: S, resolver: DomainResolver) -> Self {
        Self {
            store,
            resolver,
            start_offset: DEFAULT_START_OFFSET,
            strategy: LockingStrategy::default(),
        }
    }

    /// Build an allocator from validated configuration.
    pub fn from_config(store: S, config: &AllocatorConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let strategy = match config.strategy {
            StrategyKind::Pessimistic => LockingStrategy::Pessimistic,
            StrategyKind::Optimistic => {
                LockingStrategy::Optimistic(RetryPolicy::from_config(&config.optimistic))
            }
        };

        Ok(Self {
            store,
            resolver: DomainResolver::new(config.legacy_tenant()?),
            start_offset: config.start_offset,
            strategy,
        })
    }

    /// First number issued in a domain that has never been used.
    ///
    /// Existing domains are unaffected; changing the offset of a live
    /// deployment only moves where new domains begin.
    pub fn with_start_offset(mut self, start_offset: NonZeroU64) -> Self {
        self.start_offset = start_offset.get();
        self
    }

    pub fn with_strategy(mut self, strategy: LockingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn resolver(&self) -> &DomainResolver {
        &self.resolver
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Issue the next number for `(tenant_id, channel)` on the caller's transaction.
    ///
    /// # Errors
    /// - `InvalidDomainInput`: `tenant_id` is not positive
    /// - `LockTimeout`: the domain's row could not be held in time; re-run the transaction
    /// - `StaleTransaction`: the transaction's snapshot is older than a concurrent
    ///   commit to the domain; re-run the transaction
    /// - `ConflictExhausted`: optimistic retries ran out, or the race was lost
    ///   in a way only a fresh transaction can recover from; re-run the transaction
    /// - `StoreUnavailable`: the store failed; the counter did not advance
    /// - `Overflow`: the domain's counter is exhausted
    pub async fn allocate(&self, conn: &mut S::Conn, tenant_id: i64, channel: Channel) -> Result<u64> {
        let tenant = TenantId::new(tenant_id)?;
        let domain = self.resolver.resolve(tenant, channel);

        self.store.prepare(conn).await?;

        let issued = match &self.strategy {
            LockingStrategy::Pessimistic => self.allocate_held(conn, &domain).await?,
            LockingStrategy::Optimistic(policy) => {
                self.allocate_optimistic(conn, &domain, policy).await?
            }
        };

        debug!("Issued {} in domain {}", issued, domain);
        Ok(issued)
    }

    /// Last number issued for `(tenant_id, channel)`, read without a hold.
    ///
    /// For reporting only: the value may be stale by the time it is returned
    /// and must never be used to derive a number.
    pub async fn peek(&self, conn: &mut S::Conn, tenant_id: i64, channel: Channel) -> Result<Option<u64>> {
        let tenant = TenantId::new(tenant_id)?;
        let domain = self.resolver.resolve(tenant, channel);
        self.store.read_current(conn, &domain).await
    }

    async fn allocate_held(&self, conn: &mut S::Conn, domain: &DomainKey) -> Result<u64> {
        let mut lost_bootstrap = false;

        loop {
            match self.store.read_for_update(conn, domain).await? {
                Some(last) => {
                    let next = self.successor(domain, last)?;
                    if !self.store.write(conn, domain, last, next).await? {
                        error!("Counter for domain {} moved from {} while held", domain, last);
                        return Err(AllocationError::HoldViolated {
                            domain: domain.to_string(),
                        });
                    }
                    return Ok(next);
                }
                None if lost_bootstrap => {
                    error!("Domain {} still missing after a concurrent bootstrap", domain);
                    return Err(AllocationError::HoldViolated {
                        domain: domain.to_string(),
                    });
                }
                None => {
                    if self.store.create(conn, domain, self.start_offset).await? {
                        info!("Bootstrapped domain {} at {}", domain, self.start_offset);
                        return Ok(self.start_offset);
                    }
                    // Another transaction created the row first; it exists now
                    // and can be held like any other.
                    warn!("Domain {} was bootstrapped concurrently, re-reading", domain);
                    lost_bootstrap = true;
                }
            }
        }
    }

    async fn allocate_optimistic(
        &self,
        conn: &mut S::Conn,
        domain: &DomainKey,
        policy: &RetryPolicy,
    ) -> Result<u64> {
        let mut delays = policy.delays();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.try_advance(conn, domain).await {
                Ok(Some(issued)) => return Ok(issued),
                Ok(None) => {}
                // The race is lost for good within this transaction; retrying
                // on the same snapshot cannot win.
                Err(AllocationError::StaleTransaction { .. }) => {
                    warn!(
                        "Counter conflict on domain {} needs a fresh transaction (attempt {})",
                        domain, attempt
                    );
                    return Err(AllocationError::ConflictExhausted {
                        domain: domain.to_string(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e),
            }

            match delays.next() {
                Some(delay) => {
                    warn!(
                        "Counter conflict on domain {} (attempt {}/{}). Retrying in {:?}...",
                        domain,
                        attempt,
                        policy.max_attempts(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        "Counter conflict on domain {} persisted after {} attempts",
                        domain, attempt
                    );
                    return Err(AllocationError::ConflictExhausted {
                        domain: domain.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// One compare-and-swap attempt. `None` when another writer got there first.
    async fn try_advance(&self, conn: &mut S::Conn, domain: &DomainKey) -> Result<Option<u64>> {
        match self.store.read_current(conn, domain).await? {
            Some(last) => {
                let next = self.successor(domain, last)?;
                let written = self.store.write(conn, domain, last, next).await?;
                Ok(written.then_some(next))
            }
            None => {
                let created = self.store.create(conn, domain, self.start_offset).await?;
                if created {
                    info!("Bootstrapped domain {} at {}", domain, self.start_offset);
                }
                Ok(created.then_some(self.start_offset))
            }
        }
    }

    /// `last + 1`, within the signed 64-bit range every store can hold.
    fn successor(&self, domain: &DomainKey, last: u64) -> Result<u64> {
        last.checked_add(1)
            .filter(|next| *next <= i64::MAX as u64)
            .ok_or_else(|| AllocationError::Overflow {
                domain: domain.to_string(),
                last_issued: last,
            })
    }
}

//! Allocator contract tests.
//!
//! These tests verify the allocation protocol on a real counter store.
//! Each test uses its own tenant ids so they can share one database.

use std::collections::HashSet;
use std::num::NonZeroU64;
use std::sync::Arc;

use docseq::config::OptimisticConfig;
use docseq::{
    AllocationError, Allocator, Channel, DomainResolver, LockingStrategy, RetryPolicy, TenantId,
};

use super::TestStore;

fn no_legacy() -> DomainResolver {
    DomainResolver::default()
}

fn legacy(tenant: i64) -> DomainResolver {
    DomainResolver::new(Some(TenantId::new(tenant).unwrap()))
}

/// Allocate in a fresh transaction and commit it.
pub async fn allocate_committed<S: TestStore>(
    allocator: &Allocator<S>,
    tenant: i64,
    channel: Channel,
) -> u64 {
    let mut tx = allocator.store().begin_tx().await;
    let issued = allocator
        .allocate(S::conn(&mut tx), tenant, channel)
        .await
        .expect("allocate should succeed");
    S::commit(tx).await;
    issued
}

async fn peek<S: TestStore>(allocator: &Allocator<S>, tenant: i64, channel: Channel) -> Option<u64> {
    let mut tx = allocator.store().begin_tx().await;
    let last = allocator
        .peek(S::conn(&mut tx), tenant, channel)
        .await
        .expect("peek should succeed");
    S::rollback(tx).await;
    last
}

// =============================================================================
// Sequencing
// =============================================================================

pub async fn test_first_allocation_starts_at_offset<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = make(no_legacy());

    assert_eq!(allocate_committed(&allocator, 101, Channel::Online).await, 1001);
    assert_eq!(allocate_committed(&allocator, 101, Channel::Online).await, 1002);
    assert_eq!(allocate_committed(&allocator, 101, Channel::Online).await, 1003);
}

pub async fn test_channels_are_independent<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = make(no_legacy());

    assert_eq!(allocate_committed(&allocator, 102, Channel::Online).await, 1001);
    assert_eq!(allocate_committed(&allocator, 102, Channel::Offline).await, 1001);
    assert_eq!(allocate_committed(&allocator, 102, Channel::Online).await, 1002);
    assert_eq!(allocate_committed(&allocator, 103, Channel::Online).await, 1001);
    assert_eq!(allocate_committed(&allocator, 102, Channel::Offline).await, 1002);
}

pub async fn test_legacy_tenant_shares_sequence<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = make(legacy(104));

    assert_eq!(allocate_committed(&allocator, 104, Channel::Online).await, 1001);
    assert_eq!(allocate_committed(&allocator, 104, Channel::Offline).await, 1002);
    assert_eq!(allocate_committed(&allocator, 104, Channel::Online).await, 1003);

    assert_eq!(peek(&allocator, 104, Channel::Offline).await, Some(1003));

    // Other tenants stay channel-partitioned.
    assert_eq!(allocate_committed(&allocator, 105, Channel::Online).await, 1001);
    assert_eq!(allocate_committed(&allocator, 105, Channel::Offline).await, 1001);
}

// =============================================================================
// Rollback safety
// =============================================================================

pub async fn test_rollback_reissues_number<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = make(no_legacy());

    assert_eq!(allocate_committed(&allocator, 106, Channel::Offline).await, 1001);

    let mut tx = allocator.store().begin_tx().await;
    let abandoned = allocator
        .allocate(S::conn(&mut tx), 106, Channel::Offline)
        .await
        .unwrap();
    assert_eq!(abandoned, 1002);
    S::rollback(tx).await;

    assert_eq!(allocate_committed(&allocator, 106, Channel::Offline).await, 1002);
}

pub async fn test_rollback_of_bootstrap<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = make(no_legacy());

    let mut tx = allocator.store().begin_tx().await;
    let abandoned = allocator
        .allocate(S::conn(&mut tx), 107, Channel::Online)
        .await
        .unwrap();
    assert_eq!(abandoned, 1001);
    S::rollback(tx).await;

    assert_eq!(peek(&allocator, 107, Channel::Online).await, None);
    assert_eq!(allocate_committed(&allocator, 107, Channel::Online).await, 1001);
}

pub async fn test_peek_does_not_advance<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = make(no_legacy());

    assert_eq!(peek(&allocator, 108, Channel::Online).await, None);
    allocate_committed(&allocator, 108, Channel::Online).await;
    assert_eq!(peek(&allocator, 108, Channel::Online).await, Some(1001));
    assert_eq!(peek(&allocator, 108, Channel::Online).await, Some(1001));
    assert_eq!(allocate_committed(&allocator, 108, Channel::Online).await, 1002);
}

// =============================================================================
// Failure surfaces
// =============================================================================

pub async fn test_invalid_tenant_rejected<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = make(no_legacy());

    let mut tx = allocator.store().begin_tx().await;
    let result = allocator.allocate(S::conn(&mut tx), 0, Channel::Online).await;
    assert!(matches!(result, Err(AllocationError::InvalidDomainInput(_))));

    let result = allocator.allocate(S::conn(&mut tx), -5, Channel::Offline).await;
    assert!(matches!(result, Err(AllocationError::InvalidDomainInput(_))));

    // The transaction is still usable.
    let issued = allocator
        .allocate(S::conn(&mut tx), 109, Channel::Online)
        .await
        .unwrap();
    assert_eq!(issued, 1001);
    S::commit(tx).await;
}

pub async fn test_overflow_detected<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = make(no_legacy())
        .with_start_offset(NonZeroU64::new(i64::MAX as u64).unwrap());

    assert_eq!(
        allocate_committed(&allocator, 110, Channel::Online).await,
        i64::MAX as u64
    );

    let mut tx = allocator.store().begin_tx().await;
    let result = allocator.allocate(S::conn(&mut tx), 110, Channel::Online).await;
    assert!(
        matches!(result, Err(AllocationError::Overflow { .. })),
        "expected Overflow, got {:?}",
        result
    );
    S::rollback(tx).await;

    assert_eq!(peek(&allocator, 110, Channel::Online).await, Some(i64::MAX as u64));
}

// =============================================================================
// Concurrency
// =============================================================================

async fn allocate_concurrently<S: TestStore>(
    allocator: Arc<Allocator<S>>,
    tenant: i64,
    count: usize,
) -> Vec<u64> {
    let handles: Vec<_> = (0..count)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move { allocate_committed(&allocator, tenant, Channel::Online).await })
        })
        .collect();

    let mut issued: Vec<u64> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|h| h.expect("allocation task should not panic"))
        .collect();
    issued.sort_unstable();
    issued
}

pub async fn test_concurrent_allocations_unique_and_contiguous<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = Arc::new(make(no_legacy()));
    allocate_committed(&allocator, 111, Channel::Online).await;

    let issued = allocate_concurrently(allocator, 111, 20).await;

    assert_eq!(issued, (1002..1022).collect::<Vec<u64>>());
}

pub async fn test_concurrent_first_use<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = Arc::new(make(no_legacy()));

    let issued = allocate_concurrently(allocator, 112, 10).await;

    let unique: HashSet<u64> = issued.iter().copied().collect();
    assert_eq!(unique.len(), issued.len(), "duplicate numbers: {:?}", issued);
    assert_eq!(issued, (1001..1011).collect::<Vec<u64>>());
}

pub async fn test_allocate_after_prior_read<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = Arc::new(make(no_legacy()));
    allocate_committed(&allocator, 115, Channel::Online).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move {
                let mut tx = allocator.store().begin_tx().await;
                assert!(S::count_counters(&mut tx).await >= 1);
                let issued = allocator
                    .allocate(S::conn(&mut tx), 115, Channel::Online)
                    .await;
                S::commit(tx).await;
                issued
            })
        })
        .collect();

    let mut issued = Vec::new();
    for handle in futures::future::join_all(handles).await {
        match handle.expect("allocation task should not panic") {
            Ok(n) => issued.push(n),
            Err(e) => panic!("allocation after a read failed: {:?}", e),
        }
    }
    issued.sort_unstable();

    assert_eq!(issued, (1002..1012).collect::<Vec<u64>>());
}

pub async fn test_optimistic_sequential<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let allocator = make(legacy(113)).with_strategy(LockingStrategy::Optimistic(Default::default()));

    assert_eq!(allocate_committed(&allocator, 113, Channel::Online).await, 1001);
    assert_eq!(allocate_committed(&allocator, 113, Channel::Offline).await, 1002);
    assert_eq!(allocate_committed(&allocator, 114, Channel::Offline).await, 1001);
}

pub async fn test_optimistic_concurrent<S, F>(make: &F)
where
    S: TestStore,
    F: Fn(DomainResolver) -> Allocator<S>,
{
    let policy = RetryPolicy::from_config(&OptimisticConfig {
        max_attempts: 50,
        min_delay_ms: 1,
        max_delay_ms: 20,
        jitter: true,
    });
    let allocator = Arc::new(make(no_legacy()).with_strategy(LockingStrategy::Optimistic(policy)));
    allocate_committed(&allocator, 116, Channel::Offline).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move { allocate_committed(&allocator, 116, Channel::Offline).await })
        })
        .collect();

    let mut issued: Vec<u64> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|h| h.expect("allocation task should not panic"))
        .collect();
    issued.sort_unstable();

    assert_eq!(issued, (1002..1012).collect::<Vec<u64>>());
}

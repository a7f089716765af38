//! Shared allocator integration tests.
//!
//! Tests the allocation protocol against every SQL counter store.
//! Each backend module implements [`TestStore`] and runs these test functions.

pub mod allocator_tests;

use async_trait::async_trait;

use docseq::CounterStore;

/// A counter store whose transactions the tests drive directly.
#[async_trait]
pub trait TestStore: CounterStore + Sized + 'static {
    type Tx: Send + 'static;

    /// Begin an allocation transaction the way callers are told to.
    async fn begin_tx(&self) -> Self::Tx;

    /// The connection the transaction runs on.
    fn conn(tx: &mut Self::Tx) -> &mut Self::Conn;

    async fn commit(tx: Self::Tx);

    async fn rollback(tx: Self::Tx);

    /// Read through the transaction, as a caller validating its input would.
    async fn count_counters(tx: &mut Self::Tx) -> i64;
}

/// Implement [`TestStore`] for a sqlx-backed counter store.
#[macro_export]
macro_rules! impl_test_store {
    ($store:ty, $db:ty) => {
        #[async_trait::async_trait]
        impl $crate::allocator::TestStore for $store {
            type Tx = sqlx::Transaction<'static, $db>;

            async fn begin_tx(&self) -> Self::Tx {
                self.begin().await.expect("begin should succeed")
            }

            fn conn(tx: &mut Self::Tx) -> &mut Self::Conn {
                &mut **tx
            }

            async fn commit(tx: Self::Tx) {
                tx.commit().await.expect("commit should succeed");
            }

            async fn rollback(tx: Self::Tx) {
                tx.rollback().await.expect("rollback should succeed");
            }

            async fn count_counters(tx: &mut Self::Tx) -> i64 {
                sqlx::query_scalar("SELECT count(*) FROM document_counters")
                    .fetch_one(&mut **tx)
                    .await
                    .expect("count should succeed")
            }
        }
    };
}

/// Run all allocator contract tests against an allocator factory.
///
/// `$make` is called with a `DomainResolver` and returns an `Allocator` over
/// a freshly initialized store; every test uses its own tenants.
#[macro_export]
macro_rules! run_allocator_tests {
    ($make:expr) => {
        use $crate::allocator::allocator_tests::*;

        println!("  test_first_allocation_starts_at_offset...");
        test_first_allocation_starts_at_offset(&$make).await;
        println!("  OK");

        println!("  test_channels_are_independent...");
        test_channels_are_independent(&$make).await;
        println!("  OK");

        println!("  test_legacy_tenant_shares_sequence...");
        test_legacy_tenant_shares_sequence(&$make).await;
        println!("  OK");

        println!("  test_rollback_reissues_number...");
        test_rollback_reissues_number(&$make).await;
        println!("  OK");

        println!("  test_rollback_of_bootstrap...");
        test_rollback_of_bootstrap(&$make).await;
        println!("  OK");

        println!("  test_peek_does_not_advance...");
        test_peek_does_not_advance(&$make).await;
        println!("  OK");

        println!("  test_invalid_tenant_rejected...");
        test_invalid_tenant_rejected(&$make).await;
        println!("  OK");

        println!("  test_overflow_detected...");
        test_overflow_detected(&$make).await;
        println!("  OK");

        println!("  test_concurrent_allocations_unique_and_contiguous...");
        test_concurrent_allocations_unique_and_contiguous(&$make).await;
        println!("  OK");

        println!("  test_concurrent_first_use...");
        test_concurrent_first_use(&$make).await;
        println!("  OK");

        println!("  test_allocate_after_prior_read...");
        test_allocate_after_prior_read(&$make).await;
        println!("  OK");

        println!("  test_optimistic_sequential...");
        test_optimistic_sequential(&$make).await;
        println!("  OK");

        println!("  test_optimistic_concurrent...");
        test_optimistic_concurrent(&$make).await;
        println!("  OK");
    };
}

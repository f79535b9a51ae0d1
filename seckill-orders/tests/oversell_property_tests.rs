//! Property-Based Tests for Stock Accounting
//!
//! For any initial stock and any burst of purchase attempts (users may
//! repeat), after admission and persistence:
//! - accepted submits = min(stock, distinct users)
//! - durable orders = accepted submits, one per user
//! - shared stock + accepted submits = initial stock

use std::collections::HashSet;

use proptest::prelude::*;
use seckill_test_utils::assertions::{assert_no_oversell, assert_one_order_per_user};
use seckill_test_utils::generators::{arb_purchase_burst, arb_stock};
use seckill_test_utils::TestHarness;
use tokio::runtime::Runtime;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_admission_and_persistence_agree(stock in arb_stock(), burst in arb_purchase_burst()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let harness = TestHarness::new();
            harness.create_voucher(1, stock).await.unwrap();

            let mut tasks = tokio::task::JoinSet::new();
            for user in burst.iter().copied() {
                let pipeline = harness.pipeline.clone();
                tasks.spawn(async move {
                    let ctx = seckill_test_utils::RequestContext::for_user(user.into());
                    pipeline.submit(&ctx, 1u64.into()).await.unwrap()
                });
            }
            let mut accepted = 0i64;
            while let Some(outcome) = tasks.join_next().await {
                if outcome.unwrap().is_accepted() {
                    accepted += 1;
                }
            }

            let distinct = burst.iter().collect::<HashSet<_>>().len() as i64;
            assert_eq!(accepted, stock.min(distinct));
            assert_eq!(harness.remaining(1).await.unwrap(), Some(stock - accepted));

            harness.drain().await.unwrap();
            assert_eq!(harness.records.order_count().unwrap() as i64, accepted);
            assert_no_oversell(&harness, 1, stock).await;
            assert_one_order_per_user(&harness, 1);
        });
    }
}

//! Exercises `DistributedLock` and `RecoveryJournal` against a real
//! Postgres instance, running the same sqlite-covered logic a second time
//! through the Any driver's Postgres path. The in-crate unit tests already
//! cover the CAS/rehydrate semantics against sqlite; this test is only
//! about the Postgres dialect surviving the same queries.

use arb_execution_engine::lock::DistributedLock;
use arb_execution_engine::recovery_journal::{BridgeRecoveryRecord, RecoveryJournal};
use bridge_client::data::BridgeStatus;
use chrono::Utc;
use ethers::types::{Address, U256};

#[tokio::test]
async fn lock_cas_round_trip_against_postgres() {
    let guard = db_test_harness::setup().await.expect("starting postgres container");

    let lock = DistributedLock::connect(&guard.database_url()).await.expect("connecting lock store");

    let token = lock.acquire("opp-1", None).await.unwrap().expect("should acquire uncontended");
    assert!(lock.acquire("opp-1", None).await.unwrap().is_none(), "second acquire must conflict");

    lock.release("opp-1", &token).await.unwrap();
    assert!(lock.acquire("opp-1", None).await.unwrap().is_some(), "lock should be free after release");
}

#[tokio::test]
async fn recovery_journal_rehydrates_pending_records_against_postgres() {
    let guard = db_test_harness::setup().await.expect("starting postgres container");

    let journal = RecoveryJournal::connect(&guard.database_url()).await.expect("connecting recovery journal");

    let now = Utc::now();
    let pending = BridgeRecoveryRecord {
        opportunity_id: "opp-pending".to_string(),
        bridge_id: "stargate".to_string(),
        source_chain: "ethereum".to_string(),
        dest_chain: "arbitrum".to_string(),
        source_tx_hash: None,
        recipient: Address::zero(),
        amount: U256::from(1_000_000u64),
        status: BridgeStatus::Pending,
        created_at: now,
        updated_at: now,
    };
    let completed = BridgeRecoveryRecord {
        opportunity_id: "opp-completed".to_string(),
        status: BridgeStatus::Completed,
        ..pending.clone()
    };

    journal.persist_before_submission(&pending).await.unwrap();
    journal.persist_before_submission(&completed).await.unwrap();

    let rehydrated = journal.rehydrate_pending().await.unwrap();
    assert_eq!(rehydrated.len(), 1);
    assert_eq!(rehydrated[0].opportunity_id, "opp-pending");
}

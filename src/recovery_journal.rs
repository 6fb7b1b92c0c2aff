//! Recovery Journal (C14): persists `BridgeRecoveryRecord`s before
//! source-chain submission so an orchestrator restart can rehydrate and
//! resume polling in-flight bridge legs, following a write-before-broadcast
//! idiom (insert before submission, update on each observation) through the
//! shared `retry_tx!` macro.

use bridge_client::data::BridgeStatus;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::retry_tx;

fn max_record_age() -> chrono::Duration {
    chrono::Duration::hours(24)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeRecoveryRecord {
    pub opportunity_id: String,
    pub bridge_id: String,
    pub source_chain: String,
    pub dest_chain: String,
    pub source_tx_hash: Option<H256>,
    pub recipient: Address,
    pub amount: U256,
    pub status: BridgeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct RecoveryJournal {
    pool: AnyPool,
}

impl RecoveryJournal {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(10).connect(database_url).await?;

        sqlx::query::<sqlx::Any>(
            r#"
            CREATE TABLE IF NOT EXISTS bridge_recovery_records (
                opportunity_id TEXT PRIMARY KEY,
                bridge_id TEXT NOT NULL,
                source_chain TEXT NOT NULL,
                dest_chain TEXT NOT NULL,
                source_tx_hash TEXT,
                recipient TEXT NOT NULL,
                amount TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Writes the record before the source-chain transaction is ever
    /// submitted, so a crash between submission and the first status poll
    /// is still recoverable (§3 BridgeRecoveryRecord lifecycle).
    pub async fn persist_before_submission(&self, record: &BridgeRecoveryRecord) -> anyhow::Result<()> {
        retry_tx!(self.pool, tx, {
            sqlx::query::<sqlx::Any>(
                r#"
                INSERT INTO bridge_recovery_records
                    (opportunity_id, bridge_id, source_chain, dest_chain, source_tx_hash, recipient, amount, status, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (opportunity_id) DO UPDATE SET
                    bridge_id = $2, source_tx_hash = $5, status = $8, updated_at = $10
                "#,
            )
            .bind(&record.opportunity_id)
            .bind(&record.bridge_id)
            .bind(&record.source_chain)
            .bind(&record.dest_chain)
            .bind(record.source_tx_hash.map(|h| format!("{h:#x}")))
            .bind(format!("{:#x}", record.recipient))
            .bind(record.amount.to_string())
            .bind(record.status.to_string())
            .bind(record.created_at.timestamp())
            .bind(record.updated_at.timestamp())
            .execute(&mut *tx)
            .await
            .map_err(anyhow::Error::from)?;
            Ok::<(), anyhow::Error>(())
        })
        .await
    }

    /// Fills in the source-chain transaction hash once the source leg has
    /// actually been broadcast. The record itself was already written by
    /// `persist_before_submission` with `source_tx_hash: None`.
    pub async fn attach_source_tx_hash(&self, opportunity_id: &str, source_tx_hash: H256) -> anyhow::Result<()> {
        sqlx::query::<sqlx::Any>("UPDATE bridge_recovery_records SET source_tx_hash = $1, updated_at = $2 WHERE opportunity_id = $3")
            .bind(format!("{source_tx_hash:#x}"))
            .bind(Utc::now().timestamp())
            .bind(opportunity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_status(&self, opportunity_id: &str, status: BridgeStatus) -> anyhow::Result<()> {
        sqlx::query::<sqlx::Any>(
            "UPDATE bridge_recovery_records SET status = $1, updated_at = $2 WHERE opportunity_id = $3",
        )
        .bind(status.to_string())
        .bind(Utc::now().timestamp())
        .bind(opportunity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes the record once the bridge leg reaches a terminal status
    /// (§3: deleted on terminal status).
    pub async fn delete(&self, opportunity_id: &str) -> anyhow::Result<()> {
        sqlx::query::<sqlx::Any>("DELETE FROM bridge_recovery_records WHERE opportunity_id = $1")
            .bind(opportunity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Called once at startup: returns every record still in `pending` or
    /// `bridging` status so the orchestrator can resume polling, excluding
    /// anything older than 24h (almost certainly abandoned).
    pub async fn rehydrate_pending(&self) -> anyhow::Result<Vec<BridgeRecoveryRecord>> {
        let rows: Vec<(String, String, String, String, Option<String>, String, String, String, i64, i64)> =
            sqlx::query_as(
                "SELECT opportunity_id, bridge_id, source_chain, dest_chain, source_tx_hash, recipient, amount, status, created_at, updated_at \
                 FROM bridge_recovery_records WHERE status IN ('pending', 'inflight')",
            )
            .fetch_all(&self.pool)
            .await?;

        let now = Utc::now();
        let mut records = Vec::new();
        for (opportunity_id, bridge_id, source_chain, dest_chain, source_tx_hash, recipient, amount, status, created_at, updated_at) in rows {
            let created_at = DateTime::from_timestamp(created_at, 0).unwrap_or(now);
            if now - created_at > max_record_age() {
                self.delete(&opportunity_id).await?;
                continue;
            }
            records.push(BridgeRecoveryRecord {
                opportunity_id,
                bridge_id,
                source_chain,
                dest_chain,
                source_tx_hash: source_tx_hash.and_then(|h| h.parse().ok()),
                recipient: recipient.parse().unwrap_or_default(),
                amount: U256::from_dec_str(&amount).unwrap_or_default(),
                status: parse_status(&status),
                created_at,
                updated_at: DateTime::from_timestamp(updated_at, 0).unwrap_or(now),
            });
        }
        Ok(records)
    }
}

fn parse_status(s: &str) -> BridgeStatus {
    match s {
        "completed" => BridgeStatus::Completed,
        "failed" => BridgeStatus::Failed,
        "refunded" => BridgeStatus::Refunded,
        "inflight" => BridgeStatus::Inflight,
        _ => BridgeStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(id: &str, status: BridgeStatus) -> BridgeRecoveryRecord {
        BridgeRecoveryRecord {
            opportunity_id: id.to_string(),
            bridge_id: "b1".to_string(),
            source_chain: "ethereum".to_string(),
            dest_chain: "arbitrum".to_string(),
            source_tx_hash: None,
            recipient: Address::zero(),
            amount: U256::from(1_000_000u64),
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rehydrates_pending_and_inflight_only() {
        let journal = RecoveryJournal::connect("sqlite::memory:").await.unwrap();
        journal.persist_before_submission(&sample_record("o1", BridgeStatus::Pending)).await.unwrap();
        journal.persist_before_submission(&sample_record("o2", BridgeStatus::Inflight)).await.unwrap();
        journal.persist_before_submission(&sample_record("o3", BridgeStatus::Completed)).await.unwrap();

        let pending = journal.rehydrate_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let journal = RecoveryJournal::connect("sqlite::memory:").await.unwrap();
        journal.persist_before_submission(&sample_record("o4", BridgeStatus::Pending)).await.unwrap();
        journal.delete("o4").await.unwrap();
        assert!(journal.rehydrate_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_pending_record_is_dropped_during_rehydrate() {
        let journal = RecoveryJournal::connect("sqlite::memory:").await.unwrap();
        let mut record = sample_record("o5", BridgeStatus::Pending);
        record.created_at = Utc::now() - chrono::Duration::hours(25);
        journal.persist_before_submission(&record).await.unwrap();

        let pending = journal.rehydrate_pending().await.unwrap();
        assert!(pending.is_empty());
    }
}

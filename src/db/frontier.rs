//! Frontier queue operations via direct SQLx.
//!
//! Calls the `frontier.*` SQL functions: enqueue, dequeue, ack, nack, reap,
//! expire, purge_dedup, size, outstanding, clear. Each call is one atomic
//! statement on the server.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Item, ItemId, Priority};

/// Arguments of `frontier.enqueue`.
#[derive(Debug)]
pub struct EnqueueArgs<'a> {
    pub namespace: &'a str,
    pub id: Uuid,
    pub key: &'a str,
    pub fingerprint: &'a [u8],
    pub priority: Priority,
    pub payload: &'a [u8],
    pub maxsize: i64,
    pub dedupe: bool,
    pub update_priority: bool,
    pub item_ttl_secs: i64,
    pub dedupe_ttl_secs: i64,
}

/// Raw outcome of `frontier.enqueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueRow {
    Accepted(Uuid),
    Duplicate,
    DedupedUpdated(Uuid),
    CapacityExceeded,
}

/// A row of `frontier.items` as returned by `frontier.dequeue`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRow {
    pub id: Uuid,
    pub item_key: String,
    pub fingerprint: Vec<u8>,
    pub priority: i64,
    pub payload: Vec<u8>,
    pub attempt_count: i32,
    pub enqueued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub lease_expiry: Option<DateTime<Utc>>,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: ItemId(row.id),
            key: row.item_key,
            fingerprint: row.fingerprint.into(),
            priority: row.priority,
            payload: row.payload,
            enqueued_at: row.enqueued_at,
            expires_at: row.expires_at,
            attempt_count: attempts(row.attempt_count),
        }
    }
}

/// Raw outcome of `frontier.nack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackRow {
    Requeued(u32),
    Dropped(u32),
    Stale,
}

/// One row of `frontier.reap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapRow {
    Reclaimed { id: Uuid, attempt_count: u32 },
    Dropped { id: Uuid, attempt_count: u32 },
}

fn attempts(count: i32) -> u32 {
    u32::try_from(count).unwrap_or_default()
}

fn unexpected(function: &str, outcome: &str) -> Error {
    Error::Other(format!("frontier.{function} returned unexpected outcome {outcome:?}"))
}

impl super::Db {
    /// Submit an item: dedup, capacity and insert in one transaction.
    pub async fn frontier_enqueue(&self, args: EnqueueArgs<'_>) -> Result<EnqueueRow> {
        let (outcome, id): (String, Option<Uuid>) = sqlx::query_as(
            "SELECT outcome, result_id FROM frontier.enqueue($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(args.namespace)
        .bind(args.id)
        .bind(args.key)
        .bind(args.fingerprint)
        .bind(args.priority)
        .bind(args.payload)
        .bind(args.maxsize)
        .bind(args.dedupe)
        .bind(args.update_priority)
        .bind(args.item_ttl_secs)
        .bind(args.dedupe_ttl_secs)
        .fetch_one(self.pool())
        .await?;

        match (outcome.as_str(), id) {
            ("accepted", Some(id)) => Ok(EnqueueRow::Accepted(id)),
            ("deduped_updated", Some(id)) => Ok(EnqueueRow::DedupedUpdated(id)),
            ("duplicate", _) => Ok(EnqueueRow::Duplicate),
            ("capacity_exceeded", _) => Ok(EnqueueRow::CapacityExceeded),
            (other, _) => Err(unexpected("enqueue", other)),
        }
    }

    /// Claim the next pending item. Returns None if nothing is pending.
    pub async fn frontier_dequeue(
        &self,
        namespace: &str,
        worker_id: &str,
        lease_ms: i64,
    ) -> Result<Option<ItemRow>> {
        let row = sqlx::query_as::<_, ItemRow>("SELECT * FROM frontier.dequeue($1, $2, $3)")
            .bind(namespace)
            .bind(worker_id)
            .bind(lease_ms)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    /// Delete a claimed item. false when the claim was already gone.
    pub async fn frontier_ack(&self, namespace: &str, id: Uuid) -> Result<bool> {
        let row: (bool,) = sqlx::query_as("SELECT frontier.ack($1, $2)")
            .bind(namespace)
            .bind(id)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    pub async fn frontier_nack(
        &self,
        namespace: &str,
        id: Uuid,
        max_retries: i32,
        item_ttl_secs: i64,
    ) -> Result<NackRow> {
        let (outcome, count): (String, Option<i32>) =
            sqlx::query_as("SELECT outcome, attempts FROM frontier.nack($1, $2, $3, $4)")
                .bind(namespace)
                .bind(id)
                .bind(max_retries)
                .bind(item_ttl_secs)
                .fetch_one(self.pool())
                .await?;

        match (outcome.as_str(), count) {
            ("requeued", Some(count)) => Ok(NackRow::Requeued(attempts(count))),
            ("dropped", Some(count)) => Ok(NackRow::Dropped(attempts(count))),
            ("stale", _) => Ok(NackRow::Stale),
            (other, _) => Err(unexpected("nack", other)),
        }
    }

    /// Recover every expired claim in the namespace.
    pub async fn frontier_reap(
        &self,
        namespace: &str,
        max_retries: i32,
        item_ttl_secs: i64,
    ) -> Result<Vec<ReapRow>> {
        let rows: Vec<(Uuid, String, i32)> =
            sqlx::query_as("SELECT reaped_id, outcome, attempts FROM frontier.reap($1, $2, $3)")
                .bind(namespace)
                .bind(max_retries)
                .bind(item_ttl_secs)
                .fetch_all(self.pool())
                .await?;

        rows.into_iter()
            .map(|(id, outcome, count)| {
                let attempt_count = attempts(count);
                match outcome.as_str() {
                    "reclaimed" => Ok(ReapRow::Reclaimed { id, attempt_count }),
                    "dropped" => Ok(ReapRow::Dropped { id, attempt_count }),
                    other => Err(unexpected("reap", other)),
                }
            })
            .collect()
    }

    /// Delete pending items past their TTL. Returns their IDs.
    pub async fn frontier_expire(&self, namespace: &str) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT * FROM frontier.expire($1)")
            .bind(namespace)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn frontier_purge_dedup(&self, namespace: &str) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT frontier.purge_dedup($1)")
            .bind(namespace)
            .fetch_one(self.pool())
            .await?;
        Ok(u64::try_from(row.0).unwrap_or_default())
    }

    pub async fn frontier_size(&self, namespace: &str) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT frontier.size($1)")
            .bind(namespace)
            .fetch_one(self.pool())
            .await?;
        Ok(u64::try_from(row.0).unwrap_or_default())
    }

    pub async fn frontier_outstanding(&self, namespace: &str) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT frontier.outstanding($1)")
            .bind(namespace)
            .fetch_one(self.pool())
            .await?;
        Ok(u64::try_from(row.0).unwrap_or_default())
    }

    pub async fn frontier_clear(&self, namespace: &str) -> Result<()> {
        sqlx::query("SELECT frontier.clear($1)")
            .bind(namespace)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

//! The frontier queue contract shared by every backend.
//!
//! Producers call [`FrontierQueue::enqueue`]; workers poll
//! [`FrontierQueue::dequeue`] and finish each claim with `ack` or `nack`.
//! Abandoned claims are recovered by [`FrontierQueue::reap`], normally driven
//! by a [`crate::reaper::Reaper`]. No operation blocks waiting for work.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::info;

use crate::config::{BackendKind, Config, MAX_DURATION_SECS};
use crate::db::{Db, PgQueue};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::memory::MemoryQueue;
use crate::model::{AckOutcome, EnqueueOutcome, Item, ItemId, NackOutcome, NewItem, ReapReport};

#[async_trait]
pub trait FrontierQueue: Send + Sync {
    /// Submit an item. Dedup and capacity decisions are reported in the
    /// outcome, not as errors.
    async fn enqueue(&self, new: NewItem) -> Result<EnqueueOutcome>;

    /// Claim the lowest-priority pending item (earliest arrival on ties) for
    /// `lease`. Returns `None` immediately when nothing is pending.
    async fn dequeue(&self, worker_id: &str, lease: Duration) -> Result<Option<Item>>;

    /// Finish a claim successfully and remove the item for good.
    async fn ack(&self, id: ItemId) -> Result<AckOutcome>;

    /// Give a claim back: the item returns to pending, or is dropped once it
    /// exceeds its orphan retries.
    async fn nack(&self, id: ItemId) -> Result<NackOutcome>;

    /// Pending items. Approximate under concurrent mutation on shared backends.
    async fn size(&self) -> Result<u64>;

    /// Pending plus claimed items, the figure `maxsize` bounds.
    async fn outstanding(&self) -> Result<u64>;

    /// One recovery pass: expired claims, expired pending items, stale dedup
    /// records.
    async fn reap(&self) -> Result<ReapReport>;

    /// Drop every item, claim and dedup record in this queue's namespace.
    async fn clear(&self) -> Result<()>;

    /// Stop accepting new items; later enqueues report
    /// [`EnqueueOutcome::Closed`]. Pending and claimed items can still be
    /// drained. On a shared backend this affects only this handle.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Subscribe to this queue's event stream.
    fn subscribe(&self) -> broadcast::Receiver<Event>;

    fn namespace(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now" for lease and TTL decisions in the in-process backend.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub(crate) fn lease_duration(lease: Duration) -> Result<chrono::Duration> {
    if lease.is_zero() {
        return Err(Error::InvalidLease("lease must be positive".to_string()));
    }
    if lease.as_secs() > MAX_DURATION_SECS {
        return Err(Error::InvalidLease(format!(
            "lease must be at most {MAX_DURATION_SECS} seconds"
        )));
    }
    chrono::Duration::from_std(lease).map_err(|e| Error::InvalidLease(e.to_string()))
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the backend selected by `config.backend`.
///
/// The Postgres backend connects and runs migrations before returning.
pub async fn open(config: &Config) -> Result<Arc<dyn FrontierQueue>> {
    config.validate()?;
    info!(
        backend = %config.backend,
        namespace = %config.queue.namespace,
        "opening frontier queue"
    );
    match config.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryQueue::new(config.queue.clone())?)),
        BackendKind::Postgres => {
            let db = Db::connect(&config.postgres).await?;
            db.migrate().await?;
            Ok(Arc::new(PgQueue::new(db, config.queue.clone())?))
        }
    }
}

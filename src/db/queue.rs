//! Postgres-backed frontier queue.
//!
//! Any number of processes may share a namespace. Each operation is one
//! `frontier.*` function call, so atomicity comes from the server and this
//! handle holds no queue state besides its closed flag and event bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::sync::broadcast;
use tracing::{Instrument, debug, info, warn};

use super::Db;
use super::frontier::{EnqueueArgs, EnqueueRow, NackRow, ReapRow};
use crate::config::QueueSettings;
use crate::error::{Error, Result};
use crate::event::{Event, EventBus, EventKind};
use crate::fingerprint::Fingerprinter;
use crate::model::*;
use crate::queue::{FrontierQueue, lease_duration};
use crate::telemetry::metrics;
use crate::telemetry::queue::{record_item, record_state_transition, start_operation_span};

const BACKEND: &str = "postgres";

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::Config(format!("{value} does not fit a BIGINT")))
}

#[derive(Debug)]
pub struct PgQueue {
    db: Db,
    settings: QueueSettings,
    fingerprinter: Fingerprinter,
    events: EventBus,
    closed: AtomicBool,
}

impl PgQueue {
    pub fn new(db: Db, settings: QueueSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            db,
            fingerprinter: settings.fingerprinter()?,
            events: EventBus::new(settings.namespace.clone()),
            settings,
            closed: AtomicBool::new(false),
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    fn ns(&self) -> KeyValue {
        KeyValue::new("namespace", self.settings.namespace.clone())
    }

    fn max_retries(&self) -> i32 {
        i32::try_from(self.settings.max_orphan_retries).unwrap_or(i32::MAX)
    }

    fn record_duration(&self, operation: &'static str, started: Instant) {
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[
                KeyValue::new("backend", BACKEND),
                KeyValue::new("operation", operation),
            ],
        );
    }

    fn emit_expired(&self, expired: &[ItemId]) {
        if expired.is_empty() {
            return;
        }
        metrics::items_expired().add(expired.len() as u64, &[self.ns()]);
        for id in expired {
            debug!(item = %id, "pending item expired");
            self.events.emit(EventKind::ItemExpired { id: *id });
        }
    }
}

#[async_trait]
impl FrontierQueue for PgQueue {
    async fn enqueue(&self, new: NewItem) -> Result<EnqueueOutcome> {
        let started = Instant::now();
        let span = start_operation_span(BACKEND, "enqueue", &self.settings.namespace);
        if self.is_closed() {
            debug!(key = %new.key, "enqueue on closed queue ignored");
            return Ok(EnqueueOutcome::Closed);
        }

        let fingerprint = self.fingerprinter.fingerprint(&new.key);
        let id = ItemId::new();
        let row = self
            .db
            .frontier_enqueue(EnqueueArgs {
                namespace: &self.settings.namespace,
                id: id.0,
                key: &new.key,
                fingerprint: fingerprint.as_bytes(),
                priority: new.priority,
                payload: &new.payload,
                maxsize: to_i64(self.settings.maxsize)?,
                dedupe: self.settings.dedupe,
                update_priority: self.settings.update_priority,
                item_ttl_secs: to_i64(self.settings.item_ttl)?,
                dedupe_ttl_secs: to_i64(self.settings.dedupe_ttl)?,
            })
            .instrument(span.clone())
            .await?;

        let outcome = match row {
            EnqueueRow::Accepted(id) => {
                let id = ItemId(id);
                record_item(&span, id);
                self.events.emit(EventKind::ItemEnqueued {
                    id,
                    key: new.key,
                    priority: new.priority,
                });
                EnqueueOutcome::Accepted(id)
            }
            EnqueueRow::Duplicate => {
                self.events.emit(EventKind::ItemDeduplicated {
                    key: new.key,
                    updated: None,
                });
                EnqueueOutcome::Duplicate
            }
            EnqueueRow::DedupedUpdated(id) => {
                let id = ItemId(id);
                record_item(&span, id);
                debug!(item = %id, priority = new.priority, "priority updated in place");
                self.events.emit(EventKind::ItemDeduplicated {
                    key: new.key,
                    updated: Some(id),
                });
                EnqueueOutcome::DedupedUpdated(id)
            }
            EnqueueRow::CapacityExceeded => {
                debug!(key = %new.key, maxsize = self.settings.maxsize, "queue full");
                self.events.emit(EventKind::CapacityExceeded { key: new.key });
                EnqueueOutcome::CapacityExceeded
            }
        };
        metrics::items_enqueued().add(1, &[self.ns(), KeyValue::new("outcome", outcome.label())]);
        self.record_duration("enqueue", started);
        Ok(outcome)
    }

    async fn dequeue(&self, worker_id: &str, lease: Duration) -> Result<Option<Item>> {
        let started = Instant::now();
        let lease = lease_duration(lease)?;
        let span = start_operation_span(BACKEND, "dequeue", &self.settings.namespace);

        let row = self
            .db
            .frontier_dequeue(&self.settings.namespace, worker_id, lease.num_milliseconds())
            .instrument(span.clone())
            .await?;
        self.record_duration("dequeue", started);
        let Some(row) = row else {
            return Ok(None);
        };

        let lease_expiry = row.lease_expiry.unwrap_or_else(|| Utc::now() + lease);
        let item = Item::from(row);
        record_item(&span, item.id);
        record_state_transition(&span, item.id, ItemState::Pending, ItemState::Claimed);
        metrics::items_dequeued().add(1, &[self.ns()]);
        self.events.emit(EventKind::ItemClaimed {
            id: item.id,
            worker_id: worker_id.to_string(),
            lease_expiry,
        });
        Ok(Some(item))
    }

    async fn ack(&self, id: ItemId) -> Result<AckOutcome> {
        let span = start_operation_span(BACKEND, "ack", &self.settings.namespace);
        record_item(&span, id);

        let acked = self
            .db
            .frontier_ack(&self.settings.namespace, id.0)
            .instrument(span.clone())
            .await?;
        let outcome = if acked {
            record_state_transition(&span, id, ItemState::Claimed, ItemState::Done);
            self.events.emit(EventKind::ItemAcked { id });
            AckOutcome::Acked
        } else {
            warn!(item = %id, "stale ack: claim no longer exists");
            self.events.emit(EventKind::StaleAck { id });
            AckOutcome::Stale
        };
        let result = if acked { "acked" } else { "stale" };
        metrics::items_acked().add(1, &[self.ns(), KeyValue::new("result", result)]);
        Ok(outcome)
    }

    async fn nack(&self, id: ItemId) -> Result<NackOutcome> {
        let span = start_operation_span(BACKEND, "nack", &self.settings.namespace);
        record_item(&span, id);

        let row = self
            .db
            .frontier_nack(
                &self.settings.namespace,
                id.0,
                self.max_retries(),
                to_i64(self.settings.item_ttl)?,
            )
            .instrument(span.clone())
            .await?;

        let (outcome, result) = match row {
            NackRow::Requeued(attempt_count) => {
                record_state_transition(&span, id, ItemState::Claimed, ItemState::Pending);
                self.events.emit(EventKind::ItemNacked { id, attempt_count });
                (NackOutcome::Requeued { attempt_count }, "requeued")
            }
            NackRow::Dropped(attempt_count) => {
                record_state_transition(&span, id, ItemState::Claimed, ItemState::Dropped);
                warn!(item = %id, attempt_count, "max retries exceeded, item dropped");
                metrics::items_dropped().add(1, &[self.ns(), KeyValue::new("via", "nack")]);
                self.events.emit(EventKind::MaxRetriesExceeded { id, attempt_count });
                (NackOutcome::Dropped { attempt_count }, "dropped")
            }
            NackRow::Stale => {
                warn!(item = %id, "stale nack: claim no longer exists");
                self.events.emit(EventKind::StaleNack { id });
                (NackOutcome::Stale, "stale")
            }
        };
        metrics::items_nacked().add(1, &[self.ns(), KeyValue::new("result", result)]);
        Ok(outcome)
    }

    async fn size(&self) -> Result<u64> {
        self.db.frontier_size(&self.settings.namespace).await
    }

    async fn outstanding(&self) -> Result<u64> {
        self.db.frontier_outstanding(&self.settings.namespace).await
    }

    async fn reap(&self) -> Result<ReapReport> {
        let started = Instant::now();
        let span = start_operation_span(BACKEND, "reap", &self.settings.namespace);
        let namespace = &self.settings.namespace;

        let rows = self
            .db
            .frontier_reap(namespace, self.max_retries(), to_i64(self.settings.item_ttl)?)
            .instrument(span.clone())
            .await?;
        let expired: Vec<ItemId> = self
            .db
            .frontier_expire(namespace)
            .instrument(span.clone())
            .await?
            .into_iter()
            .map(ItemId)
            .collect();
        let dedup_purged = self
            .db
            .frontier_purge_dedup(namespace)
            .instrument(span.clone())
            .await?;

        let mut report = ReapReport {
            dedup_purged,
            ..ReapReport::default()
        };
        for row in rows {
            match row {
                ReapRow::Reclaimed { id, attempt_count } => {
                    let id = ItemId(id);
                    record_state_transition(&span, id, ItemState::Claimed, ItemState::Pending);
                    info!(item = %id, attempt_count, "orphaned claim reclaimed");
                    self.events.emit(EventKind::ItemReclaimed { id, attempt_count });
                    report.reclaimed.push(id);
                }
                ReapRow::Dropped { id, attempt_count } => {
                    let id = ItemId(id);
                    record_state_transition(&span, id, ItemState::Claimed, ItemState::Dropped);
                    warn!(item = %id, attempt_count, "max retries exceeded, item dropped");
                    self.events.emit(EventKind::MaxRetriesExceeded { id, attempt_count });
                    report.dropped.push(id);
                }
            }
        }
        self.emit_expired(&expired);
        report.expired = expired;

        metrics::items_reclaimed().add(report.reclaimed.len() as u64, &[self.ns()]);
        metrics::items_dropped().add(
            report.dropped.len() as u64,
            &[self.ns(), KeyValue::new("via", "reaper")],
        );
        self.record_duration("reap", started);
        Ok(report)
    }

    async fn clear(&self) -> Result<()> {
        self.db.frontier_clear(&self.settings.namespace).await?;
        info!(namespace = %self.settings.namespace, "queue cleared");
        Ok(())
    }

    /// Other processes sharing the namespace are unaffected.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        info!(namespace = %self.settings.namespace, "queue handle closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn namespace(&self) -> &str {
        &self.settings.namespace
    }
}

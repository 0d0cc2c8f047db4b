//! In-process queue backend.
//!
//! All state lives behind one mutex, which makes every operation (including
//! the dedup test-and-set and the claim) atomic across threads and tasks
//! sharing the instance. The lock is never held across an `.await`.

mod dedup;
mod lease;
mod pending;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::QueueSettings;
use crate::error::Result;
use crate::event::{Event, EventBus, EventKind};
use crate::fingerprint::Fingerprinter;
use crate::model::*;
use crate::queue::{Clock, FrontierQueue, SystemClock, lease_duration};
use crate::telemetry::metrics;
use crate::telemetry::queue::{record_item, record_state_transition, start_operation_span};

use dedup::{DedupIndex, DedupStatus};
use lease::{Lease, LeaseManager};
use pending::PendingSet;

const BACKEND: &str = "memory";

#[derive(Debug, Default)]
struct Inner {
    pending: PendingSet,
    leases: LeaseManager,
    dedup: DedupIndex,
    next_seq: u64,
    closed: bool,
}

impl Inner {
    fn outstanding(&self) -> u64 {
        (self.pending.len() + self.leases.len()) as u64
    }

    /// Return a released claim to pending, or drop it once the new attempt
    /// count exceeds `max_retries`.
    fn requeue_or_drop(
        &mut self,
        lease: Lease,
        settings: &QueueSettings,
        now: DateTime<Utc>,
    ) -> NackOutcome {
        let Lease { claim, seq } = lease;
        let mut item = claim.item;
        item.attempt_count += 1;
        let attempt_count = item.attempt_count;
        if attempt_count > settings.max_orphan_retries {
            return NackOutcome::Dropped { attempt_count };
        }
        item.restart_ttl(now, settings.item_ttl());
        self.pending.insert(item, seq);
        NackOutcome::Requeued { attempt_count }
    }
}

/// Frontier queue held entirely in process memory.
#[derive(Debug)]
pub struct MemoryQueue {
    settings: QueueSettings,
    fingerprinter: Fingerprinter,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    events: EventBus,
}

impl MemoryQueue {
    pub fn new(settings: QueueSettings) -> Result<Self> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Create a queue that reads time from `clock` (tests drive leases and
    /// TTLs with a manual clock).
    pub fn with_clock(settings: QueueSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            fingerprinter: settings.fingerprinter()?,
            events: EventBus::new(settings.namespace.clone()),
            settings,
            clock,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Snapshot of the active claims.
    pub fn claims(&self) -> Vec<Claim> {
        self.lock().leases.claims().cloned().collect()
    }

    /// A pending item by ID, if it is currently pending.
    pub fn pending_item(&self, id: ItemId) -> Option<Item> {
        self.lock().pending.get(id).cloned()
    }

    /// Number of stored dedup records, live or not yet purged.
    pub fn dedup_records(&self) -> usize {
        self.lock().dedup.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ns(&self) -> KeyValue {
        KeyValue::new("namespace", self.settings.namespace.clone())
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

    fn emit_expired(&self, expired: &[Item]) {
        if expired.is_empty() {
            return;
        }
        metrics::items_expired().add(expired.len() as u64, &[self.ns()]);
        for item in expired {
            debug!(item = %item.id, key = %item.key, "pending item expired");
            self.events.emit(EventKind::ItemExpired { id: item.id });
        }
    }
}

#[async_trait]
impl FrontierQueue for MemoryQueue {
    async fn enqueue(&self, new: NewItem) -> Result<EnqueueOutcome> {
        let started = Instant::now();
        let span = start_operation_span(BACKEND, "enqueue", &self.settings.namespace);
        let fingerprint = self.fingerprinter.fingerprint(&new.key);
        let now = self.clock.now();

        let mut expired = Vec::new();
        let outcome = {
            let mut inner = self.lock();
            if inner.closed {
                EnqueueOutcome::Closed
            } else {
                let live = self.settings.dedupe && inner.dedup.is_live(&fingerprint, now);
                if !live && self.settings.maxsize > 0 {
                    expired = inner.pending.take_expired(now);
                }

                let full = self.settings.maxsize > 0
                    && inner.outstanding() >= self.settings.maxsize;
                if !live && full {
                    EnqueueOutcome::CapacityExceeded
                } else if self.settings.dedupe
                    && inner
                        .dedup
                        .check_and_record(&fingerprint, self.settings.dedupe_ttl(), now)
                        == DedupStatus::Duplicate
                {
                    let updated = if self.settings.update_priority {
                        inner.pending.update_priority(&fingerprint, new.priority)
                    } else {
                        None
                    };
                    match updated {
                        Some(id) => EnqueueOutcome::DedupedUpdated(id),
                        None => EnqueueOutcome::Duplicate,
                    }
                } else {
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    let item = Item {
                        id: ItemId::new(),
                        key: new.key.clone(),
                        fingerprint,
                        priority: new.priority,
                        payload: new.payload,
                        enqueued_at: now,
                        expires_at: self.settings.item_ttl().map(|ttl| now + ttl),
                        attempt_count: 0,
                    };
                    let id = item.id;
                    inner.pending.insert(item, seq);
                    EnqueueOutcome::Accepted(id)
                }
            }
        };

        self.emit_expired(&expired);
        match outcome {
            EnqueueOutcome::Accepted(id) => {
                record_item(&span, id);
                self.events.emit(EventKind::ItemEnqueued {
                    id,
                    key: new.key,
                    priority: new.priority,
                });
            }
            EnqueueOutcome::Duplicate => {
                self.events.emit(EventKind::ItemDeduplicated {
                    key: new.key,
                    updated: None,
                });
            }
            EnqueueOutcome::DedupedUpdated(id) => {
                record_item(&span, id);
                debug!(item = %id, priority = new.priority, "priority updated in place");
                self.events.emit(EventKind::ItemDeduplicated {
                    key: new.key,
                    updated: Some(id),
                });
            }
            EnqueueOutcome::CapacityExceeded => {
                debug!(key = %new.key, maxsize = self.settings.maxsize, "queue full");
                self.events.emit(EventKind::CapacityExceeded { key: new.key });
            }
            EnqueueOutcome::Closed => {
                debug!(key = %new.key, "enqueue on closed queue ignored");
            }
        }
        metrics::items_enqueued().add(1, &[self.ns(), KeyValue::new("outcome", outcome.label())]);
        self.record_duration("enqueue", started);
        Ok(outcome)
    }

    async fn dequeue(&self, worker_id: &str, lease: Duration) -> Result<Option<Item>> {
        let started = Instant::now();
        let lease = lease_duration(lease)?;
        let span = start_operation_span(BACKEND, "dequeue", &self.settings.namespace);
        let now = self.clock.now();

        let mut expired = Vec::new();
        let claim = {
            let mut inner = self.lock();
            loop {
                let Some((item, seq)) = inner.pending.pop_first() else {
                    break None;
                };
                if item.is_expired(now) {
                    expired.push(item);
                    continue;
                }
                break Some(inner.leases.claim(item, seq, worker_id, now, lease));
            }
        };

        self.emit_expired(&expired);
        let Some(claim) = claim else {
            self.record_duration("dequeue", started);
            return Ok(None);
        };

        let id = claim.item.id;
        record_item(&span, id);
        record_state_transition(&span, id, ItemState::Pending, ItemState::Claimed);
        metrics::items_dequeued().add(1, &[self.ns()]);
        self.events.emit(EventKind::ItemClaimed {
            id,
            worker_id: worker_id.to_string(),
            lease_expiry: claim.lease_expiry,
        });
        self.record_duration("dequeue", started);
        Ok(Some(claim.item))
    }

    async fn ack(&self, id: ItemId) -> Result<AckOutcome> {
        let span = start_operation_span(BACKEND, "ack", &self.settings.namespace);
        record_item(&span, id);

        let released = self.lock().leases.release(id);
        let outcome = match released {
            Some(_) => {
                record_state_transition(&span, id, ItemState::Claimed, ItemState::Done);
                self.events.emit(EventKind::ItemAcked { id });
                AckOutcome::Acked
            }
            None => {
                warn!(item = %id, "stale ack: claim no longer exists");
                self.events.emit(EventKind::StaleAck { id });
                AckOutcome::Stale
            }
        };
        let result = if outcome == AckOutcome::Acked { "acked" } else { "stale" };
        metrics::items_acked().add(1, &[self.ns(), KeyValue::new("result", result)]);
        Ok(outcome)
    }

    async fn nack(&self, id: ItemId) -> Result<NackOutcome> {
        let span = start_operation_span(BACKEND, "nack", &self.settings.namespace);
        record_item(&span, id);
        let now = self.clock.now();

        let outcome = {
            let mut inner = self.lock();
            match inner.leases.release(id) {
                Some(lease) => inner.requeue_or_drop(lease, &self.settings, now),
                None => NackOutcome::Stale,
            }
        };

        let result = match outcome {
            NackOutcome::Requeued { attempt_count } => {
                record_state_transition(&span, id, ItemState::Claimed, ItemState::Pending);
                self.events.emit(EventKind::ItemNacked { id, attempt_count });
                "requeued"
            }
            NackOutcome::Dropped { attempt_count } => {
                record_state_transition(&span, id, ItemState::Claimed, ItemState::Dropped);
                warn!(item = %id, attempt_count, "max retries exceeded, item dropped");
                metrics::items_dropped().add(1, &[self.ns(), KeyValue::new("via", "nack")]);
                self.events.emit(EventKind::MaxRetriesExceeded { id, attempt_count });
                "dropped"
            }
            NackOutcome::Stale => {
                warn!(item = %id, "stale nack: claim no longer exists");
                self.events.emit(EventKind::StaleNack { id });
                "stale"
            }
        };
        metrics::items_nacked().add(1, &[self.ns(), KeyValue::new("result", result)]);
        Ok(outcome)
    }

    async fn size(&self) -> Result<u64> {
        let (size, expired) = {
            let mut inner = self.lock();
            let expired = inner.pending.take_expired(self.clock.now());
            (inner.pending.len() as u64, expired)
        };
        self.emit_expired(&expired);
        Ok(size)
    }

    async fn outstanding(&self) -> Result<u64> {
        let (outstanding, expired) = {
            let mut inner = self.lock();
            let expired = inner.pending.take_expired(self.clock.now());
            (inner.outstanding(), expired)
        };
        self.emit_expired(&expired);
        Ok(outstanding)
    }

    async fn reap(&self) -> Result<ReapReport> {
        let started = Instant::now();
        let span = start_operation_span(BACKEND, "reap", &self.settings.namespace);
        let now = self.clock.now();

        let mut report = ReapReport::default();
        let mut recovered = Vec::new();
        let expired = {
            let mut inner = self.lock();
            for lease in inner.leases.take_expired(now) {
                let id = lease.claim.item.id;
                recovered.push((id, inner.requeue_or_drop(lease, &self.settings, now)));
            }
            report.dedup_purged = inner.dedup.purge_expired(now);
            inner.pending.take_expired(now)
        };

        for (id, outcome) in recovered {
            match outcome {
                NackOutcome::Requeued { attempt_count } => {
                    record_state_transition(&span, id, ItemState::Claimed, ItemState::Pending);
                    info!(item = %id, attempt_count, "orphaned claim reclaimed");
                    self.events.emit(EventKind::ItemReclaimed { id, attempt_count });
                    report.reclaimed.push(id);
                }
                NackOutcome::Dropped { attempt_count } => {
                    record_state_transition(&span, id, ItemState::Claimed, ItemState::Dropped);
                    warn!(item = %id, attempt_count, "max retries exceeded, item dropped");
                    self.events.emit(EventKind::MaxRetriesExceeded { id, attempt_count });
                    report.dropped.push(id);
                }
                NackOutcome::Stale => {}
            }
        }
        self.emit_expired(&expired);
        report.expired = expired.into_iter().map(|item| item.id).collect();

        metrics::items_reclaimed().add(report.reclaimed.len() as u64, &[self.ns()]);
        metrics::items_dropped().add(
            report.dropped.len() as u64,
            &[self.ns(), KeyValue::new("via", "reaper")],
        );
        self.record_duration("reap", started);
        Ok(report)
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.pending.clear();
        inner.leases.clear();
        inner.dedup.clear();
        info!(namespace = %self.settings.namespace, "queue cleared");
        Ok(())
    }

    fn close(&self) {
        self.lock().closed = true;
        info!(namespace = %self.settings.namespace, "queue closed");
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn namespace(&self) -> &str {
        &self.settings.namespace
    }
}

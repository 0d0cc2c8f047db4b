//! Structured events emitted by the queue on every state transition.
//!
//! Consumers subscribe to the event stream for dashboards, alerting or audit
//! logs. Events are informational: dropping them (no subscribers, or a lagging
//! subscriber) never affects queue behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::model::{ItemId, Priority};

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 1024;

/// A structured event emitted by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic per-queue sequence number. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub namespace: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ItemEnqueued {
        id: ItemId,
        key: String,
        priority: Priority,
    },
    ItemDeduplicated {
        key: String,
        /// Set when the pending item's priority was rewritten.
        updated: Option<ItemId>,
    },
    CapacityExceeded {
        key: String,
    },
    ItemClaimed {
        id: ItemId,
        worker_id: String,
        lease_expiry: DateTime<Utc>,
    },
    ItemAcked {
        id: ItemId,
    },
    ItemNacked {
        id: ItemId,
        attempt_count: u32,
    },
    /// An expired lease was recovered and the item is pending again.
    ItemReclaimed {
        id: ItemId,
        attempt_count: u32,
    },
    /// The item was permanently dropped after too many failed claims.
    MaxRetriesExceeded {
        id: ItemId,
        attempt_count: u32,
    },
    ItemExpired {
        id: ItemId,
    },
    StaleAck {
        id: ItemId,
    },
    StaleNack {
        id: ItemId,
    },
}

impl Event {
    /// The event as a single JSON line, `kind` tagged by `type`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Fan-out channel for queue events.
#[derive(Debug, Clone)]
pub struct EventBus {
    namespace: String,
    sender: broadcast::Sender<Event>,
    seq: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(namespace: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            namespace: namespace.into(),
            sender,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            namespace: self.namespace.clone(),
            kind,
        };
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

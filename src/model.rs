//! Core data model.
//!
//! An item is one unit of crawl work: a canonical key, a priority, and an
//! opaque payload the queue never interprets. Items move through a small
//! lifecycle (pending, claimed, then one of done, dropped or expired) and are
//! only ever in one state at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::Fingerprint;

/// Ordering value of an item. Lower values dequeue first.
pub type Priority = i64;

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A unit of crawl work held by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,

    /// Canonical identifier as submitted (usually a URL).
    pub key: String,

    /// Fixed-width hash of the canonicalized key. Pure function of `key`.
    pub fingerprint: Fingerprint,

    pub priority: Priority,

    /// Opaque to the queue.
    pub payload: Vec<u8>,

    pub enqueued_at: DateTime<Utc>,

    /// Deadline for being claimed. `None` means the item never expires.
    pub expires_at: Option<DateTime<Utc>>,

    /// Claims that ended without an ack (nack or lease expiry).
    pub attempt_count: u32,
}

impl Item {
    /// Has this item sat pending past its deadline?
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// Restart the expiry window when the item goes back to pending.
    pub(crate) fn restart_ttl(&mut self, now: DateTime<Utc>, ttl: Option<chrono::Duration>) {
        self.expires_at = ttl.map(|ttl| now + ttl);
    }
}

/// Newtype for item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Waiting for a worker.
    Pending,
    /// Held by a worker under a lease.
    Claimed,
    /// Acknowledged. Terminal.
    Done,
    /// Exceeded its orphan retries. Terminal.
    Dropped,
    /// Sat pending past its TTL. Terminal.
    Expired,
}

impl ItemState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, to),
            (Pending, Claimed)
                | (Pending, Expired)
                | (Claimed, Done)
                | (Claimed, Pending)    // nack or lease expiry
                | (Claimed, Dropped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Done | ItemState::Dropped | ItemState::Expired)
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemState::Pending => "pending",
            ItemState::Claimed => "claimed",
            ItemState::Done => "done",
            ItemState::Dropped => "dropped",
            ItemState::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

/// A time-bounded hold a worker has on a dequeued item.
///
/// Owned by the lease manager; workers refer to it through the item ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub item: Item,
    pub worker_id: String,
    pub claimed_at: DateTime<Utc>,
    pub lease_expiry: DateTime<Utc>,
}

impl Claim {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.lease_expiry
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened when an item was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New pending item created.
    Accepted(ItemId),
    /// A live dedup record exists; nothing was stored.
    Duplicate,
    /// A live dedup record exists and the pending item's priority was rewritten.
    DedupedUpdated(ItemId),
    /// The queue is at `maxsize`. The caller may retry later or drop the item.
    CapacityExceeded,
    /// The queue was closed; the item was ignored.
    Closed,
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted(_))
    }

    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            EnqueueOutcome::Accepted(_) => "accepted",
            EnqueueOutcome::Duplicate => "duplicate",
            EnqueueOutcome::DedupedUpdated(_) => "deduped_updated",
            EnqueueOutcome::CapacityExceeded => "capacity_exceeded",
            EnqueueOutcome::Closed => "closed",
        }
    }
}

/// Result of acknowledging a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    /// The claim no longer exists (already reclaimed). Not fatal.
    Stale,
}

/// Result of negatively acknowledging a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Back to pending with the new attempt count.
    Requeued { attempt_count: u32 },
    /// Exceeded `max_orphan_retries`; permanently removed.
    Dropped { attempt_count: u32 },
    /// The claim no longer exists (already reclaimed). Not fatal.
    Stale,
}

/// Summary of one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Expired claims returned to pending.
    pub reclaimed: Vec<ItemId>,
    /// Expired claims dropped after exhausting their retries.
    pub dropped: Vec<ItemId>,
    /// Pending items removed for outliving `item_ttl`.
    pub expired: Vec<ItemId>,
    /// Dedup records whose retention elapsed.
    pub dedup_purged: u64,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty()
            && self.dropped.is_empty()
            && self.expired.is_empty()
            && self.dedup_purged == 0
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for submitting new items. The queue's public API for producers.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub(crate) key: String,
    pub(crate) priority: Priority,
    pub(crate) payload: Vec<u8>,
}

impl NewItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            priority: 0,
            payload: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

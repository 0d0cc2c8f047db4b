//! In-process dedup index: fingerprint to last-seen time, with optional TTL.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::fingerprint::Fingerprint;

/// Result of a dedup test-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DedupStatus {
    /// No live record existed; one now does.
    New,
    /// A live record existed and was refreshed.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DedupRecord {
    pub last_seen_at: DateTime<Utc>,
    /// `None` means the record never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl DedupRecord {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

#[derive(Debug, Default)]
pub(crate) struct DedupIndex {
    records: HashMap<Fingerprint, DedupRecord>,
}

impl DedupIndex {
    pub fn is_live(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> bool {
        self.records
            .get(fingerprint)
            .is_some_and(|record| record.is_live(now))
    }

    /// Test-and-set. Every call refreshes the record, duplicates included.
    /// `ttl = None` records never expire.
    pub fn check_and_record(
        &mut self,
        fingerprint: &Fingerprint,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> DedupStatus {
        let status = if self.is_live(fingerprint, now) {
            DedupStatus::Duplicate
        } else {
            DedupStatus::New
        };
        self.records.insert(
            fingerprint.clone(),
            DedupRecord {
                last_seen_at: now,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        status
    }

    /// Delete records whose retention elapsed. Returns how many went.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> u64 {
        let before = self.records.len();
        self.records.retain(|_, record| record.is_live(now));
        (before - self.records.len()) as u64
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

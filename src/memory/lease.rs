//! In-process lease manager. Exclusively owns every active claim.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::model::{Claim, Item, ItemId};

/// An active claim plus the arrival sequence the item returns with.
#[derive(Debug, Clone)]
pub(crate) struct Lease {
    pub claim: Claim,
    pub seq: u64,
}

#[derive(Debug, Default)]
pub(crate) struct LeaseManager {
    active: HashMap<ItemId, Lease>,
}

impl LeaseManager {
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn claim(
        &mut self,
        item: Item,
        seq: u64,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Claim {
        let id = item.id;
        let lease = Lease {
            claim: Claim {
                item,
                worker_id: worker_id.to_string(),
                claimed_at: now,
                lease_expiry: now + lease,
            },
            seq,
        };
        let claim = lease.claim.clone();
        self.active.insert(id, lease);
        claim
    }

    /// End a claim (ack or nack). `None` if it was already reclaimed.
    pub fn release(&mut self, id: ItemId) -> Option<Lease> {
        self.active.remove(&id)
    }

    /// Remove and return every claim whose lease elapsed before `now`.
    pub fn take_expired(&mut self, now: DateTime<Utc>) -> Vec<Lease> {
        let expired: Vec<ItemId> = self
            .active
            .values()
            .filter(|lease| lease.claim.is_expired(now))
            .map(|lease| lease.claim.item.id)
            .collect();
        let mut leases: Vec<Lease> = expired
            .into_iter()
            .filter_map(|id| self.active.remove(&id))
            .collect();
        leases.sort_by_key(|lease| lease.seq);
        leases
    }

    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.active.values().map(|lease| &lease.claim)
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

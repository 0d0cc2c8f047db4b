//! Ordered set of pending items.
//!
//! Ordered by `(priority, seq)` where `seq` is the arrival sequence, so equal
//! priorities dequeue FIFO. A priority rewrite keeps the original `seq`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::fingerprint::Fingerprint;
use crate::model::{Item, ItemId, Priority};

#[derive(Debug, Default)]
pub(crate) struct PendingSet {
    order: BTreeMap<(Priority, u64), ItemId>,
    entries: HashMap<ItemId, (Item, u64)>,
    /// Pending items per fingerprint, in insertion order. A requeued item is
    /// appended again, so this is not arrival order.
    by_fingerprint: HashMap<Fingerprint, Vec<ItemId>>,
}

impl PendingSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn insert(&mut self, item: Item, seq: u64) {
        self.order.insert((item.priority, seq), item.id);
        self.by_fingerprint
            .entry(item.fingerprint.clone())
            .or_default()
            .push(item.id);
        self.entries.insert(item.id, (item, seq));
    }

    /// Remove and return the first item in dequeue order with its `seq`.
    pub fn pop_first(&mut self) -> Option<(Item, u64)> {
        let (_, id) = self.order.pop_first()?;
        self.detach(id)
    }

    pub fn remove(&mut self, id: ItemId) -> Option<(Item, u64)> {
        let (item, seq) = self.entries.get(&id)?;
        self.order.remove(&(item.priority, *seq));
        self.detach(id)
    }

    fn detach(&mut self, id: ItemId) -> Option<(Item, u64)> {
        let (item, seq) = self.entries.remove(&id)?;
        if let Some(ids) = self.by_fingerprint.get_mut(&item.fingerprint) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_fingerprint.remove(&item.fingerprint);
            }
        }
        Some((item, seq))
    }

    /// Rewrite the priority of the pending item with `fingerprint` and the
    /// highest arrival `seq`. Returns its ID, or `None` if no such item is
    /// pending.
    pub fn update_priority(
        &mut self,
        fingerprint: &Fingerprint,
        priority: Priority,
    ) -> Option<ItemId> {
        let (_, id) = self
            .by_fingerprint
            .get(fingerprint)?
            .iter()
            .filter_map(|id| self.entries.get(id).map(|(_, seq)| (*seq, *id)))
            .max_by_key(|(seq, _)| *seq)?;
        let (item, seq) = self.entries.get_mut(&id)?;
        self.order.remove(&(item.priority, *seq));
        item.priority = priority;
        self.order.insert((priority, *seq), id);
        Some(id)
    }

    /// Remove every item whose TTL has elapsed.
    pub fn take_expired(&mut self, now: DateTime<Utc>) -> Vec<Item> {
        let expired: Vec<ItemId> = self
            .entries
            .values()
            .filter(|(item, _)| item.is_expired(now))
            .map(|(item, _)| item.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.remove(id).map(|(item, _)| item))
            .collect()
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.entries.get(&id).map(|(item, _)| item)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
        self.by_fingerprint.clear();
    }
}

//! modq store: canonical item map, coalescing mutation queue, and the
//! debounced scheduler that is the single writer to both.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use modq_core::{Item, ItemId, ItemPatch, Mutation};
use rustc_hash::FxHashMap;

mod scheduler;

pub use scheduler::{spawn_scheduler, SchedulerConfig, SchedulerHandle, Subscription};

/// Queue of pending mutations in arrival order.
///
/// An `Update` is folded into the queued mutation for the same id when that
/// mutation is itself the id's most recent entry and an `Update`. Nothing is
/// ever reordered across an `Add`/`Remove` of the same id.
#[derive(Default)]
pub struct MutationQueue {
    entries: VecDeque<Mutation>,
    /// Sequence number of `entries[0]`.
    head_seq: u64,
    /// Most recent queued sequence number per id.
    last: FxHashMap<ItemId, u64>,
    coalesced: u64,
}

impl MutationQueue {
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn coalesced(&self) -> u64 { self.coalesced }

    pub fn push(&mut self, m: Mutation) {
        let id = m.id();
        match m {
            Mutation::Update(patch) => {
                if let Some(slot) = self.mergeable_slot(id) {
                    slot.merge(patch);
                    self.coalesced += 1;
                } else {
                    self.push_back(Mutation::Update(patch));
                }
            }
            other => self.push_back(other),
        }
    }

    fn mergeable_slot(&mut self, id: ItemId) -> Option<&mut ItemPatch> {
        let seq = *self.last.get(&id)?;
        let idx = seq.checked_sub(self.head_seq)? as usize;
        match self.entries.get_mut(idx) {
            Some(Mutation::Update(p)) => Some(p),
            _ => None,
        }
    }

    fn push_back(&mut self, m: Mutation) {
        let seq = self.head_seq + self.entries.len() as u64;
        self.last.insert(m.id(), seq);
        self.entries.push_back(m);
    }

    /// Pop up to `max` mutations from the front.
    pub fn drain(&mut self, max: usize) -> Vec<Mutation> {
        let n = max.min(self.entries.len());
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            if let Some(m) = self.entries.pop_front() {
                let seq = self.head_seq;
                self.head_seq += 1;
                let id = m.id();
                if self.last.get(&id) == Some(&seq) { self.last.remove(&id); }
                out.push(m);
            }
        }
        out
    }

    /// Drop everything queued; returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.head_seq += n as u64;
        self.entries.clear();
        self.last.clear();
        n
    }
}

/// Grouped result of one flush; lists only records that actually changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushBatch {
    pub epoch: u64,
    pub added: Vec<Item>,
    pub updated: Vec<Item>,
    pub removed: Vec<ItemId>,
}

impl FlushBatch {
    pub fn is_empty(&self) -> bool { self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty() }
    pub fn len(&self) -> usize { self.added.len() + self.updated.len() + self.removed.len() }
}

/// Immutable view of the store published after each flush.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub epoch: u64,
    pub items: FxHashMap<ItemId, Item>,
}

impl StoreSnapshot {
    pub fn get(&self, id: ItemId) -> Option<&Item> { self.items.get(&id) }
    pub fn contains(&self, id: ItemId) -> bool { self.items.contains_key(&id) }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn values(&self) -> impl Iterator<Item = &Item> { self.items.values() }
}

/// What a single write did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Added,
    Updated,
    Unchanged,
    Removed,
    Missing,
}

/// Id-keyed item map. At most one record per id.
#[derive(Default)]
pub struct ItemStore {
    epoch: u64,
    items: FxHashMap<ItemId, Item>,
}

impl ItemStore {
    pub fn new() -> Self { Self::default() }

    pub fn epoch(&self) -> u64 { self.epoch }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn get(&self, id: ItemId) -> Option<&Item> { self.items.get(&id) }
    pub fn values(&self) -> impl Iterator<Item = &Item> { self.items.values() }

    /// Insert or replace by id. An existing terminal status is kept when the
    /// incoming record says `Pending`.
    pub fn upsert(&mut self, item: Item) -> Applied {
        match self.items.get_mut(&item.id) {
            Some(cur) => {
                let status = cur.status.reconcile(item.status);
                let next = Item { status, ..item };
                if *cur == next { return Applied::Unchanged; }
                *cur = next;
                Applied::Updated
            }
            None => {
                self.items.insert(item.id, item);
                Applied::Added
            }
        }
    }

    pub fn patch(&mut self, patch: &ItemPatch) -> Applied {
        match self.items.get_mut(&patch.id) {
            Some(cur) => if patch.apply_to(cur) { Applied::Updated } else { Applied::Unchanged },
            None => Applied::Missing,
        }
    }

    pub fn remove(&mut self, id: ItemId) -> Applied {
        if self.items.remove(&id).is_some() { Applied::Removed } else { Applied::Missing }
    }

    /// Apply mutations in order and bump the epoch.
    pub fn apply_mutations(&mut self, batch: Vec<Mutation>) -> FlushBatch {
        let mut out = FlushBatch::default();
        for m in batch {
            match m {
                Mutation::Add(item) => {
                    let id = item.id;
                    match self.upsert(item) {
                        Applied::Added => out.added.extend(self.items.get(&id).cloned()),
                        Applied::Updated => out.updated.extend(self.items.get(&id).cloned()),
                        _ => {}
                    }
                }
                Mutation::Update(patch) => {
                    if self.patch(&patch) == Applied::Updated {
                        out.updated.extend(self.items.get(&patch.id).cloned());
                    }
                }
                Mutation::Remove(id) => {
                    if self.remove(id) == Applied::Removed { out.removed.push(id); }
                }
            }
        }
        self.epoch = self.epoch.saturating_add(1);
        out.epoch = self.epoch;
        out
    }

    pub fn freeze(&self) -> Arc<StoreSnapshot> {
        Arc::new(StoreSnapshot { epoch: self.epoch, items: self.items.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use modq_core::{MediaList, Status};

    fn item(id: ItemId, status: Status) -> Item {
        Item { id, status, content: Some(format!("m{}", id)), media: MediaList::new(), is_flagged: false, created_at: Utc::now() }
    }

    #[test]
    fn queue_merges_consecutive_updates_per_id() {
        let mut q = MutationQueue::default();
        q.push(Mutation::Update(ItemPatch::status(1, Status::Approved)));
        q.push(Mutation::Update(ItemPatch::status(2, Status::Approved)));
        q.push(Mutation::Update(ItemPatch::status(1, Status::Rejected)));
        assert_eq!(q.len(), 2);
        assert_eq!(q.coalesced(), 1);
        let out = q.drain(10);
        assert_eq!(out[0], Mutation::Update(ItemPatch::status(1, Status::Rejected)));
    }

    #[test]
    fn queue_does_not_merge_across_remove() {
        let mut q = MutationQueue::default();
        q.push(Mutation::Update(ItemPatch::status(1, Status::Approved)));
        q.push(Mutation::Remove(1));
        q.push(Mutation::Update(ItemPatch::status(1, Status::Rejected)));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn queue_drain_respects_max_and_clears_index() {
        let mut q = MutationQueue::default();
        for id in 0..5 { q.push(Mutation::Update(ItemPatch::status(id, Status::Approved))); }
        assert_eq!(q.drain(3).len(), 3);
        // id 0 was drained, so a new update for it must queue fresh
        q.push(Mutation::Update(ItemPatch::status(0, Status::Rejected)));
        assert_eq!(q.len(), 3);
        // id 4 still queued, merges
        q.push(Mutation::Update(ItemPatch::status(4, Status::Rejected)));
        assert_eq!(q.len(), 3);
        assert_eq!(q.clear(), 3);
        assert!(q.is_empty());
    }

    #[test]
    fn upsert_keeps_single_record_and_terminal_status() {
        let mut s = ItemStore::new();
        assert_eq!(s.upsert(item(1, Status::Pending)), Applied::Added);
        assert_eq!(s.upsert(item(1, Status::Approved)), Applied::Updated);
        assert_eq!(s.upsert(item(1, Status::Pending)), Applied::Unchanged);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(1).map(|i| i.status), Some(Status::Approved));
    }

    #[test]
    fn apply_mutations_groups_by_kind() {
        let mut s = ItemStore::new();
        let b = s.apply_mutations(vec![
            Mutation::Add(item(1, Status::Pending)),
            Mutation::Add(item(2, Status::Pending)),
            Mutation::Update(ItemPatch::status(1, Status::Approved)),
            Mutation::Update(ItemPatch::status(9, Status::Approved)),
            Mutation::Remove(2),
            Mutation::Remove(3),
        ]);
        assert_eq!(b.epoch, 1);
        assert_eq!(b.added.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(b.updated.len(), 1);
        assert_eq!(b.updated[0].status, Status::Approved);
        assert_eq!(b.removed, vec![2]);
        assert!(s.get(2).is_none());
        assert!(s.get(9).is_none());
    }

    #[test]
    fn repeated_status_update_is_a_noop() {
        let mut s = ItemStore::new();
        s.upsert(item(1, Status::Pending));
        let first = s.apply_mutations(vec![Mutation::Update(ItemPatch::status(1, Status::Rejected))]);
        let after_once = s.get(1).cloned();
        let second = s.apply_mutations(vec![Mutation::Update(ItemPatch::status(1, Status::Rejected))]);
        assert_eq!(first.updated.len(), 1);
        assert!(second.is_empty());
        assert_eq!(s.get(1).cloned(), after_once);
    }
}

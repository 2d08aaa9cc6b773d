//! modq view helpers. Read-only consumers of the store: nothing here
//! writes back.

#![forbid(unsafe_code)]

use std::cmp::Ordering;

use modq_core::{Filter, Item, ItemId};
use modq_store::StoreSnapshot;

mod window;

pub use window::{compute_window, Window, WindowedList};

/// Filtered rows of one store snapshot, newest first.
#[derive(Debug, Clone, Default)]
pub struct QueueView {
    pub epoch: u64,
    rows: Vec<Item>,
}

fn newest_first(a: &Item, b: &Item) -> Ordering { b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)) }

impl QueueView {
    pub fn project(snap: &StoreSnapshot, filter: &Filter) -> Self {
        let mut rows: Vec<Item> = snap.values().filter(|i| filter.matches(i)).cloned().collect();
        rows.sort_unstable_by(newest_first);
        Self { epoch: snap.epoch, rows }
    }

    pub fn rows(&self) -> &[Item] { &self.rows }
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
    pub fn ids(&self) -> Vec<ItemId> { self.rows.iter().map(|i| i.id).collect() }
    pub fn position(&self, id: ItemId) -> Option<usize> { self.rows.iter().position(|i| i.id == id) }
}

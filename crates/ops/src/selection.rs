#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use modq_core::ItemId;
use modq_store::StoreSnapshot;
use rustc_hash::FxHashSet;

/// Ids the user picked for a bulk action, in the order they were picked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    order: Vec<ItemId>,
    set: FxHashSet<ItemId>,
}

impl SelectionSet {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.order.len() }
    pub fn is_empty(&self) -> bool { self.order.is_empty() }
    pub fn contains(&self, id: ItemId) -> bool { self.set.contains(&id) }
    pub fn ids(&self) -> Vec<ItemId> { self.order.clone() }

    pub fn select(&mut self, id: ItemId) -> bool {
        if !self.set.insert(id) { return false; }
        self.order.push(id);
        true
    }

    pub fn deselect(&mut self, id: ItemId) -> bool {
        if !self.set.remove(&id) { return false; }
        self.order.retain(|x| *x != id);
        true
    }

    /// Flip membership; returns whether `id` is selected afterwards.
    pub fn toggle(&mut self, id: ItemId) -> bool {
        if self.deselect(id) { false } else { self.select(id) }
    }

    /// Add every visible row.
    pub fn select_all(&mut self, visible: impl IntoIterator<Item = ItemId>) -> usize {
        visible.into_iter().filter(|id| self.select(*id)).count()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.set.clear();
    }

    /// Drop `ids` from the selection.
    pub fn remove_all(&mut self, ids: &[ItemId]) -> usize {
        let before = self.order.len();
        for id in ids { self.set.remove(id); }
        let set = &self.set;
        self.order.retain(|x| set.contains(x));
        before - self.order.len()
    }

    /// Forget ids that are no longer in the store.
    pub fn retain_present(&mut self, snap: &StoreSnapshot) -> usize {
        let before = self.order.len();
        self.set.retain(|id| snap.contains(*id));
        let set = &self.set;
        self.order.retain(|x| set.contains(x));
        before - self.order.len()
    }
}

/// Selection shared between the view and the batch executor.
#[derive(Debug, Clone, Default)]
pub struct SharedSelection(Arc<Mutex<SelectionSet>>);

impl SharedSelection {
    pub fn new() -> Self { Self::default() }

    pub fn lock(&self) -> MutexGuard<'_, SelectionSet> {
        match self.0.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn ids(&self) -> Vec<ItemId> { self.lock().ids() }
    pub fn len(&self) -> usize { self.lock().len() }
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }
}

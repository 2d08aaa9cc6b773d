#![forbid(unsafe_code)]

use modq_core::{Filter, Item, ItemId};
use rustc_hash::FxHashSet;

/// Position within the listing for one filter, plus every id already
/// materialised under it.
#[derive(Debug, Clone)]
pub struct Cursor {
    filter: Filter,
    page_index: usize,
    page_size: usize,
    has_more: bool,
    seen: FxHashSet<ItemId>,
    generation: u64,
}

/// Result of folding one page into the cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accepted {
    pub fresh: Vec<Item>,
    pub duplicates: usize,
}

impl Cursor {
    pub fn new(filter: Filter, page_size: usize) -> Self {
        Self { filter, page_index: 0, page_size: page_size.max(1), has_more: true, seen: FxHashSet::default(), generation: 0 }
    }

    pub fn filter(&self) -> &Filter { &self.filter }
    pub fn page_index(&self) -> usize { self.page_index }
    pub fn page_size(&self) -> usize { self.page_size }
    pub fn has_more(&self) -> bool { self.has_more }
    pub fn generation(&self) -> u64 { self.generation }
    pub fn seen_len(&self) -> usize { self.seen.len() }
    pub fn has_seen(&self, id: ItemId) -> bool { self.seen.contains(&id) }

    /// Start over under `filter`. Bumps the generation so in-flight pages
    /// for the old filter are recognised as stale.
    pub fn reset(&mut self, filter: Filter) -> u64 {
        self.filter = filter;
        self.page_index = 0;
        self.has_more = true;
        self.seen.clear();
        self.generation += 1;
        self.generation
    }

    /// Fold a page that was requested with `requested` rows. `has_more`
    /// follows the raw row count, before duplicates are dropped.
    pub fn accept(&mut self, items: Vec<Item>, requested: usize) -> Accepted {
        self.has_more = items.len() == requested;
        self.page_index += 1;
        let mut out = Accepted::default();
        for it in items {
            if self.seen.insert(it.id) { out.fresh.push(it); } else { out.duplicates += 1; }
        }
        out
    }
}

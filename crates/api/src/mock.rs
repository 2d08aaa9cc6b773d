//! In-memory `ItemSource` for tests and offline demos.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use modq_core::{Filter, Item, ItemId, MediaList, QueueStats, Status};

use crate::{ApiError, ApiResult, BatchResponse, ItemSource, MutateOneResponse, Page, ReviewAction};

/// Deterministic sample item; newer ids sort first by creation time.
pub fn item(id: ItemId, status: Status) -> Item {
    let created_at = Utc.timestamp_opt(1_700_000_000 + id as i64, 0).single().unwrap_or_else(Utc::now);
    Item { id, status, content: Some(format!("message {}", id)), media: MediaList::new(), is_flagged: false, created_at }
}

#[derive(Default)]
struct State {
    items: Vec<Item>,
    scripted_pages: VecDeque<ApiResult<Page>>,
    batch_failures: HashMap<usize, ApiError>,
    short_batches: HashMap<usize, usize>,
    page_calls: Vec<(Filter, usize, usize)>,
    batch_calls: Vec<(Vec<ItemId>, ReviewAction)>,
    one_calls: Vec<(ItemId, ReviewAction, Option<String>)>,
    stats_calls: usize,
}

/// Server listing held in memory. Pages are slices of the filtered listing
/// unless a response was scripted; batch calls can be told to fail by index.
#[derive(Default)]
pub struct MockSource {
    state: Mutex<State>,
    latency: Duration,
}

impl MockSource {
    pub fn new() -> Self { Self::default() }

    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let s = Self::default();
        s.with(|st| st.items.extend(items));
        s
    }

    /// Every call sleeps this long first.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut g = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut g)
    }

    /// Add an item at the head of the listing, as a fresh submission would.
    pub fn insert(&self, it: Item) { self.with(|st| st.items.insert(0, it)); }

    /// Next `fetch_page` returns this instead of slicing the listing.
    pub fn script_page(&self, res: ApiResult<Page>) { self.with(|st| st.scripted_pages.push_back(res)); }

    /// The `call`-th batch request (0-based) fails with `err`.
    pub fn fail_batch(&self, call: usize, err: ApiError) { self.with(|st| { st.batch_failures.insert(call, err); }); }

    /// The `call`-th batch request reports only `processed` items done.
    pub fn short_batch(&self, call: usize, processed: usize) { self.with(|st| { st.short_batches.insert(call, processed); }); }

    pub fn items(&self) -> Vec<Item> { self.with(|st| st.items.clone()) }
    pub fn page_calls(&self) -> Vec<(Filter, usize, usize)> { self.with(|st| st.page_calls.clone()) }
    pub fn batch_calls(&self) -> Vec<(Vec<ItemId>, ReviewAction)> { self.with(|st| st.batch_calls.clone()) }
    pub fn one_calls(&self) -> Vec<(ItemId, ReviewAction, Option<String>)> { self.with(|st| st.one_calls.clone()) }
    pub fn stats_calls(&self) -> usize { self.with(|st| st.stats_calls) }

    async fn pause(&self) {
        if !self.latency.is_zero() { tokio::time::sleep(self.latency).await; }
    }
}

fn apply(items: &mut Vec<Item>, id: ItemId, action: ReviewAction) -> Option<Item> {
    let pos = items.iter().position(|i| i.id == id)?;
    match action.target_status() {
        Some(st) => {
            items[pos].status = st;
            Some(items[pos].clone())
        }
        None => Some(items.remove(pos)),
    }
}

#[async_trait::async_trait]
impl ItemSource for MockSource {
    async fn fetch_page(&self, filter: &Filter, page_index: usize, page_size: usize) -> ApiResult<Page> {
        self.pause().await;
        self.with(|st| {
            st.page_calls.push((filter.clone(), page_index, page_size));
            if let Some(res) = st.scripted_pages.pop_front() { return res; }
            let matching: Vec<&Item> = st.items.iter().filter(|i| filter.matches(i)).collect();
            let start = page_index.saturating_mul(page_size).min(matching.len());
            let end = (start + page_size).min(matching.len());
            Ok(Page { items: matching[start..end].iter().map(|i| (*i).clone()).collect(), has_more: end < matching.len() })
        })
    }

    async fn mutate_one(&self, id: ItemId, action: ReviewAction, reason: Option<&str>) -> ApiResult<MutateOneResponse> {
        self.pause().await;
        self.with(|st| {
            st.one_calls.push((id, action, reason.map(str::to_string)));
            match apply(&mut st.items, id, action) {
                Some(it) => Ok(MutateOneResponse { success: true, item: action.target_status().map(|_| it) }),
                None => Err(ApiError::Http { status: 404, message: format!("item {} not found", id) }),
            }
        })
    }

    async fn mutate_batch(&self, ids: &[ItemId], action: ReviewAction) -> ApiResult<BatchResponse> {
        self.pause().await;
        self.with(|st| {
            let call = st.batch_calls.len();
            st.batch_calls.push((ids.to_vec(), action));
            if let Some(err) = st.batch_failures.remove(&call) { return Err(err); }
            for id in ids { apply(&mut st.items, *id, action); }
            let processed = st.short_batches.remove(&call).unwrap_or(ids.len());
            Ok(BatchResponse { success: true, processed_count: processed })
        })
    }

    async fn stats(&self) -> ApiResult<QueueStats> {
        self.pause().await;
        self.with(|st| {
            st.stats_calls += 1;
            let mut s = QueueStats::default();
            for it in &st.items {
                match it.status {
                    Status::Pending => s.pending += 1,
                    Status::Approved => s.approved += 1,
                    Status::Rejected => s.rejected += 1,
                    Status::Forwarded => s.forwarded += 1,
                }
            }
            Ok(s)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(n: u64) -> MockSource { MockSource::with_items((1..=n).rev().map(|id| item(id, Status::Pending))) }

    #[tokio::test]
    async fn pages_slice_the_filtered_listing() {
        let src = listing(45);
        let p0 = src.fetch_page(&Filter::default(), 0, 20).await.expect("page");
        assert_eq!(p0.items.len(), 20);
        assert!(p0.has_more);
        assert_eq!(p0.items[0].id, 45);
        let p2 = src.fetch_page(&Filter::default(), 2, 20).await.expect("page");
        assert_eq!(p2.items.len(), 5);
        assert!(!p2.has_more);
        let none = src.fetch_page(&Filter::status(Status::Approved), 0, 20).await.expect("page");
        assert!(none.items.is_empty());
    }

    #[tokio::test]
    async fn scripted_failures_are_served_in_order() {
        let src = listing(3);
        src.script_page(Err(ApiError::Transport("reset".into())));
        assert!(src.fetch_page(&Filter::default(), 0, 20).await.is_err());
        assert_eq!(src.fetch_page(&Filter::default(), 0, 20).await.expect("page").items.len(), 3);

        src.fail_batch(0, ApiError::Http { status: 500, message: "boom".into() });
        assert!(src.mutate_batch(&[1, 2], ReviewAction::Approve).await.is_err());
        let ok = src.mutate_batch(&[1, 2], ReviewAction::Approve).await.expect("batch");
        assert_eq!(ok.processed_count, 2);
        assert_eq!(src.batch_calls().len(), 2);
    }

    #[tokio::test]
    async fn mutations_change_the_listing_and_stats() {
        let src = listing(4);
        let r = src.mutate_one(4, ReviewAction::Reject, Some("spam")).await.expect("one");
        assert_eq!(r.item.map(|i| i.status), Some(Status::Rejected));
        let d = src.mutate_one(3, ReviewAction::Delete, None).await.expect("one");
        assert!(d.item.is_none());
        assert!(src.mutate_one(3, ReviewAction::Approve, None).await.is_err());
        let s = src.stats().await.expect("stats");
        assert_eq!((s.pending, s.rejected, s.total()), (2, 1, 3));
        assert_eq!(src.one_calls()[0].2.as_deref(), Some("spam"));
    }
}

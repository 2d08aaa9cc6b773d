//! modq pagination controller.
//!
//! Pages are fetched for the active filter, deduplicated against the ids
//! already seen under that filter and handed to the update scheduler as
//! `Add` mutations. Scroll events go through a gate so a burst of them
//! starts at most one fetch.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use metrics::{counter, histogram};
use modq_api::{ApiError, ApiResult, ItemSource};
use modq_core::{Filter, Mutation, Notice, SyncConfig};
use modq_store::SchedulerHandle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

mod cursor;
mod gate;

pub use cursor::{Accepted, Cursor};
pub use gate::{ScrollGate, ScrollMetrics};

/// What a `load_page` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { fresh: usize, duplicates: usize, has_more: bool },
    /// The filter changed while the request was out; the page was dropped.
    Stale,
    /// Another load is in flight.
    Busy,
    /// The listing already ended.
    Exhausted,
}

/// Clears the in-flight flag however the load ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

pub struct PaginationController {
    source: Arc<dyn ItemSource>,
    scheduler: SchedulerHandle,
    notices: broadcast::Sender<Notice>,
    cursor: Mutex<Cursor>,
    gate: Mutex<ScrollGate>,
    in_flight: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PaginationController {
    pub fn new(
        cfg: &SyncConfig,
        filter: Filter,
        source: Arc<dyn ItemSource>,
        scheduler: SchedulerHandle,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        Self {
            source,
            scheduler,
            notices,
            cursor: Mutex::new(Cursor::new(filter, cfg.page_size)),
            gate: Mutex::new(ScrollGate::new(f64::from(cfg.scroll_threshold), cfg.scroll_min_interval)),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Copy of the cursor state.
    pub fn cursor(&self) -> Cursor { lock(&self.cursor).clone() }
    pub fn filter(&self) -> Filter { lock(&self.cursor).filter().clone() }
    pub fn has_more(&self) -> bool { lock(&self.cursor).has_more() }
    pub fn seen_len(&self) -> usize { lock(&self.cursor).seen_len() }
    pub fn is_loading(&self) -> bool { self.in_flight.load(Ordering::Acquire) }

    /// Switch to `filter`: clears the seen-set, rewinds to the first page and
    /// invalidates any load still in flight.
    pub fn reset(&self, filter: Filter) {
        let generation = lock(&self.cursor).reset(filter);
        lock(&self.gate).reset();
        debug!(generation, "pager: reset");
    }

    /// Fetch the next page for the current filter.
    pub async fn load_page(&self) -> ApiResult<LoadOutcome> {
        if self.in_flight.swap(true, Ordering::AcqRel) { return Ok(LoadOutcome::Busy); }
        let _guard = InFlight(&self.in_flight);

        let (filter, page_index, page_size, generation) = {
            let c = lock(&self.cursor);
            if !c.has_more() { return Ok(LoadOutcome::Exhausted); }
            (c.filter().clone(), c.page_index(), c.page_size(), c.generation())
        };

        let t0 = Instant::now();
        let page = match self.source.fetch_page(&filter, page_index, page_size).await {
            Ok(p) => p,
            Err(e) => {
                counter!("pager_page_load_failures_total", 1u64);
                warn!(page = page_index, error = %e, "pager: load failed");
                self.raise(&e);
                return Err(e);
            }
        };
        histogram!("pager_page_load_ms", t0.elapsed().as_secs_f64() * 1000.0);

        let (accepted, has_more) = {
            let mut c = lock(&self.cursor);
            if c.generation() != generation {
                debug!(page = page_index, "pager: dropping stale page");
                return Ok(LoadOutcome::Stale);
            }
            let a = c.accept(page.items, page_size);
            (a, c.has_more())
        };

        let fresh = accepted.fresh.len();
        let duplicates = accepted.duplicates;
        counter!("pager_page_loads_total", 1u64);
        if duplicates > 0 { counter!("pager_page_duplicates_total", duplicates as u64); }
        self.scheduler.schedule_all(accepted.fresh.into_iter().map(Mutation::Add));
        info!(page = page_index, fresh, duplicates, has_more, took_ms = %t0.elapsed().as_millis(), "pager: page loaded");
        Ok(LoadOutcome::Loaded { fresh, duplicates, has_more })
    }

    /// Feed a scroll event. Returns `None` when the gate held the fetch back.
    pub async fn on_scroll(&self, m: ScrollMetrics) -> Option<ApiResult<LoadOutcome>> {
        let fire = {
            let has_more = self.has_more();
            lock(&self.gate).check(&m, has_more, self.is_loading(), tokio::time::Instant::now())
        };
        if !fire { return None; }
        Some(self.load_page().await)
    }

    fn raise(&self, e: &ApiError) {
        let notice = e.auth_notice().unwrap_or_else(|| Notice::PageLoadFailed { message: e.to_string() });
        let _ = self.notices.send(notice);
    }
}

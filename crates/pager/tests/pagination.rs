#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use modq_api::mock::{item, MockSource};
use modq_api::{ApiError, ItemSource, Page};
use modq_core::{Filter, Notice, Status, SyncConfig};
use modq_pager::{LoadOutcome, PaginationController, ScrollMetrics};
use modq_store::{spawn_scheduler, SchedulerConfig, SchedulerHandle};
use tokio::sync::broadcast;

const BOTTOM: ScrollMetrics = ScrollMetrics { scroll_top: 1400.0, scroll_height: 2000.0, client_height: 600.0 };

fn listing(n: u64) -> Arc<MockSource> { Arc::new(MockSource::with_items((1..=n).rev().map(|id| item(id, Status::Pending)))) }

fn controller(src: Arc<MockSource>) -> (PaginationController, SchedulerHandle, broadcast::Receiver<Notice>) {
    let (sched, _task) = spawn_scheduler(SchedulerConfig::default());
    let (tx, rx) = broadcast::channel(16);
    let source: Arc<dyn ItemSource> = src;
    (PaginationController::new(&SyncConfig::default(), Filter::default(), source, sched.clone(), tx), sched, rx)
}

#[tokio::test(start_paused = true)]
async fn three_full_pages_materialise_sixty_distinct_items() {
    let src = listing(60);
    let (pager, sched, _rx) = controller(src.clone());
    for _ in 0..3 {
        assert!(matches!(pager.load_page().await, Ok(LoadOutcome::Loaded { fresh: 20, duplicates: 0, .. })));
    }
    assert_eq!(pager.seen_len(), 60);
    assert!(pager.has_more(), "third page was full");
    sched.flush_now().await;
    assert_eq!(sched.snapshot().len(), 60);
    let pages: Vec<usize> = src.page_calls().iter().map(|c| c.1).collect();
    assert_eq!(pages, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn short_third_page_clears_has_more() {
    let (pager, _sched, _rx) = controller(listing(55));
    for _ in 0..3 { pager.load_page().await.expect("load"); }
    assert_eq!(pager.seen_len(), 55);
    assert!(!pager.has_more());
    assert_eq!(pager.load_page().await, Ok(LoadOutcome::Exhausted));
}

#[tokio::test(start_paused = true)]
async fn overlapping_pages_never_duplicate_ids() {
    let src = listing(0);
    src.script_page(Ok(Page { items: (21..=40).rev().map(|id| item(id, Status::Pending)).collect(), has_more: true }));
    // Upstream approvals shifted the listing; five rows repeat.
    src.script_page(Ok(Page { items: (6..=25).rev().map(|id| item(id, Status::Pending)).collect(), has_more: true }));
    let (pager, sched, _rx) = controller(src);
    pager.load_page().await.expect("first");
    let second = pager.load_page().await.expect("second");
    assert_eq!(second, LoadOutcome::Loaded { fresh: 15, duplicates: 5, has_more: true });
    sched.flush_now().await;
    let snap = sched.snapshot();
    assert_eq!(snap.len(), 35);
    assert_eq!(pager.seen_len(), 35);
}

#[tokio::test(start_paused = true)]
async fn failed_load_keeps_cursor_and_raises_retryable_notice() {
    let src = listing(60);
    src.script_page(Err(ApiError::Transport("connection reset".into())));
    let (pager, _sched, mut rx) = controller(src.clone());
    assert!(pager.load_page().await.is_err());
    assert!(pager.has_more());
    assert_eq!(pager.cursor().page_index(), 0);
    assert!(matches!(rx.try_recv(), Ok(Notice::PageLoadFailed { .. })));
    assert!(!pager.is_loading());

    assert!(matches!(pager.load_page().await, Ok(LoadOutcome::Loaded { fresh: 20, .. })));
    assert_eq!(src.page_calls()[1].1, 0, "retry asks for the same page");
}

#[tokio::test(start_paused = true)]
async fn forbidden_load_raises_permission_notice() {
    let src = listing(5);
    src.script_page(Err(ApiError::Forbidden("fetch_page".into())));
    let (pager, _sched, mut rx) = controller(src);
    assert!(pager.load_page().await.is_err());
    assert_eq!(rx.try_recv().ok(), Some(Notice::PermissionDenied("fetch_page".into())));
}

#[tokio::test(start_paused = true)]
async fn reset_discards_page_in_flight() {
    let src = Arc::new(MockSource::with_items((1..=40).rev().map(|id| item(id, Status::Pending))).with_latency(Duration::from_millis(300)));
    let (pager, _sched, _rx) = controller(src);
    let pager = Arc::new(pager);
    let p = pager.clone();
    let load = tokio::spawn(async move { p.load_page().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pager.is_loading());
    pager.reset(Filter::status(Status::Approved));
    assert_eq!(load.await.expect("join"), Ok(LoadOutcome::Stale));
    assert_eq!(pager.seen_len(), 0);
    assert_eq!(pager.cursor().page_index(), 0);
}

#[tokio::test(start_paused = true)]
async fn scroll_bursts_start_one_fetch_per_interval() {
    let src = Arc::new(MockSource::with_items((1..=100).rev().map(|id| item(id, Status::Pending))).with_latency(Duration::from_millis(50)));
    let (pager, _sched, _rx) = controller(src.clone());
    let pager = Arc::new(pager);

    let p = pager.clone();
    let first = tokio::spawn(async move { p.on_scroll(BOTTOM).await });
    tokio::task::yield_now().await;
    assert!(pager.on_scroll(BOTTOM).await.is_none(), "in flight");
    assert!(first.await.expect("join").is_some());

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(pager.on_scroll(BOTTOM).await.is_none(), "inside the minimum interval");
    assert!(pager.on_scroll(ScrollMetrics::new(0.0, 2000.0, 600.0)).await.is_none(), "above the threshold");

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(pager.on_scroll(BOTTOM).await.is_some());
    assert_eq!(src.page_calls().len(), 2);
}

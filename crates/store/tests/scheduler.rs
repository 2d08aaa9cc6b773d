#![forbid(unsafe_code)]

use std::time::Duration;

use chrono::{TimeZone, Utc};
use modq_core::{Item, ItemId, ItemPatch, MediaList, Mutation, Status};
use modq_store::{spawn_scheduler, SchedulerConfig};

fn item(id: ItemId) -> Item {
    Item {
        id,
        status: Status::Pending,
        content: Some(format!("message {}", id)),
        media: MediaList::new(),
        is_flagged: false,
        created_at: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
    }
}

fn cfg() -> SchedulerConfig { SchedulerConfig { debounce: Duration::from_millis(100), batch_size: 50 } }

async fn ms(n: u64) { tokio::time::sleep(Duration::from_millis(n)).await; }

#[tokio::test(start_paused = true)]
async fn updates_within_one_window_flush_once_and_last_wins() {
    let (sched, _task) = spawn_scheduler(cfg());
    sched.schedule(Mutation::Add(item(1)));
    sched.flush_now().await;
    let mut sub = sched.subscribe();

    let mut first = ItemPatch::status(1, Status::Approved);
    first.content = Some("first".into());
    let mut second = ItemPatch::status(1, Status::Rejected);
    second.content = Some("second".into());
    sched.schedule(Mutation::Update(first));
    ms(30).await;
    sched.schedule(Mutation::Update(second));
    ms(50).await;
    assert!(sub.try_next().is_none(), "flushed before the debounce window closed");
    ms(200).await;

    let batch = sub.try_next().expect("one flush");
    assert!(sub.try_next().is_none(), "more than one flush");
    assert_eq!(batch.updated.len(), 1);
    let stored = sched.get(1).expect("item");
    assert_eq!(stored.status, Status::Rejected);
    assert_eq!(stored.content.as_deref(), Some("second"));
}

#[tokio::test(start_paused = true)]
async fn debounce_restarts_on_each_schedule() {
    let (sched, _task) = spawn_scheduler(cfg());
    let mut sub = sched.subscribe();
    for id in 0..5 {
        sched.schedule(Mutation::Add(item(id)));
        ms(60).await;
    }
    assert!(sub.try_next().is_none());
    ms(100).await;
    let batch = sub.try_next().expect("flush");
    assert_eq!(batch.added.len(), 5);
    assert!(sub.try_next().is_none());
}

#[tokio::test(start_paused = true)]
async fn backlog_is_drained_in_batch_size_steps() {
    let (sched, _task) = spawn_scheduler(cfg());
    let mut sub = sched.subscribe();
    sched.schedule_all((0..120).map(|id| Mutation::Add(item(id))));
    ms(150).await;
    let sizes: Vec<usize> = std::iter::from_fn(|| sub.try_next()).map(|b| b.added.len()).collect();
    assert_eq!(sizes, vec![50, 50, 20]);
    assert_eq!(sched.snapshot().len(), 120);
}

#[tokio::test(start_paused = true)]
async fn flush_now_and_cancel() {
    let (sched, _task) = spawn_scheduler(cfg());
    sched.schedule(Mutation::Add(item(1)));
    sched.schedule(Mutation::Add(item(2)));
    assert_eq!(sched.flush_now().await, 2);
    assert_eq!(sched.snapshot().len(), 2);

    sched.schedule(Mutation::Remove(1));
    assert_eq!(sched.cancel().await, 1);
    ms(500).await;
    assert!(sched.get(1).is_some(), "cancelled removal was applied");
    assert_eq!(sched.flush_now().await, 0);
}

#[tokio::test(start_paused = true)]
async fn store_never_holds_duplicates_and_remove_is_final() {
    let (sched, _task) = spawn_scheduler(cfg());
    // Deterministic pseudo-random mix of adds and removes over a small id space.
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut expect = std::collections::BTreeSet::new();
    for _ in 0..400 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let id = seed % 16;
        if seed & 0x100 == 0 {
            sched.schedule(Mutation::Add(item(id)));
            expect.insert(id);
        } else {
            sched.schedule(Mutation::Remove(id));
            expect.remove(&id);
        }
    }
    sched.flush_now().await;
    let snap = sched.snapshot();
    let mut ids: Vec<ItemId> = snap.values().map(|i| i.id).collect();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    assert_eq!(before, ids.len());
    assert_eq!(ids, expect.into_iter().collect::<Vec<_>>());

    sched.schedule(Mutation::Add(item(99)));
    sched.schedule(Mutation::Remove(99));
    sched.flush_now().await;
    assert!(sched.get(99).is_none());
}

#[tokio::test(start_paused = true)]
async fn duplicate_status_update_is_idempotent() {
    let (sched, _task) = spawn_scheduler(cfg());
    sched.schedule(Mutation::Add(item(5)));
    sched.schedule(Mutation::Update(ItemPatch::status(5, Status::Forwarded)));
    sched.flush_now().await;
    let once = sched.get(5);

    let mut sub = sched.subscribe();
    sched.schedule(Mutation::Update(ItemPatch::status(5, Status::Forwarded)));
    sched.flush_now().await;
    assert_eq!(sched.get(5), once);
    assert!(sub.try_next().is_none(), "no-op re-application woke observers");

    sched.schedule(Mutation::Update(ItemPatch::status(5, Status::Pending)));
    sched.flush_now().await;
    assert_eq!(sched.get(5).map(|i| i.status), Some(Status::Forwarded));
}

#[tokio::test(start_paused = true)]
async fn stale_pending_in_the_same_window_keeps_terminal_status() {
    let (sched, _task) = spawn_scheduler(cfg());
    sched.schedule_all([Mutation::Add(item(1)), Mutation::Add(item(2))]);
    sched.flush_now().await;
    let mut sub = sched.subscribe();

    sched.schedule(Mutation::Update(ItemPatch::status(1, Status::Approved)));
    ms(20).await;
    sched.schedule(Mutation::Update(ItemPatch::status(1, Status::Pending)));
    ms(150).await;
    let batch = sub.try_next().expect("flush");
    assert_eq!(batch.updated.len(), 1);
    assert_eq!(sched.get(1).map(|i| i.status), Some(Status::Approved));

    sched.schedule(Mutation::Update(ItemPatch::status(2, Status::Approved)));
    ms(150).await;
    sched.schedule(Mutation::Update(ItemPatch::status(2, Status::Pending)));
    ms(150).await;
    assert_eq!(sched.get(2).map(|i| i.status), Some(Status::Approved), "split windows agree with one window");
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_subscriptions() {
    let (sched, task) = spawn_scheduler(cfg());
    let mut sub = sched.subscribe();
    let epoch = sched.subscribe_epoch();
    sched.shutdown();
    task.await.expect("scheduler task");
    assert!(!sched.schedule(Mutation::Remove(1)));
    // The handle keeps a sender alive, so the subscription just stays empty.
    assert!(sub.try_next().is_none());
    assert_eq!(*epoch.borrow(), 0);
}

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use metrics::{counter, histogram};
use modq_core::{Item, ItemId, Mutation, SyncConfig};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{FlushBatch, ItemStore, MutationQueue, StoreSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub debounce: Duration,
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self { Self { debounce: Duration::from_millis(100), batch_size: 50 } }
}

impl From<&SyncConfig> for SchedulerConfig {
    fn from(c: &SyncConfig) -> Self { Self { debounce: c.debounce, batch_size: c.flush_batch_size.max(1) } }
}

enum Command {
    Schedule(Mutation),
    FlushNow(oneshot::Sender<usize>),
    Cancel(oneshot::Sender<usize>),
    Shutdown,
}

/// Clonable handle to the scheduler actor. Producers call `schedule`;
/// readers load the latest snapshot or subscribe to flushes.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
    snap: Arc<ArcSwap<StoreSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
    notify: broadcast::Sender<Arc<FlushBatch>>,
}

impl SchedulerHandle {
    /// Queue a mutation and restart the debounce window.
    /// Returns false once the scheduler has shut down.
    pub fn schedule(&self, m: Mutation) -> bool { self.tx.send(Command::Schedule(m)).is_ok() }

    pub fn schedule_all(&self, ms: impl IntoIterator<Item = Mutation>) -> usize {
        let mut n = 0;
        for m in ms {
            if !self.schedule(m) { break; }
            n += 1;
        }
        n
    }

    /// Apply everything queued right now. Returns the number of mutations drained.
    pub async fn flush_now(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::FlushNow(tx)).is_err() { return 0; }
        rx.await.unwrap_or(0)
    }

    /// Drop queued mutations and the pending timer. Returns how many were discarded.
    pub async fn cancel(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Cancel(tx)).is_err() { return 0; }
        rx.await.unwrap_or(0)
    }

    pub fn shutdown(&self) { let _ = self.tx.send(Command::Shutdown); }

    pub fn is_closed(&self) -> bool { self.tx.is_closed() }

    pub fn snapshot(&self) -> Arc<StoreSnapshot> { self.snap.load_full() }
    pub fn get(&self, id: ItemId) -> Option<Item> { self.snap.load().get(id).cloned() }
    pub fn values(&self) -> Vec<Item> { self.snap.load().values().cloned().collect() }
    pub fn epoch(&self) -> u64 { *self.epoch_rx.borrow() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    pub fn subscribe(&self) -> Subscription { Subscription { rx: self.notify.subscribe() } }
}

/// Flush notifications for one observer. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<Arc<FlushBatch>>,
}

impl Subscription {
    /// Next flushed batch; `None` once the scheduler is gone.
    pub async fn next(&mut self) -> Option<Arc<FlushBatch>> {
        loop {
            match self.rx.recv().await {
                Ok(b) => return Some(b),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged; re-read the snapshot");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of `next`.
    pub fn try_next(&mut self) -> Option<Arc<FlushBatch>> {
        loop {
            match self.rx.try_recv() {
                Ok(b) => return Some(b),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged; re-read the snapshot");
                }
                Err(_) => return None,
            }
        }
    }
}

struct Publisher {
    snap: Arc<ArcSwap<StoreSnapshot>>,
    epoch_tx: watch::Sender<u64>,
    notify: broadcast::Sender<Arc<FlushBatch>>,
}

impl Publisher {
    fn flush(&self, store: &mut ItemStore, queue: &mut MutationQueue, max: usize) -> usize {
        let batch = queue.drain(max);
        if batch.is_empty() { return 0; }
        let n = batch.len();
        let t0 = std::time::Instant::now();
        let out = store.apply_mutations(batch);
        self.snap.store(store.freeze());
        let _ = self.epoch_tx.send(out.epoch);
        counter!("scheduler_flushes_total", 1u64);
        counter!("scheduler_mutations_applied_total", n as u64);
        histogram!("scheduler_flush_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(
            epoch = out.epoch,
            drained = n,
            added = out.added.len(),
            updated = out.updated.len(),
            removed = out.removed.len(),
            remaining = queue.len(),
            "scheduler: flushed"
        );
        // Redundant re-applications change nothing; observers are not woken for them.
        if !out.is_empty() {
            let _ = self.notify.send(Arc::new(out));
        }
        n
    }
}

/// Spawn the scheduler actor. It owns the store and the queue; the returned
/// handle is the only way in.
pub fn spawn_scheduler(cfg: SchedulerConfig) -> (SchedulerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel::<Command>();
    let snap = Arc::new(ArcSwap::from_pointee(StoreSnapshot::default()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let (notify, _) = broadcast::channel::<Arc<FlushBatch>>(256);
    let publisher = Publisher { snap: Arc::clone(&snap), epoch_tx, notify: notify.clone() };
    let task = tokio::spawn(run(cfg, rx, publisher));
    (SchedulerHandle { tx, snap, epoch_rx, notify }, task)
}

async fn run(cfg: SchedulerConfig, mut rx: mpsc::UnboundedReceiver<Command>, publisher: Publisher) {
    let batch_size = cfg.batch_size.max(1);
    let mut queue = MutationQueue::default();
    let mut store = ItemStore::new();
    let mut deadline: Option<Instant> = None;
    // While a backlog is being worked off, new mutations do not push the timer out.
    let mut draining = false;
    info!(debounce_ms = cfg.debounce.as_millis() as u64, batch_size, "scheduler started");
    loop {
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Schedule(m)) => {
                    queue.push(m);
                    if !draining { deadline = Some(Instant::now() + cfg.debounce); }
                }
                Some(Command::FlushNow(reply)) => {
                    let mut n = 0;
                    while !queue.is_empty() {
                        n += publisher.flush(&mut store, &mut queue, batch_size);
                    }
                    deadline = None;
                    draining = false;
                    let _ = reply.send(n);
                }
                Some(Command::Cancel(reply)) => {
                    let n = queue.clear();
                    deadline = None;
                    draining = false;
                    if n > 0 { debug!(discarded = n, "scheduler: cancelled pending mutations"); }
                    let _ = reply.send(n);
                }
                Some(Command::Shutdown) | None => break,
            },
            _ = timer => {
                publisher.flush(&mut store, &mut queue, batch_size);
                if queue.is_empty() {
                    deadline = None;
                    draining = false;
                } else {
                    draining = true;
                    deadline = Some(Instant::now());
                    tokio::task::yield_now().await;
                }
            }
        }
    }
    counter!("scheduler_coalesced_updates_total", queue.coalesced());
    info!(pending = queue.len(), items = store.len(), "scheduler stopped");
}

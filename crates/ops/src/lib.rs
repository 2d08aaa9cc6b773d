//! modq ops: bulk and single-item review actions.
//!
//! A bulk action runs over the selection in fixed-size chunks, one request
//! at a time with a pause between requests. A failed chunk is logged and
//! skipped; the caller learns how many items were actually processed.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use modq_api::{ApiResult, ItemSource, ReviewAction};
use modq_core::{ItemId, ItemPatch, Mutation, Notice, SyncConfig};
use modq_store::SchedulerHandle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod selection;

pub use selection::{SelectionSet, SharedSelection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub chunk_size: usize,
    pub chunk_pause: Duration,
    pub selection_clear_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self { Self::from(&SyncConfig::default()) }
}

impl From<&SyncConfig> for BatchConfig {
    fn from(c: &SyncConfig) -> Self {
        Self { chunk_size: c.batch_chunk_size.max(1), chunk_pause: c.batch_chunk_pause, selection_clear_delay: c.selection_clear_delay }
    }
}

/// Emitted after every chunk, failed ones included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    pub processed: usize,
    pub total: usize,
    pub failed_chunks: usize,
    /// Stopped early: auth failure or cancellation.
    pub aborted: bool,
}

impl BatchOutcome {
    pub fn is_partial(&self) -> bool { self.processed < self.total }
}

/// Cancellation handle for a running batch. Chunks already sent are not
/// recalled; no further chunk starts.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(self) { self.token.cancel(); }
}

/// A batch running on its own task.
pub struct BatchHandle {
    pub progress: mpsc::Receiver<Progress>,
    pub cancel: CancelHandle,
    pub done: JoinHandle<BatchOutcome>,
}

/// Runs review actions against the item source and feeds the results to the
/// update scheduler.
pub struct BatchExecutor {
    source: Arc<dyn ItemSource>,
    scheduler: SchedulerHandle,
    notices: broadcast::Sender<Notice>,
    cfg: BatchConfig,
    shutdown: CancellationToken,
}

impl BatchExecutor {
    pub fn new(
        cfg: BatchConfig,
        source: Arc<dyn ItemSource>,
        scheduler: SchedulerHandle,
        notices: broadcast::Sender<Notice>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { source, scheduler, notices, cfg, shutdown }
    }

    pub fn config(&self) -> &BatchConfig { &self.cfg }

    /// Apply `action` to `ids`, chunk by chunk, calling `on_progress` after
    /// each chunk. Stops early when `cancel` fires or the source rejects the
    /// credential.
    pub async fn execute(
        &self,
        action: ReviewAction,
        ids: &[ItemId],
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(Progress) + Send,
    ) -> BatchOutcome {
        let total = ids.len();
        let mut out = BatchOutcome { total, ..BatchOutcome::default() };
        let t0 = Instant::now();
        let chunks = total.div_ceil(self.cfg.chunk_size);
        info!(action = %action, total, chunks, "batch: start");

        for (i, chunk) in ids.chunks(self.cfg.chunk_size).enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => { out.aborted = true; break; }
                    _ = tokio::time::sleep(self.cfg.chunk_pause) => {}
                }
            }
            if cancel.is_cancelled() {
                out.aborted = true;
                break;
            }
            match self.source.mutate_batch(chunk, action).await {
                Ok(resp) if resp.success => {
                    let done = resp.processed_count.min(chunk.len());
                    out.processed += done;
                    counter!("batch_chunks_ok_total", 1u64);
                    if done == chunk.len() {
                        self.scheduler.schedule_all(chunk.iter().map(|id| completion(*id, action)));
                    } else {
                        warn!(chunk = i, done, size = chunk.len(), "batch: chunk only partly processed");
                    }
                }
                Ok(_) => {
                    out.failed_chunks += 1;
                    counter!("batch_chunks_failed_total", 1u64);
                    warn!(chunk = i, "batch: chunk reported failure");
                }
                Err(e) if e.is_auth() => {
                    out.failed_chunks += 1;
                    counter!("batch_chunks_failed_total", 1u64);
                    warn!(chunk = i, error = %e, "batch: credential rejected; stopping");
                    if let Some(n) = e.auth_notice() { let _ = self.notices.send(n); }
                    out.aborted = true;
                    on_progress(Progress { processed: out.processed, total });
                    break;
                }
                Err(e) => {
                    out.failed_chunks += 1;
                    counter!("batch_chunks_failed_total", 1u64);
                    warn!(chunk = i, error = %e, "batch: chunk failed; continuing");
                }
            }
            on_progress(Progress { processed: out.processed, total });
        }

        histogram!("batch_run_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(
            action = %action,
            processed = out.processed,
            total,
            failed_chunks = out.failed_chunks,
            aborted = out.aborted,
            took_ms = %t0.elapsed().as_millis(),
            "batch: done"
        );
        if out.is_partial() {
            let _ = self.notices.send(Notice::BatchPartial { processed: out.processed, total });
        }
        out
    }

    /// Run `action` over the current selection on a separate task. When the
    /// run finishes without being cut short, the batch's ids are dropped from
    /// the selection after `selection_clear_delay`.
    pub fn spawn(self: &Arc<Self>, action: ReviewAction, selection: SharedSelection) -> BatchHandle {
        let ids = selection.ids();
        let (tx, rx) = mpsc::channel::<Progress>(ids.len().div_ceil(self.cfg.chunk_size).max(1));
        let token = self.shutdown.child_token();
        let cancel = CancelHandle { token: token.clone() };
        let this = Arc::clone(self);
        let done = tokio::spawn(async move {
            let out = this.execute(action, &ids, &token, |p| { let _ = tx.try_send(p); }).await;
            drop(tx);
            if !out.aborted { this.clear_later(selection, ids); }
            out
        });
        BatchHandle { progress: rx, cancel, done }
    }

    /// Drop `ids` from `selection` after the configured delay, unless the
    /// executor shuts down first.
    pub fn clear_later(&self, selection: SharedSelection, ids: Vec<ItemId>) {
        let delay = self.cfg.selection_clear_delay;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let n = selection.lock().remove_all(&ids);
                    debug!(cleared = n, "batch: selection cleared");
                }
            }
        });
    }

    /// Review a single item. The scheduler learns the result from the
    /// server's copy when one is returned. Returns whether the server
    /// accepted the action.
    pub async fn review_one(&self, id: ItemId, action: ReviewAction, reason: Option<&str>) -> ApiResult<bool> {
        let resp = match self.source.mutate_one(id, action, reason).await {
            Ok(r) => r,
            Err(e) => {
                warn!(id, action = %action, error = %e, "review: failed");
                if let Some(n) = e.auth_notice() { let _ = self.notices.send(n); }
                return Err(e);
            }
        };
        if !resp.success {
            warn!(id, action = %action, "review: server declined");
            return Ok(false);
        }
        let m = match (action, resp.item) {
            (ReviewAction::Delete, _) => Mutation::Remove(id),
            (_, Some(item)) => Mutation::Update(ItemPatch::from_item(item)),
            (_, None) => completion(id, action),
        };
        self.scheduler.schedule(m);
        debug!(id, action = %action, "review: ok");
        Ok(true)
    }
}

/// Mutation describing an item after `action` succeeded on it.
pub fn completion(id: ItemId, action: ReviewAction) -> Mutation {
    match action.target_status() {
        Some(st) => Mutation::Update(ItemPatch::status(id, st)),
        None => Mutation::Remove(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modq_core::Status;

    #[test]
    fn completion_intents_follow_action() {
        assert_eq!(completion(4, ReviewAction::Forward), Mutation::Update(ItemPatch::status(4, Status::Forwarded)));
        assert_eq!(completion(4, ReviewAction::Delete), Mutation::Remove(4));
    }

    #[test]
    fn partial_outcome() {
        let o = BatchOutcome { processed: 25, total: 45, failed_chunks: 1, aborted: false };
        assert!(o.is_partial());
        assert!(!BatchOutcome { processed: 45, total: 45, ..BatchOutcome::default() }.is_partial());
    }
}

//! modq session context.
//!
//! `SyncContext` is built once per open dashboard view and owns every
//! moving part: the update scheduler, the push connector, the pager and the
//! batch executor. `shutdown` stops all of it: the connector is closed
//! deliberately (no reconnect), timers are dropped and the scheduler ends.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use modq_api::{ApiResult, ItemSource, ReviewAction};
use modq_core::{Filter, ItemId, ItemPatch, Mutation, Notice, PushMessage, QueueStats, SyncConfig};
use modq_link::{ConnectionState, Connector, Dialer, LinkConfig, LinkEvent};
use modq_ops::{BatchConfig, BatchExecutor, BatchHandle, SharedSelection};
use modq_pager::{LoadOutcome, PaginationController, ScrollMetrics};
use modq_store::{spawn_scheduler, SchedulerConfig, SchedulerHandle, Subscription};
use modq_view::QueueView;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub struct SyncContext {
    cfg: SyncConfig,
    source: Arc<dyn ItemSource>,
    scheduler: SchedulerHandle,
    pager: Arc<PaginationController>,
    batch: Arc<BatchExecutor>,
    selection: SharedSelection,
    connector: tokio::sync::Mutex<Connector>,
    link_state: watch::Receiver<ConnectionState>,
    stats_tx: Arc<watch::Sender<QueueStats>>,
    notices: broadcast::Sender<Notice>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncContext {
    /// Wire everything up and open the push channel. Must be called from
    /// within a tokio runtime. Nothing is fetched until the first
    /// `set_filter` or `load_page`.
    pub fn start(cfg: SyncConfig, source: Arc<dyn ItemSource>, dialer: Arc<dyn Dialer>) -> Arc<Self> {
        let (scheduler, scheduler_task) = spawn_scheduler(SchedulerConfig::from(&cfg));
        let (notices, _) = broadcast::channel(64);
        let (stats_tx, _) = watch::channel(QueueStats::default());
        let stats_tx = Arc::new(stats_tx);
        let shutdown = CancellationToken::new();

        let pager = Arc::new(PaginationController::new(&cfg, Filter::default(), Arc::clone(&source), scheduler.clone(), notices.clone()));
        let batch = Arc::new(BatchExecutor::new(
            BatchConfig::from(&cfg),
            Arc::clone(&source),
            scheduler.clone(),
            notices.clone(),
            shutdown.clone(),
        ));

        let (mut connector, events) = Connector::new(dialer, LinkConfig::from(&cfg));
        let link_state = connector.watch_state();
        connector.connect();

        let pump = Pump {
            scheduler: scheduler.clone(),
            source: Arc::clone(&source),
            pager: Arc::clone(&pager),
            stats_tx: Arc::clone(&stats_tx),
            notices: notices.clone(),
            shutdown: shutdown.clone(),
            fallback_every: cfg.fallback_refresh_interval,
        };
        let pump_task = tokio::spawn(pump.run(events));
        let selection = SharedSelection::new();
        let prune_task = tokio::spawn(prune_selection(scheduler.clone(), selection.clone(), shutdown.clone()));
        info!(page_size = cfg.page_size, debounce_ms = cfg.debounce.as_millis() as u64, "session: started");

        Arc::new(Self {
            cfg,
            source,
            scheduler,
            pager,
            batch,
            selection,
            connector: tokio::sync::Mutex::new(connector),
            link_state,
            stats_tx,
            notices,
            shutdown,
            tasks: Mutex::new(vec![scheduler_task, pump_task, prune_task]),
        })
    }

    pub fn config(&self) -> &SyncConfig { &self.cfg }
    pub fn scheduler(&self) -> &SchedulerHandle { &self.scheduler }
    pub fn pager(&self) -> &PaginationController { &self.pager }
    pub fn batch(&self) -> &Arc<BatchExecutor> { &self.batch }
    pub fn selection(&self) -> SharedSelection { self.selection.clone() }
    pub fn filter(&self) -> Filter { self.pager.filter() }
    pub fn link_state(&self) -> ConnectionState { *self.link_state.borrow() }
    pub fn watch_link(&self) -> watch::Receiver<ConnectionState> { self.link_state.clone() }
    pub fn stats(&self) -> watch::Receiver<QueueStats> { self.stats_tx.subscribe() }
    pub fn notices(&self) -> broadcast::Receiver<Notice> { self.notices.subscribe() }
    pub fn subscribe(&self) -> Subscription { self.scheduler.subscribe() }
    pub fn is_shut_down(&self) -> bool { self.shutdown.is_cancelled() }

    /// Current store contents under the active filter, newest first.
    pub fn view(&self) -> QueueView { QueueView::project(&self.scheduler.snapshot(), &self.pager.filter()) }

    /// Switch filters: rewinds the pager, drops the selection and loads the
    /// first page of the new listing.
    pub async fn set_filter(&self, filter: Filter) -> ApiResult<LoadOutcome> {
        debug!(filter = ?filter, "session: filter changed");
        self.pager.reset(filter);
        self.selection.lock().clear();
        self.pager.load_page().await
    }

    pub async fn load_page(&self) -> ApiResult<LoadOutcome> { self.pager.load_page().await }

    pub async fn on_scroll(&self, m: ScrollMetrics) -> Option<ApiResult<LoadOutcome>> { self.pager.on_scroll(m).await }

    /// Run `action` over the selection. Ids that left the store since they
    /// were picked are dropped first.
    pub fn run_batch(&self, action: ReviewAction) -> BatchHandle {
        let dropped = self.selection.lock().retain_present(&self.scheduler.snapshot());
        if dropped > 0 { debug!(dropped, "session: selection pruned before batch"); }
        self.batch.spawn(action, self.selection.clone())
    }

    pub async fn review_one(&self, id: ItemId, action: ReviewAction, reason: Option<&str>) -> ApiResult<bool> {
        self.batch.review_one(id, action, reason).await
    }

    pub async fn refresh_stats(&self) -> ApiResult<QueueStats> {
        match self.source.stats().await {
            Ok(s) => {
                self.stats_tx.send_replace(s);
                Ok(s)
            }
            Err(e) => {
                if let Some(n) = e.auth_notice() { let _ = self.notices.send(n); }
                Err(e)
            }
        }
    }

    /// Tear down. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() { return; }
        self.shutdown.cancel();
        self.connector.lock().await.close().await;
        let dropped = self.scheduler.cancel().await;
        self.scheduler.shutdown();
        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut g) => g.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for t in tasks {
            if let Err(e) = t.await { warn!(error = %e, "session: task ended abnormally"); }
        }
        info!(dropped_mutations = dropped, "session: shut down");
    }
}

/// Keeps the selection a subset of the store: after every flush, ids the
/// store no longer holds (removed, or never loaded) are dropped.
async fn prune_selection(scheduler: SchedulerHandle, selection: SharedSelection, shutdown: CancellationToken) {
    let mut sub = scheduler.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            batch = sub.next() => {
                if batch.is_none() { return; }
                let dropped = selection.lock().retain_present(&scheduler.snapshot());
                if dropped > 0 { debug!(dropped, "session: selection pruned after flush"); }
            }
        }
    }
}

/// Routes connector events into the store, and takes over with periodic
/// pulls once the push channel is given up on.
struct Pump {
    scheduler: SchedulerHandle,
    source: Arc<dyn ItemSource>,
    pager: Arc<PaginationController>,
    stats_tx: Arc<watch::Sender<QueueStats>>,
    notices: broadcast::Sender<Notice>,
    shutdown: CancellationToken,
    fallback_every: Duration,
}

impl Pump {
    async fn run(self, mut events: mpsc::Receiver<LinkEvent>) {
        loop {
            let ev = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                ev = events.recv() => ev,
            };
            match ev {
                Some(LinkEvent::Message(msg)) => self.route(msg),
                Some(LinkEvent::Opened) => info!("session: live updates on"),
                Some(LinkEvent::Closed) => debug!("session: push channel closed"),
                Some(LinkEvent::Errored(why)) => debug!(error = %why, "session: push channel error"),
                Some(LinkEvent::Unavailable) => {
                    warn!("session: live updates unavailable; polling instead");
                    let _ = self.notices.send(Notice::LinkUnavailable);
                    self.poll().await;
                    return;
                }
                None => return,
            }
        }
    }

    fn route(&self, msg: PushMessage) {
        match msg {
            PushMessage::NewItem(item) => { self.scheduler.schedule(Mutation::Add(item)); }
            PushMessage::StatusUpdate(c) => { self.scheduler.schedule(Mutation::Update(ItemPatch::status(c.id, c.status))); }
            PushMessage::StatsUpdate(s) => { self.stats_tx.send_replace(s); }
            PushMessage::Pong => trace!("session: pong"),
        }
    }

    /// Refetch the first page of the active filter and the stats every
    /// `fallback_every` until shutdown.
    async fn poll(&self) {
        let mut tick = tokio::time::interval(self.fallback_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tick.tick() => {}
            }
            counter!("session_fallback_polls_total", 1u64);
            let filter = self.pager.filter();
            let page_size = self.pager.cursor().page_size();
            match self.source.fetch_page(&filter, 0, page_size).await {
                Ok(page) => {
                    let n = self.scheduler.schedule_all(page.items.into_iter().map(Mutation::Add));
                    debug!(items = n, "session: fallback page");
                }
                Err(e) => self.report(&e),
            }
            match self.source.stats().await {
                Ok(s) => { self.stats_tx.send_replace(s); }
                Err(e) => self.report(&e),
            }
        }
    }

    fn report(&self, e: &modq_api::ApiError) {
        warn!(error = %e, "session: fallback refresh failed");
        if let Some(n) = e.auth_notice() { let _ = self.notices.send(n); }
    }
}

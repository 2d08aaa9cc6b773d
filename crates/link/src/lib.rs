//! modq link: one persistent push connection with bounded reconnection.
//!
//! The connector owns the connection state. It dials through a `Dialer`,
//! decodes inbound frames into `PushMessage`s and emits `LinkEvent`s. On an
//! unintentional close it reconnects with capped exponential backoff; after
//! `max_attempts` consecutive failures it reports `Unavailable` and stops.
//! Transport errors never escape as `Err`: they are logged and surfaced as
//! events so the owner can fall back to pulling.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use modq_core::{OutboundMessage, PushMessage, SyncConfig};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub mod memory;
mod ws;

pub use ws::{push_url, WsDialer};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// An open connection: text frames out, text frames (or a terminal error) in.
/// Dropping it closes the connection.
pub struct Link {
    pub tx: mpsc::Sender<String>,
    pub rx: mpsc::Receiver<Result<String, LinkError>>,
}

/// Opens connections. Implementations must not retry internally.
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<Link, LinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    Message(PushMessage),
    Closed,
    Errored(String),
    /// Reconnect attempts exhausted; no further dials will happen.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base: Duration::from_millis(1000), cap: Duration::from_millis(30_000), max_attempts: 10 }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^(attempt-1), cap)` for `attempt >= 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base.checked_mul(factor).unwrap_or(self.cap).min(self.cap)
    }
}

/// Consecutive-failure counter driven by the connector loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self { Self { policy, attempt: 0 } }

    pub fn attempt(&self) -> u32 { self.attempt }

    pub fn reset(&mut self) { self.attempt = 0; }

    /// Record a failure. Returns the delay before the next dial, or `None`
    /// once `max_attempts` reconnects have already been spent.
    pub fn on_failure(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts { return None; }
        self.attempt += 1;
        Some(self.policy.delay(self.attempt))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    pub policy: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { policy: ReconnectPolicy::default(), connect_timeout: Duration::from_secs(10), heartbeat_interval: Duration::from_secs(30) }
    }
}

impl From<&SyncConfig> for LinkConfig {
    fn from(c: &SyncConfig) -> Self {
        Self {
            policy: ReconnectPolicy { base: c.backoff_base, cap: c.backoff_cap, max_attempts: c.max_reconnect_attempts },
            connect_timeout: c.connect_timeout,
            heartbeat_interval: c.heartbeat_interval,
        }
    }
}

/// Push-channel connector.
pub struct Connector {
    dialer: Arc<dyn Dialer>,
    cfg: LinkConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    events_tx: mpsc::Sender<LinkEvent>,
    out_tx: Option<mpsc::Sender<String>>,
    exhausted: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Connector {
    pub fn new(dialer: Arc<dyn Dialer>, cfg: LinkConfig) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let me = Self {
            dialer,
            cfg,
            state_tx: Arc::new(state_tx),
            state_rx,
            events_tx,
            out_tx: None,
            exhausted: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            task: None,
        };
        (me, events_rx)
    }

    pub fn state(&self) -> ConnectionState { *self.state_rx.borrow() }
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> { self.state_rx.clone() }
    pub fn is_exhausted(&self) -> bool { self.exhausted.load(Ordering::SeqCst) }

    /// Start the connection loop. No-op while one is already running.
    pub fn connect(&mut self) {
        if self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) { return; }
        self.cancel = CancellationToken::new();
        self.exhausted.store(false, Ordering::SeqCst);
        let (out_tx, out_rx) = mpsc::channel::<String>(64);
        self.out_tx = Some(out_tx);
        let driver = Driver {
            dialer: Arc::clone(&self.dialer),
            cfg: self.cfg,
            state_tx: Arc::clone(&self.state_tx),
            events_tx: self.events_tx.clone(),
            exhausted: Arc::clone(&self.exhausted),
            cancel: self.cancel.clone(),
        };
        self.task = Some(tokio::spawn(driver.run(out_rx)));
    }

    /// Send a message if connected. Otherwise warn and drop it.
    pub fn send<T: Serialize>(&self, msg: &T) -> bool {
        if self.state() != ConnectionState::Connected {
            warn!(state = ?self.state(), "link: send while not connected; dropped");
            return false;
        }
        let text = match serde_json::to_string(msg) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "link: outbound message not serializable");
                return false;
            }
        };
        match self.out_tx.as_ref().map(|tx| tx.try_send(text)) {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!(error = %e, "link: outbound queue unavailable; dropped");
                false
            }
            None => false,
        }
    }

    /// Deliberate teardown. Suppresses any further reconnect.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        self.out_tx = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        info!("link: closed by owner");
    }
}

impl Drop for Connector {
    fn drop(&mut self) { self.cancel.cancel(); }
}

enum SessionEnd {
    Cancelled,
    Closed,
    Failed(String),
}

struct Driver {
    dialer: Arc<dyn Dialer>,
    cfg: LinkConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: mpsc::Sender<LinkEvent>,
    exhausted: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Driver {
    fn set(&self, st: ConnectionState) { let _ = self.state_tx.send(st); }

    async fn emit(&self, ev: LinkEvent) { let _ = self.events_tx.send(ev).await; }

    async fn run(self, mut out_rx: mpsc::Receiver<String>) {
        let mut backoff = Backoff::new(self.cfg.policy);
        loop {
            self.set(ConnectionState::Connecting);
            let dialed = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = tokio::time::timeout(self.cfg.connect_timeout, self.dialer.dial()) => r,
            };
            match dialed {
                Ok(Ok(link)) => {
                    backoff.reset();
                    self.set(ConnectionState::Connected);
                    info!("link: opened");
                    self.emit(LinkEvent::Opened).await;
                    match self.session(link, &mut out_rx).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Closed => {
                            info!("link: closed by peer");
                            self.set(ConnectionState::Disconnected);
                            self.emit(LinkEvent::Closed).await;
                        }
                        SessionEnd::Failed(e) => {
                            warn!(error = %e, "link: transport error");
                            self.set(ConnectionState::Errored);
                            self.emit(LinkEvent::Errored(e)).await;
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, attempt = backoff.attempt(), "link: dial failed");
                    self.set(ConnectionState::Errored);
                    self.emit(LinkEvent::Errored(e.to_string())).await;
                }
                Err(_) => {
                    warn!(timeout_ms = self.cfg.connect_timeout.as_millis() as u64, "link: connect stalled; force-closing");
                    self.set(ConnectionState::Errored);
                    self.emit(LinkEvent::Errored("connect timed out".into())).await;
                }
            }
            match backoff.on_failure() {
                Some(delay) => {
                    counter!("link_reconnect_attempts_total", 1u64);
                    info!(attempt = backoff.attempt(), delay_ms = delay.as_millis() as u64, "link: reconnect scheduled");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    warn!(attempts = backoff.attempt(), "link: reconnect attempts exhausted; giving up");
                    self.exhausted.store(true, Ordering::SeqCst);
                    self.set(ConnectionState::Errored);
                    self.emit(LinkEvent::Unavailable).await;
                    return;
                }
            }
        }
        self.set(ConnectionState::Disconnected);
        debug!("link: driver stopped");
    }

    async fn session(&self, mut link: Link, out_rx: &mut mpsc::Receiver<String>) -> SessionEnd {
        let every = self.cfg.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let ping = serde_json::to_string(&OutboundMessage::Ping).unwrap_or_else(|_| r#"{"type":"ping"}"#.to_string());
        let mut outbound_open = true;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                _ = heartbeat.tick() => {
                    trace!("link: heartbeat");
                    if link.tx.send(ping.clone()).await.is_err() { return SessionEnd::Closed; }
                }
                out = out_rx.recv(), if outbound_open => match out {
                    Some(text) => {
                        if link.tx.send(text).await.is_err() { return SessionEnd::Closed; }
                    }
                    None => outbound_open = false,
                },
                frame = link.rx.recv() => match frame {
                    Some(Ok(text)) => self.on_frame(&text).await,
                    Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                    None => return SessionEnd::Closed,
                },
            }
        }
    }

    async fn on_frame(&self, text: &str) {
        match PushMessage::decode(text) {
            Ok(Some(msg)) => {
                counter!("link_messages_total", 1u64, "type" => msg.tag());
                if msg == PushMessage::Pong { trace!("link: pong"); }
                self.emit(LinkEvent::Message(msg)).await;
            }
            Ok(None) => {}
            Err(e) => {
                counter!("link_messages_dropped_total", 1u64);
                warn!(error = %e, "link: dropping malformed push payload");
            }
        }
    }
}

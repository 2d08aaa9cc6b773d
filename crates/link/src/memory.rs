//! In-memory links and a scripted dialer, for driving the connector without
//! a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::{Dialer, Link, LinkError};

/// Server side of an in-memory link.
pub struct Peer {
    pub tx: mpsc::Sender<Result<String, LinkError>>,
    pub rx: mpsc::Receiver<String>,
}

impl Peer {
    pub async fn push(&self, v: serde_json::Value) -> bool { self.tx.send(Ok(v.to_string())).await.is_ok() }
    pub async fn push_raw(&self, text: &str) -> bool { self.tx.send(Ok(text.to_string())).await.is_ok() }
    pub async fn fail(&self, reason: &str) -> bool { self.tx.send(Err(LinkError::Transport(reason.to_string()))).await.is_ok() }
}

pub fn pair(cap: usize) -> (Link, Peer) {
    let (c2s_tx, c2s_rx) = mpsc::channel(cap);
    let (s2c_tx, s2c_rx) = mpsc::channel(cap);
    (Link { tx: c2s_tx, rx: s2c_rx }, Peer { tx: s2c_tx, rx: c2s_rx })
}

pub enum DialOutcome {
    Accept(Link),
    Refuse(String),
    /// Never completes; exercises the connect timeout.
    Hang,
}

/// Hands out queued outcomes in order; refuses once the script runs dry.
#[derive(Default)]
pub struct ScriptedDialer {
    script: Mutex<VecDeque<DialOutcome>>,
    dials: AtomicUsize,
    at: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedDialer {
    pub fn new() -> Self { Self::default() }

    pub fn push(&self, outcome: DialOutcome) {
        if let Ok(mut s) = self.script.lock() { s.push_back(outcome); }
    }

    /// Queue an accepted link and return its server side.
    pub fn accept_next(&self) -> Peer {
        let (link, peer) = pair(64);
        self.push(DialOutcome::Accept(link));
        peer
    }

    pub fn dials(&self) -> usize { self.dials.load(Ordering::SeqCst) }

    /// Instants at which each dial started.
    pub fn dial_times(&self) -> Vec<tokio::time::Instant> { self.at.lock().map(|v| v.clone()).unwrap_or_default() }
}

#[async_trait::async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self) -> Result<Link, LinkError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut at) = self.at.lock() { at.push(tokio::time::Instant::now()); }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(DialOutcome::Accept(link)) => Ok(link),
            Some(DialOutcome::Refuse(why)) => Err(LinkError::Dial(why)),
            Some(DialOutcome::Hang) => std::future::pending().await,
            None => Err(LinkError::Dial("connection refused".into())),
        }
    }
}

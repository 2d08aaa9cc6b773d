#![forbid(unsafe_code)]

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::{Dialer, Link, LinkError};

type AuthHeader = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Derive the push endpoint from the server base URL:
/// `http(s)://host/base` becomes `ws(s)://host/base/ws`. A `ws(s)://` URL is
/// taken verbatim.
pub fn push_url(base: &str) -> Result<String, LinkError> {
    let base = base.trim().trim_end_matches('/');
    if base.starts_with("ws://") || base.starts_with("wss://") {
        return Ok(base.to_string());
    }
    let swapped = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return Err(LinkError::InvalidUrl(base.to_string()));
    };
    Ok(format!("{}/ws", swapped))
}

/// WebSocket dialer. The bearer header is re-read on every dial so a
/// refreshed credential is picked up by the next reconnect.
#[derive(Clone)]
pub struct WsDialer {
    url: String,
    auth: Option<AuthHeader>,
}

impl WsDialer {
    pub fn new(url: impl Into<String>) -> Self { Self { url: url.into(), auth: None } }

    pub fn with_auth_header(mut self, provider: impl Fn() -> Option<String> + Send + Sync + 'static) -> Self {
        self.auth = Some(Arc::new(provider));
        self
    }

    pub fn url(&self) -> &str { &self.url }
}

#[async_trait::async_trait]
impl Dialer for WsDialer {
    async fn dial(&self) -> Result<Link, LinkError> {
        let mut req = self.url.as_str().into_client_request().map_err(|e| LinkError::InvalidUrl(e.to_string()))?;
        if let Some(header) = self.auth.as_ref().and_then(|f| f()) {
            let v = HeaderValue::from_str(&header).map_err(|e| LinkError::Dial(format!("bad auth header: {}", e)))?;
            req.headers_mut().insert(AUTHORIZATION, v);
        }
        let (ws, resp) = tokio_tungstenite::connect_async(req).await.map_err(|e| LinkError::Dial(e.to_string()))?;
        debug!(url = %self.url, status = %resp.status(), "ws: handshake ok");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (in_tx, in_rx) = mpsc::channel::<Result<String, LinkError>>(256);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    out = out_rx.recv() => match out {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                let _ = in_tx.send(Err(LinkError::Transport(e.to_string()))).await;
                                break;
                            }
                        }
                        None => {
                            // Owner dropped the link: close politely.
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(Ok(text)).await.is_err() { break; }
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => { if in_tx.send(Ok(text)).await.is_err() { break; } }
                            Err(_) => warn!("ws: dropping non-utf8 binary frame"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            debug!(frame = ?frame, "ws: close frame");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = in_tx.send(Err(LinkError::Transport(e.to_string()))).await;
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!("ws: pump ended");
        });
        Ok(Link { tx: out_tx, rx: in_rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_url_swaps_scheme_and_appends_path() {
        assert_eq!(push_url("http://localhost:8080").expect("ok"), "ws://localhost:8080/ws");
        assert_eq!(push_url("https://mod.example.com/admin/").expect("ok"), "wss://mod.example.com/admin/ws");
        assert_eq!(push_url("wss://push.example.com/live").expect("ok"), "wss://push.example.com/live");
        assert!(push_url("ftp://nope").is_err());
    }
}

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use modq_core::{Filter, ItemId, QueueStats};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{ApiError, ApiResult, BatchResponse, ItemSource, MutateOneResponse, Page, ReviewAction, SessionHooks};

/// `ItemSource` over the dashboard's REST API.
#[derive(Clone)]
pub struct HttpItemSource {
    client: Client,
    base: String,
    hooks: Arc<dyn SessionHooks>,
}

#[derive(Serialize)]
struct ReasonBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

#[derive(Serialize)]
struct BatchBody<'a> {
    ids: &'a [ItemId],
    action: ReviewAction,
}

impl HttpItemSource {
    pub fn new(base: &str, timeout: Duration, hooks: Arc<dyn SessionHooks>) -> ApiResult<Self> {
        let base = base.trim().trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ApiError::Config(format!("base url must be http(s): {}", base)));
        }
        let client = Client::builder().timeout(timeout).build().map_err(|e| ApiError::Config(e.to_string()))?;
        Ok(Self { client, base: base.to_string(), hooks })
    }

    pub fn base(&self) -> &str { &self.base }

    fn url(&self, path: &str) -> String { format!("{}/api/{}", self.base, path) }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match self.hooks.auth_header() {
            Some(h) => req.header(AUTHORIZATION, h),
            None => req,
        }
    }

    async fn call<T: DeserializeOwned>(&self, op: &'static str, req: RequestBuilder) -> ApiResult<T> {
        let t0 = Instant::now();
        let res = self.authed(req).send().await;
        histogram!("api_request_ms", t0.elapsed().as_secs_f64() * 1000.0);
        let resp = match res {
            Ok(r) => r,
            Err(e) => {
                counter!("api_errors_total", 1u64);
                warn!(op, error = %e, "api: transport failure");
                return Err(ApiError::Transport(e.to_string()));
            }
        };
        let resp = self.check(op, resp).await?;
        let body = resp.json::<T>().await.map_err(|e| ApiError::Decode(format!("{}: {}", op, e)))?;
        debug!(op, took_ms = %t0.elapsed().as_millis(), "api: ok");
        Ok(body)
    }

    async fn check(&self, op: &'static str, resp: Response) -> ApiResult<Response> {
        let status = resp.status();
        if status.is_success() { return Ok(resp); }
        counter!("api_errors_total", 1u64);
        match status {
            StatusCode::UNAUTHORIZED => {
                self.hooks.invalidate();
                Err(ApiError::Unauthorized)
            }
            StatusCode::FORBIDDEN => {
                self.hooks.permission_denied(op);
                Err(ApiError::Forbidden(op.to_string()))
            }
            _ => {
                let text = resp.text().await.unwrap_or_default();
                warn!(op, status = status.as_u16(), "api: request failed");
                Err(ApiError::Http { status: status.as_u16(), message: text })
            }
        }
    }
}

/// Query pairs for a page request; `page` is 1-based on the wire.
fn page_query(filter: &Filter, page_index: usize, page_size: usize) -> Vec<(&'static str, String)> {
    let mut q = vec![("page", (page_index + 1).to_string()), ("limit", page_size.to_string())];
    if let Some(s) = filter.status { q.push(("status", s.as_str().to_string())); }
    if let Some(s) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) { q.push(("search", s.to_string())); }
    if let Some(f) = filter.flagged { q.push(("flagged", f.to_string())); }
    q
}

#[async_trait::async_trait]
impl ItemSource for HttpItemSource {
    async fn fetch_page(&self, filter: &Filter, page_index: usize, page_size: usize) -> ApiResult<Page> {
        let req = self.client.get(self.url("items")).query(&page_query(filter, page_index, page_size));
        self.call("fetch_page", req).await
    }

    async fn mutate_one(&self, id: ItemId, action: ReviewAction, reason: Option<&str>) -> ApiResult<MutateOneResponse> {
        let req = self.client.post(self.url(&format!("items/{}/{}", id, action.as_str()))).json(&ReasonBody { reason });
        self.call("mutate_one", req).await
    }

    async fn mutate_batch(&self, ids: &[ItemId], action: ReviewAction) -> ApiResult<BatchResponse> {
        let req = self.client.post(self.url("items/batch")).json(&BatchBody { ids, action });
        self.call("mutate_batch", req).await
    }

    async fn stats(&self) -> ApiResult<QueueStats> { self.call("stats", self.client.get(self.url("stats"))).await }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BearerToken;
    use modq_core::Status;

    #[test]
    fn page_query_is_one_based_and_skips_empty_fields() {
        let f = Filter { status: Some(Status::Pending), search: Some("  ".into()), flagged: Some(true) };
        let q = page_query(&f, 0, 20);
        assert_eq!(q, vec![
            ("page", "1".to_string()),
            ("limit", "20".to_string()),
            ("status", "pending".to_string()),
            ("flagged", "true".to_string()),
        ]);
    }

    #[test]
    fn base_url_is_validated_and_trimmed() {
        let hooks: Arc<dyn SessionHooks> = Arc::new(BearerToken("t".into()));
        let src = HttpItemSource::new("http://localhost:3000/", Duration::from_secs(5), hooks.clone()).expect("ok");
        assert_eq!(src.url("items/batch"), "http://localhost:3000/api/items/batch");
        assert!(matches!(HttpItemSource::new("localhost", Duration::from_secs(5), hooks), Err(ApiError::Config(_))));
    }

    #[test]
    fn batch_body_shape() {
        let body = serde_json::to_value(BatchBody { ids: &[1, 2], action: ReviewAction::Reject }).expect("json");
        assert_eq!(body, serde_json::json!({ "ids": [1, 2], "action": "reject" }));
        let none = serde_json::to_value(ReasonBody { reason: None }).expect("json");
        assert_eq!(none, serde_json::json!({}));
    }
}

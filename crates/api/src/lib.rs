//! modq item-source façade.
//!
//! The sync engine talks to the moderation backend only through
//! `ItemSource`. `HttpItemSource` is the production implementation;
//! `MockSource` is an in-memory stand-in for tests and demos.

#![forbid(unsafe_code)]

use modq_core::{Filter, Item, ItemId, Notice, QueueStats, Status};
use serde::{Deserialize, Serialize};

mod http;
pub mod mock;

pub use http::HttpItemSource;
pub use mock::MockSource;

/// Review action applied by a single or bulk mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
    Forward,
    Delete,
}

impl ReviewAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::Forward => "forward",
            ReviewAction::Delete => "delete",
        }
    }

    /// Status an item ends in; `None` for delete.
    pub fn target_status(self) -> Option<Status> {
        match self {
            ReviewAction::Approve => Some(Status::Approved),
            ReviewAction::Reject => Some(Status::Rejected),
            ReviewAction::Forward => Some(Status::Forwarded),
            ReviewAction::Delete => None,
        }
    }
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for ReviewAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" => Ok(ReviewAction::Approve),
            "reject" => Ok(ReviewAction::Reject),
            "forward" => Ok(ReviewAction::Forward),
            "delete" => Ok(ReviewAction::Delete),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}

/// Item-source errors.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("config: {0}")]
    Config(String),
}

impl ApiError {
    pub fn is_auth(&self) -> bool { matches!(self, ApiError::Unauthorized | ApiError::Forbidden(_)) }

    /// Notice for auth failures; other errors are reported by their caller.
    pub fn auth_notice(&self) -> Option<Notice> {
        match self {
            ApiError::Unauthorized => Some(Notice::SessionExpired),
            ApiError::Forbidden(op) => Some(Notice::PermissionDenied(op.clone())),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<Item>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutateOneResponse {
    pub success: bool,
    #[serde(default)]
    pub item: Option<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub success: bool,
    #[serde(default)]
    pub processed_count: usize,
}

/// Remote moderation backend.
#[async_trait::async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetch one page (0-based `page_index`) for `filter`.
    async fn fetch_page(&self, filter: &Filter, page_index: usize, page_size: usize) -> ApiResult<Page>;

    async fn mutate_one(&self, id: ItemId, action: ReviewAction, reason: Option<&str>) -> ApiResult<MutateOneResponse>;

    async fn mutate_batch(&self, ids: &[ItemId], action: ReviewAction) -> ApiResult<BatchResponse>;

    async fn stats(&self) -> ApiResult<QueueStats>;
}

/// Session collaborator: supplies the credential and is told when it stops working.
pub trait SessionHooks: Send + Sync {
    /// Full `Authorization` header value, if signed in.
    fn auth_header(&self) -> Option<String>;

    /// Called on 401. The session is no longer usable.
    fn invalidate(&self) {}

    /// Called on 403 for operation `op`.
    fn permission_denied(&self, _op: &str) {}
}

/// Static bearer credential.
#[derive(Clone)]
pub struct BearerToken(pub String);

impl SessionHooks for BearerToken {
    fn auth_header(&self) -> Option<String> {
        if self.0.is_empty() { None } else { Some(format!("Bearer {}", self.0)) }
    }

    fn invalidate(&self) { tracing::warn!("session: credential rejected (401); sign in again"); }

    fn permission_denied(&self, op: &str) { tracing::warn!(op = %op, "session: permission denied (403)"); }
}

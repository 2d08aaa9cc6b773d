//! modq core types shared by the sync engine crates.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod config;
pub mod envelope;
pub mod mutation;

pub use config::SyncConfig;
pub use envelope::{EnvelopeError, OutboundMessage, PushMessage, StatusChange};
pub use mutation::{ItemPatch, Mutation, MutationKind};

/// Server-assigned item identity. Never reused.
pub type ItemId = u64;

/// Review status of an item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Approved,
    Rejected,
    Forwarded,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Pending, Status::Approved, Status::Rejected, Status::Forwarded];

    pub fn is_terminal(self) -> bool { !matches!(self, Status::Pending) }

    /// Status to keep when `incoming` is written over `self`.
    ///
    /// Push data reorders under jitter, so a terminal status never goes back
    /// to `Pending`. Everything else is taken as-is.
    pub fn reconcile(self, incoming: Status) -> Status {
        if self.is_terminal() && incoming == Status::Pending { self } else { incoming }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Approved => "approved",
            Status::Rejected => "rejected",
            Status::Forwarded => "forwarded",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for Status {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Status::Pending),
            "approved" => Ok(Status::Approved),
            "rejected" => Ok(Status::Rejected),
            "forwarded" => Ok(Status::Forwarded),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// Attachment type tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Media {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    /// Resolvable location (URL or server-relative path).
    pub url: String,
}

pub type MediaList = SmallVec<[Media; 2]>;

/// One reviewable unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub status: Status,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media: MediaList,
    #[serde(default)]
    pub is_flagged: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-status totals as reported by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct QueueStats {
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub forwarded: u64,
}

impl QueueStats {
    pub fn count(&self, status: Status) -> u64 {
        match status {
            Status::Pending => self.pending,
            Status::Approved => self.approved,
            Status::Rejected => self.rejected,
            Status::Forwarded => self.forwarded,
        }
    }

    pub fn total(&self) -> u64 { self.pending + self.approved + self.rejected + self.forwarded }
}

/// Active query for the queue view. A change of filter invalidates the
/// pagination cursor and the selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Filter {
    pub status: Option<Status>,
    pub search: Option<String>,
    pub flagged: Option<bool>,
}

impl Filter {
    pub fn status(status: Status) -> Self { Self { status: Some(status), ..Self::default() } }

    pub fn matches(&self, item: &Item) -> bool {
        if let Some(st) = self.status {
            if item.status != st { return false; }
        }
        if let Some(fl) = self.flagged {
            if item.is_flagged != fl { return false; }
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let needle = term.to_lowercase();
                item.content.as_deref().map(|c| c.to_lowercase().contains(&needle)).unwrap_or(false)
            }
            _ => true,
        }
    }
}

/// User-visible notices. Transient failures stay silent; these are the ones
/// that change what the user believes happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    PermissionDenied(String),
    SessionExpired,
    PageLoadFailed { message: String },
    BatchPartial { processed: usize, total: usize },
    LinkUnavailable,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::PermissionDenied(op) => write!(f, "permission denied: {}", op),
            Notice::SessionExpired => f.write_str("session expired; sign in again"),
            Notice::PageLoadFailed { message } => write!(f, "could not load more items ({}); scroll to retry", message),
            Notice::BatchPartial { processed, total } => write!(f, "only {} of {} items were processed", processed, total),
            Notice::LinkUnavailable => f.write_str("live updates unavailable; refreshing periodically"),
        }
    }
}

pub mod prelude {
    pub use super::{Filter, Item, ItemId, ItemPatch, Media, MediaKind, Mutation, MutationKind, Notice, QueueStats, Status, SyncConfig};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: ItemId, status: Status, content: &str, flagged: bool) -> Item {
        Item { id, status, content: Some(content.into()), media: MediaList::new(), is_flagged: flagged, created_at: Utc::now() }
    }

    #[test]
    fn terminal_status_never_regresses_to_pending() {
        assert_eq!(Status::Approved.reconcile(Status::Pending), Status::Approved);
        assert_eq!(Status::Approved.reconcile(Status::Approved), Status::Approved);
        assert_eq!(Status::Approved.reconcile(Status::Forwarded), Status::Forwarded);
        assert_eq!(Status::Pending.reconcile(Status::Rejected), Status::Rejected);
    }

    #[test]
    fn filter_matches_status_flag_and_search() {
        let it = item(1, Status::Pending, "Hello World", true);
        assert!(Filter::default().matches(&it));
        assert!(Filter::status(Status::Pending).matches(&it));
        assert!(!Filter::status(Status::Approved).matches(&it));
        assert!(Filter { flagged: Some(true), ..Filter::default() }.matches(&it));
        assert!(Filter { search: Some("world".into()), ..Filter::default() }.matches(&it));
        assert!(!Filter { search: Some("bye".into()), ..Filter::default() }.matches(&it));
        assert!(Filter { search: Some("  ".into()), ..Filter::default() }.matches(&it));
    }

    #[test]
    fn item_deserializes_camel_case_with_defaults() {
        let v = serde_json::json!({
            "id": 7,
            "status": "pending",
            "createdAt": "2024-01-01T00:00:00Z",
            "media": [{ "type": "image", "url": "/m/1.jpg" }, { "type": "sticker", "url": "/m/2" }]
        });
        let it: Item = serde_json::from_value(v).expect("item");
        assert_eq!(it.id, 7);
        assert!(!it.is_flagged);
        assert_eq!(it.content, None);
        assert_eq!(it.media.len(), 2);
        assert_eq!(it.media[1].kind, MediaKind::Other);
    }

    #[test]
    fn stats_total_sums_statuses() {
        let s = QueueStats { pending: 3, approved: 2, rejected: 1, forwarded: 0 };
        assert_eq!(s.total(), 6);
        assert_eq!(s.count(Status::Approved), 2);
    }
}

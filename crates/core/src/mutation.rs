//! Pending mutations fed to the update scheduler.

use serde::{Deserialize, Serialize};

use crate::{Item, ItemId, MediaList, Status};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Add,
    Update,
    Remove,
}

/// Changed fields for an existing item. `None` means untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    pub id: ItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_flagged: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaList>,
}

impl ItemPatch {
    pub fn status(id: ItemId, status: Status) -> Self { Self { id, status: Some(status), ..Self::default() } }

    /// Full-record patch, used when the server hands back the whole item.
    pub fn from_item(item: Item) -> Self {
        Self {
            id: item.id,
            status: Some(item.status),
            content: item.content,
            is_flagged: Some(item.is_flagged),
            media: Some(item.media),
        }
    }

    /// Fold a later patch for the same id into this one; later fields win,
    /// except that a queued terminal status is never replaced by `Pending`.
    pub fn merge(&mut self, later: ItemPatch) {
        debug_assert_eq!(self.id, later.id);
        self.status = match (self.status, later.status) {
            (Some(a), Some(b)) => Some(a.reconcile(b)),
            (a, b) => b.or(a),
        };
        if later.content.is_some() { self.content = later.content; }
        if later.is_flagged.is_some() { self.is_flagged = later.is_flagged; }
        if later.media.is_some() { self.media = later.media; }
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::with_capacity(4);
        if self.status.is_some() { out.push("status"); }
        if self.content.is_some() { out.push("content"); }
        if self.is_flagged.is_some() { out.push("isFlagged"); }
        if self.media.is_some() { out.push("media"); }
        out
    }

    /// Apply onto `item`. Status goes through `Status::reconcile`.
    /// Returns whether the record changed.
    pub fn apply_to(&self, item: &mut Item) -> bool {
        let before = item.clone();
        if let Some(st) = self.status { item.status = item.status.reconcile(st); }
        if let Some(c) = &self.content { item.content = Some(c.clone()); }
        if let Some(f) = self.is_flagged { item.is_flagged = f; }
        if let Some(m) = &self.media { item.media = m.clone(); }
        *item != before
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Add(Item),
    Update(ItemPatch),
    Remove(ItemId),
}

impl Mutation {
    pub fn id(&self) -> ItemId {
        match self {
            Mutation::Add(it) => it.id,
            Mutation::Update(p) => p.id,
            Mutation::Remove(id) => *id,
        }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Add(_) => MutationKind::Add,
            Mutation::Update(_) => MutationKind::Update,
            Mutation::Remove(_) => MutationKind::Remove,
        }
    }
}

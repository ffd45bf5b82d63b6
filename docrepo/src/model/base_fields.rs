use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier and timestamps shared by most stored documents.
///
/// Embed it with `#[serde(flatten)]` and delegate the lifecycle hooks to it
/// (or mark the field `#[model(base)]` when deriving `Model`). The fields
/// serialize as `_id`, `createdAt` and `updatedAt` and are omitted while
/// unset, so a fresh value never overwrites stored data with nulls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseFields {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<bson::DateTime>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<bson::DateTime>,
}

impl BaseFields {
    pub fn new() -> BaseFields {
        BaseFields::default()
    }

    pub fn id(&self) -> Option<ObjectId> {
        self.id
    }

    pub fn set_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }

    /// Generates an identifier if none is set and returns the current one.
    pub fn default_id(&mut self) -> ObjectId {
        *self.id.get_or_insert_with(ObjectId::new)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.map(|d| d.to_chrono())
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.map(|d| d.to_chrono())
    }

    /// Assigns an identifier when unset and stamps both timestamps with the
    /// same instant.
    pub fn before_insert(&mut self) {
        self.default_id();
        let now = bson::DateTime::now();
        self.created_at = Some(now);
        self.updated_at = Some(now);
    }

    /// Re-stamps the update timestamp. Never moves it backwards.
    pub fn before_update(&mut self) {
        let now = bson::DateTime::now();
        self.updated_at = Some(match self.updated_at {
            Some(previous) if previous > now => previous,
            _ => now,
        });
    }
}

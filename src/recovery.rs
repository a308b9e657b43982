use catalog_api::AddLotRequest;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

use crate::cache::SafeCache;

pub mod controllers;

pub const RECOVERY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
pub enum MergeOperation {
    #[display("create")]
    Create,
    #[display("update")]
    Update,
}

/// A lot the merge could not write. Carries the full creation request so the
/// lot can be recreated later without the source file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecoveryEntry {
    pub customer_item_id: String,
    pub lot_number: String,
    pub catalog_id: i64,
    pub customer_catalog_id: String,
    pub seller_display_id: String,
    pub operation: MergeOperation,
    pub add_lot_request: AddLotRequest,
    pub error_message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Per-user queue of failed merge writes, kept in the cache for a day.
#[derive(Clone)]
pub struct RecoveryStore {
    cache: SafeCache,
    key: String,
}

impl RecoveryStore {
    pub fn new(cache: SafeCache, username: &str) -> Self {
        Self {
            cache,
            key: format!("{username}:merge_recovery"),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn entries(&self) -> Vec<RecoveryEntry> {
        self.cache
            .get::<Vec<RecoveryEntry>>(&self.key)
            .await
            .unwrap_or_default()
    }

    pub async fn find(&self, customer_item_id: &str) -> Option<RecoveryEntry> {
        self.entries()
            .await
            .into_iter()
            .find(|e| e.customer_item_id == customer_item_id)
    }

    pub async fn append(&self, entry: RecoveryEntry) {
        let mut entries = self.entries().await;
        log::info!(
            "Recording recovery entry for lot {} ({})",
            entry.customer_item_id,
            entry.operation
        );
        entries.push(entry);
        self.cache.set(&self.key, &entries, Some(RECOVERY_TTL)).await;
    }

    /// Drops the entry for `customer_item_id`. The whole key goes away once
    /// nothing is left.
    pub async fn remove(&self, customer_item_id: &str) {
        let mut entries = self.entries().await;
        entries.retain(|e| e.customer_item_id != customer_item_id);
        if entries.is_empty() {
            self.cache.delete(&self.key).await;
        } else {
            self.cache.set(&self.key, &entries, Some(RECOVERY_TTL)).await;
        }
    }

    pub async fn clear(&self) {
        self.cache.delete(&self.key).await;
    }
}

//! Storage abstraction for regwatch.
//!
//! The [`Store`] trait is the document repository plus the record tables the
//! downstream stages write to. Callers receive a store handle explicitly;
//! there is no global connection. Two implementations exist:
//!
//! - [`SqliteStore`](sqlite::SqliteStore): production backend.
//! - [`InMemoryStore`](memory::InMemoryStore): arena-backed, for tests and
//!   dry runs.
//!
//! # Version lineage
//!
//! Rows sharing a URL form an append-only chain `1, 2, 3, ...` where every
//! non-initial row points at its predecessor's id. [`plan_upsert`] is the
//! single decision function both backends use, and both serialize upserts
//! per URL so concurrent writers never collide on a version number.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

use crate::error::RepositoryError;
use crate::models::{
    Document, DocumentMetadata, DocumentText, KeywordConfig, KeywordMatch, NewDocumentText,
    NotificationLog, NotificationStatus, Upserted,
};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// A notification attempt, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub document_id: i64,
    pub subject: String,
    pub recipients: String,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Version a fetched file by URL + checksum |
/// | [`document_history`](Store::document_history) | Every version of a URL, newest first |
/// | [`save_text`](Store::save_text) | Persist an extracted or translated text |
/// | [`save_keyword_match`](Store::save_keyword_match) | Persist a keyword hit |
/// | [`log_notification`](Store::log_notification) | Record a notification attempt |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or refresh a document version. Atomic per URL.
    async fn upsert_document(&self, meta: &DocumentMetadata) -> Result<Upserted, RepositoryError>;

    async fn get_document(&self, id: i64) -> Result<Option<Document>, RepositoryError>;

    /// All versions of `url`, ordered by version descending.
    async fn document_history(&self, url: &str) -> Result<Vec<Document>, RepositoryError>;

    async fn count_documents(&self) -> Result<i64, RepositoryError>;

    async fn save_text(&self, text: NewDocumentText) -> Result<DocumentText, RepositoryError>;

    /// Texts of a document, newest first. `original` filters on
    /// `is_original` when set.
    async fn document_texts(
        &self,
        document_id: i64,
        original: Option<bool>,
    ) -> Result<Vec<DocumentText>, RepositoryError>;

    async fn get_or_create_keyword(
        &self,
        keyword: &str,
        category: &str,
    ) -> Result<KeywordConfig, RepositoryError>;

    async fn list_keywords(&self, active_only: bool)
        -> Result<Vec<KeywordConfig>, RepositoryError>;

    async fn save_keyword_match(
        &self,
        document_id: i64,
        text_id: i64,
        keyword: &KeywordConfig,
        occurrences: i64,
        context_snippet: Option<String>,
    ) -> Result<KeywordMatch, RepositoryError>;

    async fn keyword_matches(&self, document_id: i64)
        -> Result<Vec<KeywordMatch>, RepositoryError>;

    async fn log_notification(
        &self,
        entry: NewNotification,
    ) -> Result<NotificationLog, RepositoryError>;

    async fn notifications(&self, document_id: i64)
        -> Result<Vec<NotificationLog>, RepositoryError>;
}

/// What an upsert must do, given the latest stored version of the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertPlan {
    /// Append a new row with this version and predecessor.
    Insert {
        version: i64,
        previous_version_id: Option<i64>,
    },
    /// Same checksum: refresh `last_seen_at` of this row only.
    Touch { id: i64 },
}

/// Decide the upsert action. Checksum equality under a fixed URL is the
/// only "no change" criterion.
pub fn plan_upsert(latest: Option<&Document>, incoming_checksum: &str) -> UpsertPlan {
    match latest {
        None => UpsertPlan::Insert {
            version: 1,
            previous_version_id: None,
        },
        Some(doc) if doc.checksum == incoming_checksum => UpsertPlan::Touch { id: doc.id },
        Some(doc) => UpsertPlan::Insert {
            version: doc.version + 1,
            previous_version_id: Some(doc.id),
        },
    }
}

/// Single-writer-per-URL lock table.
///
/// Upserts for the same URL queue on one async mutex; different URLs never
/// contend. Idle entries are pruned once the table grows.
#[derive(Default)]
pub struct UrlLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

const PRUNE_THRESHOLD: usize = 1024;

impl UrlLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, url: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            Arc::clone(locks.entry(url.to_string()).or_default())
        };
        mutex.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

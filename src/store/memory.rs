//! In-memory [`Store`] implementation for tests and dry runs.
//!
//! Documents live in an arena (`Vec<Document>`) where a row's id is its
//! position plus one. Predecessor links are plain ids into the same arena,
//! and since rows are only ever appended a predecessor always precedes its
//! successor. Every table sits behind one `RwLock`, which makes each upsert
//! atomic with respect to every other writer.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{plan_upsert, NewNotification, Store, UpsertPlan};
use crate::error::RepositoryError;
use crate::models::{
    now_millis, Document, DocumentMetadata, DocumentText, KeywordConfig, KeywordMatch,
    NewDocumentText, NotificationLog, UpsertOutcome, Upserted,
};

#[derive(Default)]
struct Tables {
    documents: Vec<Document>,
    texts: Vec<DocumentText>,
    keywords: Vec<KeywordConfig>,
    matches: Vec<KeywordMatch>,
    notifications: Vec<NotificationLog>,
}

fn next_id(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX - 1) + 1
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle a keyword's active flag. Returns false when the keyword is unknown.
    pub fn set_keyword_active(&self, keyword: &str, active: bool) -> bool {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        match tables.keywords.iter_mut().find(|k| k.keyword == keyword) {
            Some(k) => {
                k.is_active = active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, meta: &DocumentMetadata) -> Result<Upserted, RepositoryError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let now = now_millis();

        let latest = tables
            .documents
            .iter()
            .filter(|d| d.url == meta.url)
            .max_by_key(|d| d.version);

        match plan_upsert(latest, &meta.checksum) {
            UpsertPlan::Touch { id } => {
                let idx = usize::try_from(id - 1).map_err(|_| RepositoryError::NotFound(id))?;
                let doc = tables
                    .documents
                    .get_mut(idx)
                    .ok_or(RepositoryError::NotFound(id))?;
                doc.last_seen_at = now;
                Ok(Upserted {
                    document: doc.clone(),
                    outcome: UpsertOutcome::Unchanged,
                })
            }
            UpsertPlan::Insert {
                version,
                previous_version_id,
            } => {
                let id = next_id(tables.documents.len());
                let doc = Document::new_version(id, meta, version, previous_version_id, now);
                tables.documents.push(doc.clone());
                let outcome = if version == 1 {
                    UpsertOutcome::Created
                } else {
                    UpsertOutcome::NewVersion
                };
                Ok(Upserted {
                    document: doc,
                    outcome,
                })
            }
        }
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>, RepositoryError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(usize::try_from(id - 1)
            .ok()
            .and_then(|idx| tables.documents.get(idx))
            .cloned())
    }

    async fn document_history(&self, url: &str) -> Result<Vec<Document>, RepositoryError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut history: Vec<Document> = tables
            .documents
            .iter()
            .filter(|d| d.url == url)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(history)
    }

    async fn count_documents(&self) -> Result<i64, RepositoryError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(next_id(tables.documents.len()) - 1)
    }

    async fn save_text(&self, text: NewDocumentText) -> Result<DocumentText, RepositoryError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let row = DocumentText {
            id: next_id(tables.texts.len()),
            document_id: text.document_id,
            language: text.language,
            is_original: text.is_original,
            full_text: text.full_text,
            summary: text.summary,
            created_at: now_millis(),
        };
        tables.texts.push(row.clone());
        Ok(row)
    }

    async fn document_texts(
        &self,
        document_id: i64,
        original: Option<bool>,
    ) -> Result<Vec<DocumentText>, RepositoryError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .texts
            .iter()
            .rev()
            .filter(|t| t.document_id == document_id)
            .filter(|t| original.map_or(true, |o| t.is_original == o))
            .cloned()
            .collect())
    }

    async fn get_or_create_keyword(
        &self,
        keyword: &str,
        category: &str,
    ) -> Result<KeywordConfig, RepositoryError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = tables.keywords.iter().find(|k| k.keyword == keyword) {
            return Ok(existing.clone());
        }
        let kw = KeywordConfig {
            id: next_id(tables.keywords.len()),
            keyword: keyword.to_string(),
            category: category.to_string(),
            is_active: true,
        };
        tables.keywords.push(kw.clone());
        Ok(kw)
    }

    async fn list_keywords(
        &self,
        active_only: bool,
    ) -> Result<Vec<KeywordConfig>, RepositoryError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .keywords
            .iter()
            .filter(|k| !active_only || k.is_active)
            .cloned()
            .collect())
    }

    async fn save_keyword_match(
        &self,
        document_id: i64,
        text_id: i64,
        keyword: &KeywordConfig,
        occurrences: i64,
        context_snippet: Option<String>,
    ) -> Result<KeywordMatch, RepositoryError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let m = KeywordMatch {
            id: next_id(tables.matches.len()),
            document_id,
            text_id,
            keyword_id: keyword.id,
            keyword: keyword.keyword.clone(),
            occurrences,
            context_snippet,
        };
        tables.matches.push(m.clone());
        Ok(m)
    }

    async fn keyword_matches(
        &self,
        document_id: i64,
    ) -> Result<Vec<KeywordMatch>, RepositoryError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .matches
            .iter()
            .filter(|m| m.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn log_notification(
        &self,
        entry: NewNotification,
    ) -> Result<NotificationLog, RepositoryError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let log = NotificationLog {
            id: next_id(tables.notifications.len()),
            document_id: entry.document_id,
            subject: entry.subject,
            recipients: entry.recipients,
            status: entry.status,
            error_message: entry.error_message,
            created_at: now_millis(),
        };
        tables.notifications.push(log.clone());
        Ok(log)
    }

    async fn notifications(
        &self,
        document_id: i64,
    ) -> Result<Vec<NotificationLog>, RepositoryError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .notifications
            .iter()
            .filter(|n| n.document_id == document_id)
            .cloned()
            .collect())
    }
}

//! SQLite-backed [`Store`] implementation.
//!
//! Upserts run inside a `BEGIN IMMEDIATE` transaction, behind the per-URL
//! lock, so the read of the latest version and the write that follows it can
//! never interleave with another writer. An upsert that is cancelled or fails
//! before commit rolls back when its transaction is dropped. The
//! `UNIQUE(url, version)` constraint turns any remaining race (e.g. a second
//! process on the same file) into [`RepositoryError::VersionConflict`].

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use super::{plan_upsert, NewNotification, Store, UpsertPlan, UrlLocks};
use crate::error::RepositoryError;
use crate::models::{
    from_millis, now_millis, Document, DocumentMetadata, DocumentText, KeywordConfig, KeywordMatch,
    NewDocumentText, NotificationLog, NotificationStatus, UpsertOutcome, Upserted,
};

const DOCUMENT_COLUMNS: &str = "id, source, title, url, filename, local_path, filesize_bytes, \
     mime_type, checksum, version, previous_version_id, first_seen_at, last_seen_at, downloaded_at";

pub struct SqliteStore {
    pool: SqlitePool,
    url_locks: UrlLocks,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            url_locks: UrlLocks::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_document(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        source: row.get("source"),
        title: row.get("title"),
        url: row.get("url"),
        filename: row.get("filename"),
        local_path: row.get("local_path"),
        filesize_bytes: row.get("filesize_bytes"),
        mime_type: row.get("mime_type"),
        checksum: row.get("checksum"),
        version: row.get("version"),
        previous_version_id: row.get("previous_version_id"),
        first_seen_at: from_millis(row.get("first_seen_at")),
        last_seen_at: from_millis(row.get("last_seen_at")),
        downloaded_at: from_millis(row.get("downloaded_at")),
    }
}

fn row_to_text(row: &SqliteRow) -> DocumentText {
    DocumentText {
        id: row.get("id"),
        document_id: row.get("document_id"),
        language: row.get("language"),
        is_original: row.get("is_original"),
        full_text: row.get("full_text"),
        summary: row.get("summary"),
        created_at: from_millis(row.get("created_at")),
    }
}

fn row_to_keyword(row: &SqliteRow) -> KeywordConfig {
    KeywordConfig {
        id: row.get("id"),
        keyword: row.get("keyword"),
        category: row.get("category"),
        is_active: row.get("is_active"),
    }
}

fn row_to_notification(row: &SqliteRow) -> NotificationLog {
    let status: String = row.get("status");
    NotificationLog {
        id: row.get("id"),
        document_id: row.get("document_id"),
        subject: row.get("subject"),
        recipients: row.get("recipients"),
        status: NotificationStatus::parse(&status),
        error_message: row.get("error_message"),
        created_at: from_millis(row.get("created_at")),
    }
}

/// Body of the upsert transaction. The caller owns begin and commit.
async fn upsert_in_tx(
    conn: &mut SqliteConnection,
    meta: &DocumentMetadata,
) -> Result<Upserted, RepositoryError> {
    let latest = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE url = ? ORDER BY version DESC LIMIT 1"
    ))
    .bind(&meta.url)
    .fetch_optional(&mut *conn)
    .await?
    .map(|row| row_to_document(&row));

    let now = now_millis();

    match plan_upsert(latest.as_ref(), &meta.checksum) {
        UpsertPlan::Touch { id } => {
            sqlx::query("UPDATE documents SET last_seen_at = ? WHERE id = ?")
                .bind(now.timestamp_millis())
                .bind(id)
                .execute(&mut *conn)
                .await?;
            let mut document = latest.ok_or(RepositoryError::NotFound(id))?;
            document.last_seen_at = now;
            debug!(url = %meta.url, version = document.version, "checksum unchanged");
            Ok(Upserted {
                document,
                outcome: UpsertOutcome::Unchanged,
            })
        }
        UpsertPlan::Insert {
            version,
            previous_version_id,
        } => {
            let result = sqlx::query(
                r#"
                INSERT INTO documents (source, title, url, filename, local_path, filesize_bytes,
                                       mime_type, checksum, version, previous_version_id,
                                       first_seen_at, last_seen_at, downloaded_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&meta.source)
            .bind(&meta.title)
            .bind(&meta.url)
            .bind(&meta.filename)
            .bind(&meta.local_path)
            .bind(meta.filesize_bytes)
            .bind(&meta.mime_type)
            .bind(&meta.checksum)
            .bind(version)
            .bind(previous_version_id)
            .bind(now.timestamp_millis())
            .bind(now.timestamp_millis())
            .bind(meta.downloaded_at.timestamp_millis())
            .execute(&mut *conn)
            .await
            .map_err(|e| RepositoryError::from_insert(e, &meta.url, version))?;

            let document = Document::new_version(
                result.last_insert_rowid(),
                meta,
                version,
                previous_version_id,
                now,
            );
            let outcome = if version == 1 {
                UpsertOutcome::Created
            } else {
                UpsertOutcome::NewVersion
            };
            debug!(url = %meta.url, version, id = document.id, "inserted version");
            Ok(Upserted { document, outcome })
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, meta: &DocumentMetadata) -> Result<Upserted, RepositoryError> {
        let _guard = self.url_locks.lock(&meta.url).await;

        // Dropping `tx` before commit (error or cancellation) rolls it back.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let upserted = upsert_in_tx(&mut tx, meta).await?;
        tx.commit().await?;
        Ok(upserted)
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_document(&r)))
    }

    async fn document_history(&self, url: &str) -> Result<Vec<Document>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE url = ? ORDER BY version DESC"
        ))
        .bind(url)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn count_documents(&self) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn save_text(&self, text: NewDocumentText) -> Result<DocumentText, RepositoryError> {
        let now = now_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO document_texts (document_id, language, is_original, full_text, summary, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(text.document_id)
        .bind(&text.language)
        .bind(text.is_original)
        .bind(&text.full_text)
        .bind(&text.summary)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(DocumentText {
            id: result.last_insert_rowid(),
            document_id: text.document_id,
            language: text.language,
            is_original: text.is_original,
            full_text: text.full_text,
            summary: text.summary,
            created_at: now,
        })
    }

    async fn document_texts(
        &self,
        document_id: i64,
        original: Option<bool>,
    ) -> Result<Vec<DocumentText>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, language, is_original, full_text, summary, created_at
            FROM document_texts
            WHERE document_id = ? AND (? IS NULL OR is_original = ?)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(document_id)
        .bind(original)
        .bind(original)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_text).collect())
    }

    async fn get_or_create_keyword(
        &self,
        keyword: &str,
        category: &str,
    ) -> Result<KeywordConfig, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO keyword_configs (keyword, category, is_active, created_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(keyword) DO NOTHING
            "#,
        )
        .bind(keyword)
        .bind(category)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, keyword, category, is_active FROM keyword_configs WHERE keyword = ?",
        )
        .bind(keyword)
        .fetch_one(&self.pool)
        .await?;
        Ok(row_to_keyword(&row))
    }

    async fn list_keywords(
        &self,
        active_only: bool,
    ) -> Result<Vec<KeywordConfig>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, keyword, category, is_active FROM keyword_configs
            WHERE (? = 0 OR is_active = 1)
            ORDER BY id ASC
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_keyword).collect())
    }

    async fn save_keyword_match(
        &self,
        document_id: i64,
        text_id: i64,
        keyword: &KeywordConfig,
        occurrences: i64,
        context_snippet: Option<String>,
    ) -> Result<KeywordMatch, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO keyword_matches (document_id, text_id, keyword_id, occurrences, context_snippet, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document_id)
        .bind(text_id)
        .bind(keyword.id)
        .bind(occurrences)
        .bind(&context_snippet)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(KeywordMatch {
            id: result.last_insert_rowid(),
            document_id,
            text_id,
            keyword_id: keyword.id,
            keyword: keyword.keyword.clone(),
            occurrences,
            context_snippet,
        })
    }

    async fn keyword_matches(
        &self,
        document_id: i64,
    ) -> Result<Vec<KeywordMatch>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.document_id, m.text_id, m.keyword_id, k.keyword,
                   m.occurrences, m.context_snippet
            FROM keyword_matches m
            JOIN keyword_configs k ON k.id = m.keyword_id
            WHERE m.document_id = ?
            ORDER BY m.id ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| KeywordMatch {
                id: row.get("id"),
                document_id: row.get("document_id"),
                text_id: row.get("text_id"),
                keyword_id: row.get("keyword_id"),
                keyword: row.get("keyword"),
                occurrences: row.get("occurrences"),
                context_snippet: row.get("context_snippet"),
            })
            .collect())
    }

    async fn log_notification(
        &self,
        entry: NewNotification,
    ) -> Result<NotificationLog, RepositoryError> {
        let now = now_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO notification_logs (document_id, subject, recipients, status, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.document_id)
        .bind(&entry.subject)
        .bind(&entry.recipients)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(NotificationLog {
            id: result.last_insert_rowid(),
            document_id: entry.document_id,
            subject: entry.subject,
            recipients: entry.recipients,
            status: entry.status,
            error_message: entry.error_message,
            created_at: now,
        })
    }

    async fn notifications(
        &self,
        document_id: i64,
    ) -> Result<Vec<NotificationLog>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, subject, recipients, status, error_message, created_at
            FROM notification_logs WHERE document_id = ? ORDER BY id ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_notification).collect())
    }
}

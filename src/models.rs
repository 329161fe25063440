//! Core data models used throughout regwatch.
//!
//! These types represent discovered links, fetched file metadata, versioned
//! documents and the downstream records (texts, keyword matches,
//! notifications) that hang off a document identity.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A link found on an authority listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    pub url: String,
    pub title: String,
}

/// Metadata of a fetched (or archive-extracted) file, before it is versioned.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub title: String,
    pub url: String,
    pub filename: String,
    pub local_path: String,
    pub filesize_bytes: i64,
    pub mime_type: String,
    pub checksum: String,
    pub downloaded_at: DateTime<Utc>,
}

/// One version of a document stored in the repository.
///
/// Identity across versions is the `url`; `id` is unique per row and is
/// assigned in increasing order, so `previous_version_id` always points at
/// a smaller `id`.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub source: String,
    pub title: String,
    pub url: String,
    pub filename: String,
    pub local_path: String,
    pub filesize_bytes: i64,
    pub mime_type: String,
    pub checksum: String,
    pub version: i64,
    pub previous_version_id: Option<i64>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub downloaded_at: DateTime<Utc>,
}

impl Document {
    /// Build the row for a fresh version from incoming metadata.
    pub fn new_version(
        id: i64,
        meta: &DocumentMetadata,
        version: i64,
        previous_version_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source: meta.source.clone(),
            title: meta.title.clone(),
            url: meta.url.clone(),
            filename: meta.filename.clone(),
            local_path: meta.local_path.clone(),
            filesize_bytes: meta.filesize_bytes,
            mime_type: meta.mime_type.clone(),
            checksum: meta.checksum.clone(),
            version,
            previous_version_id,
            first_seen_at: now,
            last_seen_at: now,
            downloaded_at: meta.downloaded_at,
        }
    }
}

/// What an upsert did to the lineage of a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// First observation of the URL: version 1 inserted.
    Created,
    /// Checksum changed: a new version was appended.
    NewVersion,
    /// Checksum unchanged: only `last_seen_at` moved.
    Unchanged,
}

impl UpsertOutcome {
    /// New or changed content that the downstream stages should see.
    pub fn is_change(self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

#[derive(Debug, Clone)]
pub struct Upserted {
    pub document: Document,
    pub outcome: UpsertOutcome,
}

/// Text extracted from (or translated for) a document version.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentText {
    pub id: i64,
    pub document_id: i64,
    pub language: String,
    pub is_original: bool,
    pub full_text: String,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A new text row, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewDocumentText {
    pub document_id: i64,
    pub language: String,
    pub is_original: bool,
    pub full_text: String,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeywordConfig {
    pub id: i64,
    pub keyword: String,
    pub category: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeywordMatch {
    pub id: i64,
    pub document_id: i64,
    pub text_id: i64,
    pub keyword_id: i64,
    pub keyword: String,
    pub occurrences: i64,
    pub context_snippet: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationStatus {
    Sent,
    Error,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("SENT") {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Error
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationLog {
    pub id: i64,
    pub document_id: i64,
    pub subject: String,
    pub recipients: String,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Convert a stored millisecond timestamp back into a `DateTime`.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Current time truncated to millisecond precision, matching what the
/// SQLite backend persists.
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

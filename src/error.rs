//! Error taxonomy for the ingestion engine and stage pipeline.
//!
//! Per-document failures ([`RegwatchError::Network`], [`RegwatchError::ArchiveRead`],
//! [`RegwatchError::Repository`], ...) are caught by the orchestrator and the
//! stage runner and never abort a batch. Only
//! [`RegwatchError::UnknownAuthority`] is fatal at entry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegwatchError {
    /// Transient fetch failure. The candidate is skipped, the batch continues.
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Corrupt or unreadable container. Expansion is skipped, the parent
    /// record is kept.
    #[error("cannot read archive {name}: {message}")]
    ArchiveRead { name: String, message: String },

    /// No extractor for the format. Callers treat this as an empty text.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The format is supported but the content could not be parsed.
    #[error("text extraction failed for {name}: {message}")]
    Extraction { name: String, message: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("unknown authority: '{0}'")]
    UnknownAuthority(String),

    #[error("translation failed: {0}")]
    Translation(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the document store.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Another writer inserted the same `(url, version)` first.
    #[error("concurrent insert of version {version} for {url}")]
    VersionConflict { url: String, version: i64 },

    #[error("document not found: {0}")]
    NotFound(i64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RepositoryError {
    /// Map a unique-constraint violation on `(url, version)` into a
    /// [`RepositoryError::VersionConflict`]; every other error is passed through.
    pub fn from_insert(err: sqlx::Error, url: &str, version: i64) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return RepositoryError::VersionConflict {
                    url: url.to_string(),
                    version,
                };
            }
        }
        RepositoryError::Database(err)
    }
}

pub type Result<T, E = RegwatchError> = std::result::Result<T, E>;

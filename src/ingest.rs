//! Ingestion orchestration.
//!
//! Coordinates one authority batch: discovery → fetch → artifact storage →
//! fingerprint → repository upsert → (for archives) expansion and member
//! upserts. Candidates are fetched with bounded concurrency but results keep
//! discovery order, each archive followed directly by its members.
//!
//! A failing candidate is logged and counted; it never aborts the batch.
//! Only an unknown authority code fails the whole call.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};

use crate::archive;
use crate::config::{AuthorityConfig, Config};
use crate::discovery::LinkDiscovery;
use crate::error::{RegwatchError, RepositoryError};
use crate::fetch::Fetcher;
use crate::fingerprint;
use crate::formats::{resolve_mime_type, FileFormat, MIME_ZIP};
use crate::models::{now_millis, DocumentMetadata, LinkCandidate, UpsertOutcome, Upserted};
use crate::store::Store;

/// Upsert attempts when another writer wins the same `(url, version)`.
const MAX_UPSERT_ATTEMPTS: usize = 3;

/// Result of one authority batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub authority: String,
    /// Links returned by discovery.
    pub discovered: usize,
    /// Links whose bytes were fetched and stored.
    pub fetched: usize,
    /// Fetch, storage or upsert failures.
    pub errored: usize,
    /// Archives that could not be expanded (their own record is kept).
    pub archive_errors: usize,
    /// Ids of archive records whose members were expanded in this batch.
    pub expanded_archives: Vec<i64>,
    /// Every upserted record, top-level first, then its archive members.
    pub records: Vec<Upserted>,
}

impl IngestReport {
    fn count(&self, outcome: UpsertOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn created(&self) -> usize {
        self.count(UpsertOutcome::Created)
    }

    pub fn changed(&self) -> usize {
        self.count(UpsertOutcome::NewVersion)
    }

    pub fn unchanged(&self) -> usize {
        self.count(UpsertOutcome::Unchanged)
    }

    pub fn was_expanded(&self, document_id: i64) -> bool {
        self.expanded_archives.contains(&document_id)
    }

    /// Records with new content, the input of the stage pipeline.
    pub fn changed_records(&self) -> impl Iterator<Item = &Upserted> {
        self.records.iter().filter(|r| r.outcome.is_change())
    }
}

#[derive(Default)]
struct CandidateResult {
    fetched: bool,
    errored: usize,
    archive_error: bool,
    expanded: Option<i64>,
    records: Vec<Upserted>,
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    discovery: Arc<dyn LinkDiscovery>,
    fetcher: Arc<dyn Fetcher>,
    authorities: BTreeMap<String, AuthorityConfig>,
    storage_root: PathBuf,
    concurrency: usize,
}

impl Ingestor {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        discovery: Arc<dyn LinkDiscovery>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            store,
            discovery,
            fetcher,
            authorities: config.authorities.clone(),
            storage_root: config.storage.root.clone(),
            concurrency: config.fetch.concurrency.max(1),
        }
    }

    /// Run one batch for `code`.
    #[instrument(skip(self))]
    pub async fn ingest(&self, code: &str) -> Result<IngestReport, RegwatchError> {
        let authority = self
            .authorities
            .get(code)
            .ok_or_else(|| RegwatchError::UnknownAuthority(code.to_string()))?;

        let candidates = self.discovery.discover(authority).await?;
        info!(authority = code, candidates = candidates.len(), "starting ingestion");

        let futures: Vec<_> = candidates
            .iter()
            .map(|candidate| self.process_candidate(authority, candidate).boxed())
            .collect();
        let results: Vec<CandidateResult> = stream::iter(futures)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = IngestReport {
            authority: code.to_string(),
            discovered: candidates.len(),
            ..IngestReport::default()
        };
        for result in results {
            report.fetched += usize::from(result.fetched);
            report.errored += result.errored;
            report.archive_errors += usize::from(result.archive_error);
            report.expanded_archives.extend(result.expanded);
            report.records.extend(result.records);
        }

        info!(
            authority = code,
            fetched = report.fetched,
            created = report.created(),
            changed = report.changed(),
            unchanged = report.unchanged(),
            errored = report.errored,
            "ingestion finished"
        );
        Ok(report)
    }

    async fn process_candidate(
        &self,
        authority: &AuthorityConfig,
        candidate: &LinkCandidate,
    ) -> CandidateResult {
        let mut result = CandidateResult::default();

        let (meta, bytes) = match self.download(authority, candidate).await {
            Ok(downloaded) => downloaded,
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "skipping candidate");
                result.errored += 1;
                return result;
            }
        };
        result.fetched = true;

        let parent_id = match self.upsert(&meta).await {
            Ok(upserted) => {
                let id = upserted.document.id;
                result.records.push(upserted);
                id
            }
            Err(e) => {
                error!(url = %meta.url, error = %e, "upsert failed");
                result.errored += 1;
                return result;
            }
        };

        if !is_archive(&meta) {
            return result;
        }

        let members = match expand_archive(bytes, meta, self.storage_root.clone()).await {
            Ok(members) => members,
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "archive expansion failed, keeping parent");
                result.archive_error = true;
                return result;
            }
        };
        result.expanded = Some(parent_id);

        for member in members {
            match self.upsert(&member).await {
                Ok(upserted) => result.records.push(upserted),
                Err(e) => {
                    error!(url = %member.url, error = %e, "member upsert failed");
                    result.errored += 1;
                }
            }
        }
        result
    }

    /// Fetch, store and fingerprint one candidate. Completes before any
    /// repository lock is taken.
    async fn download(
        &self,
        authority: &AuthorityConfig,
        candidate: &LinkCandidate,
    ) -> Result<(DocumentMetadata, Vec<u8>), RegwatchError> {
        debug!(url = %candidate.url, "downloading");
        let resource = self.fetcher.fetch(&candidate.url).await?;
        let downloaded_at = now_millis();

        let filename = filename_from_url(&candidate.url);
        let checksum = fingerprint::compute(&resource.bytes);
        let local_path = artifact_path(&self.storage_root, &checksum, &filename);
        if let Some(dir) = local_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&local_path, &resource.bytes).await?;

        let meta = DocumentMetadata {
            source: authority.source_label.clone(),
            title: candidate.title.clone(),
            url: candidate.url.clone(),
            mime_type: resolve_mime_type(resource.content_type.as_deref(), &filename),
            filename,
            local_path: local_path.to_string_lossy().to_string(),
            filesize_bytes: resource.bytes.len() as i64,
            checksum,
            downloaded_at,
        };
        Ok((meta, resource.bytes))
    }

    async fn upsert(&self, meta: &DocumentMetadata) -> Result<Upserted, RepositoryError> {
        let mut attempt = 1;
        loop {
            match self.store.upsert_document(meta).await {
                Err(RepositoryError::VersionConflict { version, .. })
                    if attempt < MAX_UPSERT_ATTEMPTS =>
                {
                    warn!(url = %meta.url, version, attempt, "version conflict, retrying upsert");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn is_archive(meta: &DocumentMetadata) -> bool {
    FileFormat::from_name(&meta.filename).is_archive() || meta.mime_type == MIME_ZIP
}

async fn expand_archive(
    bytes: Vec<u8>,
    parent: DocumentMetadata,
    storage_root: PathBuf,
) -> Result<Vec<DocumentMetadata>, RegwatchError> {
    tokio::task::spawn_blocking(move || archive::expand(&bytes, &parent, &storage_root))
        .await
        .map_err(|e| RegwatchError::ArchiveRead {
            name: "archive".to_string(),
            message: e.to_string(),
        })?
}

/// Last path segment of `url`, or `download` when there is none.
pub fn filename_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

/// Where a fetched artifact is stored: `<root>/<checksum prefix>/<filename>`.
/// Two URLs sharing a filename never overwrite each other unless their bytes
/// are identical.
pub fn artifact_path(storage_root: &Path, checksum: &str, filename: &str) -> PathBuf {
    storage_root
        .join(fingerprint::short(checksum))
        .join(filename)
}

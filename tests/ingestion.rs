use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regwatch::config::{AuthorityConfig, Config};
use regwatch::discovery::LinkDiscovery;
use regwatch::error::{RegwatchError, RepositoryError};
use regwatch::fetch::{FetchedResource, Fetcher};
use regwatch::ingest::Ingestor;
use regwatch::models::{
    Document, DocumentMetadata, DocumentText, KeywordConfig, KeywordMatch, LinkCandidate,
    NewDocumentText, NotificationLog, UpsertOutcome, Upserted,
};
use regwatch::store::{InMemoryStore, NewNotification, SqliteStore, Store};
use regwatch::{db, fingerprint, migrate};
use tempfile::TempDir;

const CSV_URL: &str = "https://test.example/data/codes.csv";
const ZIP_URL: &str = "https://test.example/data/pack.zip";

struct FakeDiscovery {
    links: Vec<LinkCandidate>,
}

#[async_trait]
impl LinkDiscovery for FakeDiscovery {
    async fn discover(
        &self,
        _authority: &AuthorityConfig,
    ) -> Result<Vec<LinkCandidate>, RegwatchError> {
        Ok(self.links.clone())
    }
}

/// Serves bytes per URL; a URL without content fails like a dead link.
#[derive(Default)]
struct FakeFetcher {
    content: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeFetcher {
    fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.content.lock().unwrap().insert(url.to_string(), bytes);
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, RegwatchError> {
        let bytes = self.content.lock().unwrap().get(url).cloned();
        match bytes {
            Some(bytes) => Ok(FetchedResource {
                bytes,
                content_type: None,
            }),
            None => Err(RegwatchError::Network {
                url: url.to_string(),
                message: "HTTP 503 Service Unavailable".to_string(),
            }),
        }
    }
}

/// Loses the `(url, version)` race `conflicts` times before delegating
/// upserts to an in-memory store.
struct ConflictingStore {
    inner: InMemoryStore,
    conflicts: AtomicUsize,
    attempts: AtomicUsize,
}

impl ConflictingStore {
    fn new(conflicts: usize) -> Self {
        Self {
            inner: InMemoryStore::new(),
            conflicts: AtomicUsize::new(conflicts),
            attempts: AtomicUsize::new(0),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for ConflictingStore {
    async fn upsert_document(&self, meta: &DocumentMetadata) -> Result<Upserted, RepositoryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let lost = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(RepositoryError::VersionConflict {
                url: meta.url.clone(),
                version: 1,
            });
        }
        self.inner.upsert_document(meta).await
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>, RepositoryError> {
        self.inner.get_document(id).await
    }

    async fn document_history(&self, url: &str) -> Result<Vec<Document>, RepositoryError> {
        self.inner.document_history(url).await
    }

    async fn count_documents(&self) -> Result<i64, RepositoryError> {
        self.inner.count_documents().await
    }

    async fn save_text(&self, text: NewDocumentText) -> Result<DocumentText, RepositoryError> {
        self.inner.save_text(text).await
    }

    async fn document_texts(
        &self,
        document_id: i64,
        original: Option<bool>,
    ) -> Result<Vec<DocumentText>, RepositoryError> {
        self.inner.document_texts(document_id, original).await
    }

    async fn get_or_create_keyword(
        &self,
        keyword: &str,
        category: &str,
    ) -> Result<KeywordConfig, RepositoryError> {
        self.inner.get_or_create_keyword(keyword, category).await
    }

    async fn list_keywords(&self, active_only: bool) -> Result<Vec<KeywordConfig>, RepositoryError> {
        self.inner.list_keywords(active_only).await
    }

    async fn save_keyword_match(
        &self,
        document_id: i64,
        text_id: i64,
        keyword: &KeywordConfig,
        occurrences: i64,
        context_snippet: Option<String>,
    ) -> Result<KeywordMatch, RepositoryError> {
        self.inner
            .save_keyword_match(document_id, text_id, keyword, occurrences, context_snippet)
            .await
    }

    async fn keyword_matches(&self, document_id: i64) -> Result<Vec<KeywordMatch>, RepositoryError> {
        self.inner.keyword_matches(document_id).await
    }

    async fn log_notification(
        &self,
        entry: NewNotification,
    ) -> Result<NotificationLog, RepositoryError> {
        self.inner.log_notification(entry).await
    }

    async fn notifications(&self, document_id: i64) -> Result<Vec<NotificationLog>, RepositoryError> {
        self.inner.notifications(document_id).await
    }
}

fn link(url: &str, title: &str) -> LinkCandidate {
    LinkCandidate {
        url: url.to_string(),
        title: title.to_string(),
    }
}

fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn test_config(tmp: &TempDir, concurrency: usize) -> Config {
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("regwatch.sqlite");
    config.storage.root = tmp.path().join("raw");
    config.fetch.concurrency = concurrency;
    config.authorities.insert(
        "TEST".to_string(),
        AuthorityConfig {
            name: "Test Authority".to_string(),
            source_label: "TEST_Source".to_string(),
            base_url: "https://test.example".to_string(),
            listing_url: "https://test.example/index.html".to_string(),
            interval_hours: 6,
        },
    );
    config
}

async fn sqlite_store(config: &Config) -> Arc<dyn Store> {
    let pool = db::connect(config).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}

fn ingestor(
    config: &Config,
    store: Arc<dyn Store>,
    links: Vec<LinkCandidate>,
    fetcher: Arc<FakeFetcher>,
) -> Ingestor {
    Ingestor::new(config, store, Arc::new(FakeDiscovery { links }), fetcher)
}

fn scenario_links() -> Vec<LinkCandidate> {
    vec![link(CSV_URL, "Code lists"), link(ZIP_URL, "Reporting pack")]
}

fn scenario_fetcher() -> Arc<FakeFetcher> {
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.serve(CSV_URL, b"code,label\n1,loan\n".to_vec());
    fetcher.serve(
        ZIP_URL,
        build_zip(&[
            ("manual.pdf", "%PDF-1.4 manual"),
            ("notes.docx", "not tracked"),
        ]),
    );
    fetcher
}

#[tokio::test]
async fn scenario_a_first_run_creates_three_documents() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 2);
    let store = sqlite_store(&config).await;
    let ingestor = ingestor(&config, Arc::clone(&store), scenario_links(), scenario_fetcher());

    let report = ingestor.ingest("TEST").await.unwrap();

    let urls: Vec<&str> = report.records.iter().map(|r| r.document.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            CSV_URL,
            ZIP_URL,
            "https://test.example/data/pack.zip#manual.pdf"
        ]
    );
    assert!(report
        .records
        .iter()
        .all(|r| r.document.version == 1 && r.outcome == UpsertOutcome::Created));
    assert_eq!(report.created(), 3);
    assert_eq!(report.fetched, 2);
    assert_eq!(report.errored, 0);
    assert_eq!(store.count_documents().await.unwrap(), 3);
    assert!(report.was_expanded(report.records[1].document.id));
    assert!(!report.was_expanded(report.records[0].document.id));

    let csv = &report.records[0].document;
    assert_eq!(csv.mime_type, "text/csv");
    assert_eq!(csv.source, "TEST_Source");
    assert_eq!(csv.checksum, fingerprint::compute(b"code,label\n1,loan\n"));
    assert_eq!(std::fs::read(&csv.local_path).unwrap(), b"code,label\n1,loan\n");

    let member = &report.records[2].document;
    assert_eq!(member.title, "Reporting pack - manual.pdf");
    assert_eq!(member.mime_type, "application/pdf");
    assert_eq!(std::fs::read(&member.local_path).unwrap(), b"%PDF-1.4 manual");
}

#[tokio::test]
async fn scenario_b_rerun_with_same_bytes_creates_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 2);
    let store = sqlite_store(&config).await;
    let ingestor = ingestor(&config, Arc::clone(&store), scenario_links(), scenario_fetcher());

    let first = ingestor.ingest("TEST").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = ingestor.ingest("TEST").await.unwrap();

    assert_eq!(store.count_documents().await.unwrap(), 3);
    assert_eq!(second.unchanged(), 3);
    assert_eq!(second.changed_records().count(), 0);
    for (before, after) in first.records.iter().zip(&second.records) {
        assert_eq!(before.document.id, after.document.id);
        assert_eq!(after.document.version, 1);
        assert!(after.document.last_seen_at > before.document.last_seen_at);
        assert_eq!(after.document.first_seen_at, before.document.first_seen_at);
    }
}

#[tokio::test]
async fn scenario_c_changed_csv_gets_version_two() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 2);
    let store = sqlite_store(&config).await;
    let fetcher = scenario_fetcher();
    let ingestor = ingestor(&config, Arc::clone(&store), scenario_links(), Arc::clone(&fetcher));

    let first = ingestor.ingest("TEST").await.unwrap();
    fetcher.serve(CSV_URL, b"code,label\n1,loan\n2,exposure\n".to_vec());
    let second = ingestor.ingest("TEST").await.unwrap();

    assert_eq!(store.count_documents().await.unwrap(), 4);
    assert_eq!(second.changed(), 1);
    assert_eq!(second.unchanged(), 2);

    let v1_id = first.records[0].document.id;
    let history = store.document_history(CSV_URL).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 2);
    assert_eq!(history[0].previous_version_id, Some(v1_id));
    assert_eq!(history[1].id, v1_id);
    // Old and new bytes live side by side.
    assert_ne!(history[0].local_path, history[1].local_path);

    for url in [ZIP_URL, "https://test.example/data/pack.zip#manual.pdf"] {
        let versions = store.document_history(url).await.unwrap();
        assert_eq!(versions.len(), 1, "{} must be untouched", url);
    }
}

#[tokio::test]
async fn failed_fetch_does_not_abort_batch() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 3);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.serve("https://test.example/a.pdf", b"%PDF a".to_vec());
    fetcher.serve(
        "https://test.example/pack.zip",
        build_zip(&[("manual.pdf", "%PDF-1.4 manual"), ("notes.docx", "untracked")]),
    );
    fetcher.serve("https://test.example/c.csv", b"c".to_vec());
    let links = vec![
        link("https://test.example/a.pdf", "A"),
        link("https://test.example/b.xlsx", "B (dead link)"),
        link("https://test.example/pack.zip", "Pack"),
        link("https://test.example/c.csv", "C"),
    ];

    let report = ingestor(&config, Arc::clone(&store), links, fetcher)
        .ingest("TEST")
        .await
        .unwrap();

    assert_eq!(report.discovered, 4);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.errored, 1);
    let urls: Vec<&str> = report.records.iter().map(|r| r.document.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://test.example/a.pdf",
            "https://test.example/pack.zip",
            "https://test.example/pack.zip#manual.pdf",
            "https://test.example/c.csv",
        ]
    );
    assert_eq!(report.expanded_archives, vec![report.records[1].document.id]);
}

#[tokio::test]
async fn corrupt_archive_keeps_parent_record() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 2);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.serve(ZIP_URL, b"PK\x03\x04 truncated".to_vec());

    let report = ingestor(&config, Arc::clone(&store), vec![link(ZIP_URL, "Pack")], fetcher)
        .ingest("TEST")
        .await
        .unwrap();

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].document.mime_type, "application/zip");
    assert_eq!(report.archive_errors, 1);
    assert_eq!(report.errored, 0);
    assert!(report.expanded_archives.is_empty());
}

#[tokio::test]
async fn unknown_authority_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 1);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let err = ingestor(&config, store, scenario_links(), scenario_fetcher())
        .ingest("NOPE")
        .await
        .unwrap_err();
    assert!(matches!(err, RegwatchError::UnknownAuthority(code) if code == "NOPE"));
}

#[tokio::test]
async fn duplicate_links_never_collide_on_versions() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 4);
    let store = sqlite_store(&config).await;
    let fetcher = scenario_fetcher();
    let links = vec![
        link(CSV_URL, "Codes"),
        link(CSV_URL, "Codes (again)"),
        link(CSV_URL, "Codes (third)"),
    ];

    let report = ingestor(&config, Arc::clone(&store), links, fetcher)
        .ingest("TEST")
        .await
        .unwrap();

    assert_eq!(report.created(), 1);
    assert_eq!(report.unchanged(), 2);
    assert_eq!(report.errored, 0);
    assert_eq!(store.document_history(CSV_URL).await.unwrap().len(), 1);
}

#[tokio::test]
async fn version_conflict_is_retried() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 1);
    let store = Arc::new(ConflictingStore::new(1));
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.serve(CSV_URL, b"code,label\n1,loan\n".to_vec());

    let report = ingestor(&config, store.clone(), vec![link(CSV_URL, "Codes")], fetcher)
        .ingest("TEST")
        .await
        .unwrap();

    assert_eq!(store.attempts(), 2);
    assert_eq!(report.errored, 0);
    assert_eq!(report.created(), 1);
    assert_eq!(store.document_history(CSV_URL).await.unwrap().len(), 1);
}

#[tokio::test]
async fn persistent_version_conflict_fails_the_candidate() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 1);
    let store = Arc::new(ConflictingStore::new(usize::MAX));
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.serve(CSV_URL, b"code,label\n1,loan\n".to_vec());

    let report = ingestor(&config, store.clone(), vec![link(CSV_URL, "Codes")], fetcher)
        .ingest("TEST")
        .await
        .unwrap();

    assert_eq!(store.attempts(), 3);
    assert_eq!(report.fetched, 1);
    assert_eq!(report.errored, 1);
    assert!(report.records.is_empty());
    assert_eq!(store.count_documents().await.unwrap(), 0);
}

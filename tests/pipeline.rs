use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regwatch::config::{AuthorityConfig, Config, PipelineConfig};
use regwatch::discovery::LinkDiscovery;
use regwatch::error::RegwatchError;
use regwatch::extract::{FileTextExtractor, TextExtractor};
use regwatch::fetch::{FetchedResource, Fetcher};
use regwatch::ingest::Ingestor;
use regwatch::keywords::bootstrap_default_keywords;
use regwatch::models::{now_millis, Document, DocumentMetadata, LinkCandidate, NotificationStatus};
use regwatch::notify::{LogNotifier, Notification, Notifier};
use regwatch::pipeline::{PipelineInput, Stage, StagePipeline};
use regwatch::run::Engine;
use regwatch::store::{InMemoryStore, Store};
use regwatch::translate::{EchoTranslator, Translator};
use tempfile::TempDir;

/// Returns canned text per filename; `Err` for names mapped to `None`.
struct CannedExtractor {
    texts: HashMap<String, Option<String>>,
}

impl TextExtractor for CannedExtractor {
    fn extract(&self, path: &Path) -> Result<String, RegwatchError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match self.texts.get(&name) {
            Some(Some(text)) => Ok(text.clone()),
            Some(None) => Err(RegwatchError::Extraction {
                name,
                message: "corrupt".into(),
            }),
            None => Err(RegwatchError::UnsupportedFormat(name)),
        }
    }
}

struct FailingTranslator;

#[async_trait]
impl Translator for FailingTranslator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn translate(&self, _: &str, _: &str, _: &str) -> Result<String, RegwatchError> {
        Err(RegwatchError::Translation("OpenAI API error 401".into()))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    fn recipients(&self) -> Vec<String> {
        vec!["risk@example.com".into()]
    }

    async fn send(&self, notification: &Notification) -> Result<(), RegwatchError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

fn extractor(entries: &[(&str, Option<&str>)]) -> Arc<CannedExtractor> {
    Arc::new(CannedExtractor {
        texts: entries
            .iter()
            .map(|(name, text)| (name.to_string(), text.map(str::to_string)))
            .collect(),
    })
}

fn settings(min_keywords: usize) -> PipelineConfig {
    PipelineConfig {
        min_keywords,
        ..PipelineConfig::default()
    }
}

async fn stored_document(store: &dyn Store, filename: &str) -> Document {
    let meta = DocumentMetadata {
        source: "TEST_Source".into(),
        title: format!("Doc {}", filename),
        url: format!("https://test.example/{}", filename),
        filename: filename.into(),
        local_path: format!("/nonexistent/{}", filename),
        filesize_bytes: 10,
        mime_type: "application/pdf".into(),
        checksum: regwatch::fingerprint::compute(filename.as_bytes()),
        downloaded_at: now_millis(),
    };
    store.upsert_document(&meta).await.unwrap().document
}

async fn seeded_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    bootstrap_default_keywords(store.as_ref()).await.unwrap();
    store
}

#[tokio::test]
async fn empty_extraction_ends_skipped() {
    let store = seeded_store().await;
    let doc = stored_document(store.as_ref(), "blank.pdf").await;
    let pipeline = StagePipeline::new(
        store.clone(),
        extractor(&[("blank.pdf", Some("   \n  "))]),
        Arc::new(EchoTranslator),
        Some(Arc::new(LogNotifier)),
        settings(1),
    );

    let outcome = pipeline.process_document(&PipelineInput::new(doc.clone())).await;

    assert_eq!(outcome.stages, vec![Stage::Discovered, Stage::Downloaded, Stage::Skipped]);
    assert!(outcome.errors.is_empty());
    assert!(store.document_texts(doc.id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn archives_record_expansion_only_when_it_happened() {
    let store = seeded_store().await;
    let doc = stored_document(store.as_ref(), "pack.zip").await;
    let pipeline = StagePipeline::new(
        store.clone(),
        Arc::new(FileTextExtractor),
        Arc::new(EchoTranslator),
        None,
        settings(1),
    );

    let outcome = pipeline.process_document(&PipelineInput::expanded(doc.clone())).await;
    assert!(outcome.reached(Stage::Expanded));
    assert_eq!(outcome.terminal(), Stage::Skipped);
    assert!(outcome.errors.is_empty());

    let outcome = pipeline.process_document(&PipelineInput::new(doc)).await;
    assert!(!outcome.reached(Stage::Expanded));
    assert_eq!(outcome.terminal(), Stage::Skipped);
}

#[tokio::test]
async fn translation_failure_keeps_original_text() {
    let store = seeded_store().await;
    let doc = stored_document(store.as_ref(), "manual.pdf").await;
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = StagePipeline::new(
        store.clone(),
        extractor(&[("manual.pdf", Some("Déclaration AnaCredit pour chaque counterparty."))]),
        Arc::new(FailingTranslator),
        Some(notifier.clone()),
        settings(1),
    );

    let outcome = pipeline.process_document(&PipelineInput::new(doc.clone())).await;

    assert!(outcome.reached(Stage::TextExtracted));
    assert!(!outcome.reached(Stage::Translated));
    assert!(outcome.reached(Stage::KeywordScanned));
    assert_eq!(outcome.terminal(), Stage::Notified);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].starts_with("translate:"));

    let originals = store.document_texts(doc.id, Some(true)).await.unwrap();
    assert_eq!(originals.len(), 1);
    assert_eq!(originals[0].language, "FR");
    assert!(store.document_texts(doc.id, Some(false)).await.unwrap().is_empty());

    // AnaCredit + counterparty, both from the original text.
    assert_eq!(store.keyword_matches(doc.id).await.unwrap().len(), 2);
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn notification_respects_minimum_matches() {
    let store = seeded_store().await;
    let text = "The Basel framework covers each loan.";
    let strict_doc = stored_document(store.as_ref(), "strict.pdf").await;
    let lenient_doc = stored_document(store.as_ref(), "lenient.pdf").await;
    let notifier = Arc::new(RecordingNotifier::default());
    let canned = extractor(&[("strict.pdf", Some(text)), ("lenient.pdf", Some(text))]);

    // Echo translation doubles the hits: 2 keywords x (original + translation) = 4.
    let strict = StagePipeline::new(
        store.clone(),
        canned.clone(),
        Arc::new(EchoTranslator),
        Some(notifier.clone()),
        settings(5),
    );
    let outcome = strict
        .process_document(&PipelineInput::new(strict_doc.clone()))
        .await;
    assert_eq!(outcome.keyword_matches, 4);
    assert_eq!(outcome.terminal(), Stage::Skipped);
    assert!(store.notifications(strict_doc.id).await.unwrap().is_empty());

    let lenient = StagePipeline::new(
        store.clone(),
        canned,
        Arc::new(EchoTranslator),
        Some(notifier.clone()),
        settings(4),
    );
    let outcome = lenient
        .process_document(&PipelineInput::new(lenient_doc.clone()))
        .await;
    assert_eq!(outcome.terminal(), Stage::Notified);
    assert_eq!(outcome.notification, Some(NotificationStatus::Sent));

    let logs = store.notifications(lenient_doc.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, NotificationStatus::Sent);
    assert_eq!(logs[0].recipients, "risk@example.com");

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("- Basel (occurrences: 1)"));
}

#[tokio::test]
async fn batch_isolates_failing_documents() {
    let store = seeded_store().await;
    let broken = stored_document(store.as_ref(), "broken.pdf").await;
    let good = stored_document(store.as_ref(), "good.pdf").await;
    let pipeline = StagePipeline::new(
        store.clone(),
        extractor(&[("broken.pdf", None), ("good.pdf", Some("large exposure limits"))]),
        Arc::new(EchoTranslator),
        Some(Arc::new(LogNotifier)),
        settings(1),
    );

    let outcomes = pipeline
        .run_batch(vec![
            PipelineInput::new(broken.clone()),
            PipelineInput::new(good.clone()),
        ])
        .await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].document_id, broken.id);
    assert_eq!(outcomes[0].terminal(), Stage::Skipped);
    assert!(outcomes[0].errors[0].starts_with("extract:"));
    assert_eq!(outcomes[1].document_id, good.id);
    assert_eq!(outcomes[1].terminal(), Stage::Notified);
    assert_eq!(outcomes[1].texts_saved, 2);
}

struct StaticDiscovery(Vec<LinkCandidate>);

#[async_trait]
impl LinkDiscovery for StaticDiscovery {
    async fn discover(&self, _: &AuthorityConfig) -> Result<Vec<LinkCandidate>, RegwatchError> {
        Ok(self.0.clone())
    }
}

/// Serves `(bytes, declared content type)` per URL; anything else is a 404.
struct StaticFetcher(HashMap<String, (Vec<u8>, Option<&'static str>)>);

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, RegwatchError> {
        self.0
            .get(url)
            .map(|(bytes, content_type)| FetchedResource {
                bytes: bytes.clone(),
                content_type: content_type.map(str::to_string),
            })
            .ok_or_else(|| RegwatchError::Network {
                url: url.into(),
                message: "HTTP 404".into(),
            })
    }
}

fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        for (name, content) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn link(url: &str, title: &str) -> LinkCandidate {
    LinkCandidate {
        url: url.into(),
        title: title.into(),
    }
}

/// Engine over static collaborators, with translation turned off by using
/// the same source and target language.
fn test_engine(
    tmp: &TempDir,
    store: Arc<InMemoryStore>,
    links: Vec<LinkCandidate>,
    fetcher: StaticFetcher,
) -> Engine {
    let mut config = Config::minimal();
    config.storage.root = tmp.path().join("raw");
    config.pipeline.target_language = "FR".into();
    config.authorities.insert(
        "TEST".into(),
        AuthorityConfig {
            name: "Test".into(),
            source_label: "TEST_Source".into(),
            base_url: "https://test.example".into(),
            listing_url: "https://test.example/".into(),
            interval_hours: 1,
        },
    );

    let ingestor = Ingestor::new(
        &config,
        store.clone(),
        Arc::new(StaticDiscovery(links)),
        Arc::new(fetcher),
    );
    let pipeline = StagePipeline::new(
        store,
        Arc::new(FileTextExtractor),
        Arc::new(EchoTranslator),
        Some(Arc::new(LogNotifier)),
        config.pipeline.clone(),
    );
    Engine::new(ingestor, pipeline)
}

#[tokio::test]
async fn engine_runs_only_changed_documents() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store().await;
    let url = "https://test.example/loans.csv";
    let fetcher = StaticFetcher(HashMap::from([(
        url.to_string(),
        (
            b"id,type\n1,non-performing loan\n".to_vec(),
            Some("text/csv; charset=utf-8"),
        ),
    )]));
    let engine = test_engine(&tmp, store.clone(), vec![link(url, "Loans")], fetcher);

    let first = engine.run("TEST").await.unwrap();
    assert_eq!(first.ingest.records[0].document.mime_type, "text/csv; charset=utf-8");
    assert_eq!(first.outcomes.len(), 1);
    // Same source and target language: no translation stage.
    assert!(!first.outcomes[0].reached(Stage::Translated));
    assert_eq!(first.outcomes[0].terminal(), Stage::Notified);
    assert_eq!(first.notified(), 1);

    let second = engine.run("TEST").await.unwrap();
    assert_eq!(second.ingest.unchanged(), 1);
    assert!(second.outcomes.is_empty());
    assert_eq!(store.count_documents().await.unwrap(), 1);
}

#[tokio::test]
async fn spawned_run_marks_only_expanded_archives() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store().await;
    let pack = "https://test.example/pack.zip";
    let broken = "https://test.example/broken.zip";
    let fetcher = StaticFetcher(HashMap::from([
        (
            pack.to_string(),
            (build_zip(&[("codes.csv", "id,loan\n1,exposure\n")]), None),
        ),
        (broken.to_string(), (b"PK\x03\x04 truncated".to_vec(), None)),
    ]));
    let engine = Arc::new(test_engine(
        &tmp,
        store,
        vec![link(pack, "Pack"), link(broken, "Broken")],
        fetcher,
    ));

    // Runs on a worker task, the way the scheduler drives it.
    let report = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run("TEST").await }
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.ingest.archive_errors, 1);
    let urls: Vec<&str> = report.outcomes.iter().map(|o| o.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![pack, "https://test.example/pack.zip#codes.csv", broken]
    );

    assert!(report.outcomes[0].reached(Stage::Expanded));
    assert_eq!(report.outcomes[0].terminal(), Stage::Skipped);
    assert!(!report.outcomes[1].reached(Stage::Expanded));
    assert_eq!(report.outcomes[1].terminal(), Stage::Notified);
    assert!(!report.outcomes[2].reached(Stage::Expanded));
    assert_eq!(report.outcomes[2].terminal(), Stage::Skipped);
}

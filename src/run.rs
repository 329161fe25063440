//! End-to-end runs: ingestion followed by the stage pipeline.
//!
//! [`Engine`] bundles an [`Ingestor`] and a [`StagePipeline`] sharing one
//! store. `regwatch sync` only ingests; `regwatch run` and the scheduler also
//! push every new or changed document through the pipeline.

use std::sync::Arc;

use crate::config::Config;
use crate::discovery::HtmlLinkDiscovery;
use crate::error::RegwatchError;
use crate::extract::FileTextExtractor;
use crate::fetch::HttpFetcher;
use crate::ingest::{IngestReport, Ingestor};
use crate::models::NotificationStatus;
use crate::notify::create_notifier;
use crate::pipeline::{DocumentOutcome, PipelineInput, Stage, StagePipeline};
use crate::store::Store;
use crate::translate::create_translator;

/// Ingestion report plus the pipeline outcome of every changed document.
#[derive(Debug)]
pub struct RunReport {
    pub ingest: IngestReport,
    pub outcomes: Vec<DocumentOutcome>,
}

impl RunReport {
    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.terminal() == Stage::Skipped)
            .count()
    }

    pub fn notified(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.notification == Some(NotificationStatus::Sent))
            .count()
    }

    /// Ingestion failures plus documents with at least one failed stage.
    pub fn errored(&self) -> usize {
        self.ingest.errored
            + self.ingest.archive_errors
            + self.outcomes.iter().filter(|o| !o.errors.is_empty()).count()
    }
}

pub struct Engine {
    ingestor: Ingestor,
    pipeline: StagePipeline,
}

impl Engine {
    pub fn new(ingestor: Ingestor, pipeline: StagePipeline) -> Self {
        Self { ingestor, pipeline }
    }

    /// Production wiring: HTTP discovery and fetch, file extraction, and the
    /// configured translator and notifier.
    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> Result<Self, RegwatchError> {
        let ingestor = Ingestor::new(
            config,
            Arc::clone(&store),
            Arc::new(HtmlLinkDiscovery::new(&config.fetch)?),
            Arc::new(HttpFetcher::new(&config.fetch)?),
        );
        let pipeline = StagePipeline::new(
            store,
            Arc::new(FileTextExtractor),
            create_translator(&config.translation)?,
            create_notifier(&config.notify),
            config.pipeline.clone(),
        );
        Ok(Self::new(ingestor, pipeline))
    }

    pub async fn sync(&self, code: &str) -> Result<IngestReport, RegwatchError> {
        self.ingestor.ingest(code).await
    }

    pub async fn run(&self, code: &str) -> Result<RunReport, RegwatchError> {
        let ingest = self.ingestor.ingest(code).await?;
        let changed: Vec<PipelineInput> = ingest
            .changed_records()
            .map(|r| PipelineInput {
                document: r.document.clone(),
                expanded: ingest.was_expanded(r.document.id),
            })
            .collect();
        let outcomes = self.pipeline.run_batch(changed).await;
        Ok(RunReport { ingest, outcomes })
    }
}

pub fn print_ingest_report(label: &str, report: &IngestReport) {
    println!("{} {}", label, report.authority);
    println!("  discovered: {}", report.discovered);
    println!("  fetched: {}", report.fetched);
    println!("  new: {}", report.created());
    println!("  changed: {}", report.changed());
    println!("  unchanged: {}", report.unchanged());
    if report.archive_errors > 0 {
        println!("  unreadable archives: {}", report.archive_errors);
    }
}

pub fn print_run_report(report: &RunReport) {
    print_ingest_report("run", &report.ingest);
    println!("  skipped: {}", report.skipped());
    println!("  errored: {}", report.errored());
    println!("  notified: {}", report.notified());
    println!("ok");
}

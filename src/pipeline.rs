//! Per-document stage pipeline.
//!
//! Every changed document runs through
//!
//! ```text
//! Discovered → Downloaded → [Expanded] → TextExtracted → Translated
//!            → KeywordScanned → Notified | Skipped
//! ```
//!
//! Each stage persists its output as soon as it has it. A failing stage is
//! recorded on the document's [`DocumentOutcome`] and never rolls back what
//! earlier stages stored, nor affects other documents of the batch.

use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::RegwatchError;
use crate::extract::{extract_or_empty, TextExtractor};
use crate::keywords;
use crate::models::{Document, DocumentText, NewDocumentText, NotificationStatus};
use crate::notify::{notify_document, Notifier};
use crate::store::Store;
use crate::translate::{create_translation, Translator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovered,
    Downloaded,
    Expanded,
    TextExtracted,
    Translated,
    KeywordScanned,
    Notified,
    Skipped,
}

/// What happened to one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub document_id: i64,
    pub url: String,
    /// Stages reached, in order. The last one is terminal.
    pub stages: Vec<Stage>,
    pub texts_saved: usize,
    pub keyword_matches: usize,
    pub notification: Option<NotificationStatus>,
    /// Non-fatal stage failures.
    pub errors: Vec<String>,
}

impl DocumentOutcome {
    fn new(document: &Document) -> Self {
        Self {
            document_id: document.id,
            url: document.url.clone(),
            stages: vec![Stage::Discovered, Stage::Downloaded],
            texts_saved: 0,
            keyword_matches: 0,
            notification: None,
            errors: Vec::new(),
        }
    }

    pub fn terminal(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Discovered)
    }

    pub fn reached(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    fn fail(&mut self, stage: &str, err: &RegwatchError) {
        warn!(document_id = self.document_id, stage, error = %err, "stage failed");
        self.errors.push(format!("{}: {}", stage, err));
    }

    fn finish(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }
}

/// A new or changed document handed to the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub document: Document,
    /// Archive whose members were expanded during ingestion.
    pub expanded: bool,
}

impl PipelineInput {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            expanded: false,
        }
    }

    pub fn expanded(document: Document) -> Self {
        Self {
            document,
            expanded: true,
        }
    }
}

pub struct StagePipeline {
    store: Arc<dyn Store>,
    extractor: Arc<dyn TextExtractor>,
    translator: Arc<dyn Translator>,
    notifier: Option<Arc<dyn Notifier>>,
    settings: PipelineConfig,
}

impl StagePipeline {
    pub fn new(
        store: Arc<dyn Store>,
        extractor: Arc<dyn TextExtractor>,
        translator: Arc<dyn Translator>,
        notifier: Option<Arc<dyn Notifier>>,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            translator,
            notifier,
            settings,
        }
    }

    /// Run every document, at most `settings.concurrency` at a time.
    /// Outcomes come back in input order.
    pub async fn run_batch(&self, inputs: Vec<PipelineInput>) -> Vec<DocumentOutcome> {
        let futures: Vec<_> = inputs
            .into_iter()
            .map(|input| async move { self.process_document(&input).await }.boxed())
            .collect();
        stream::iter(futures)
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    pub async fn process_document(&self, input: &PipelineInput) -> DocumentOutcome {
        let document = &input.document;
        let mut outcome = DocumentOutcome::new(document);
        if input.expanded {
            outcome.stages.push(Stage::Expanded);
        }

        let text = match self.extract(document).await {
            Ok(text) => text,
            Err(e) => {
                outcome.fail("extract", &e);
                return outcome.finish(Stage::Skipped);
            }
        };
        if text.trim().is_empty() {
            debug!(document_id = document.id, "no extractable text");
            return outcome.finish(Stage::Skipped);
        }

        let original = match self
            .store
            .save_text(NewDocumentText {
                document_id: document.id,
                language: self.settings.original_language.clone(),
                is_original: true,
                full_text: text,
                summary: None,
            })
            .await
        {
            Ok(row) => row,
            Err(e) => {
                outcome.fail("extract", &RegwatchError::from(e));
                return outcome.finish(Stage::Skipped);
            }
        };
        outcome.texts_saved += 1;
        outcome.stages.push(Stage::TextExtracted);

        let mut texts = vec![original];
        if let Some(translated) = self.translate(&texts[0], &mut outcome).await {
            texts.push(translated);
            outcome.texts_saved += 1;
            outcome.stages.push(Stage::Translated);
        }

        for text in &texts {
            match keywords::scan_text(self.store.as_ref(), text).await {
                Ok(found) => outcome.keyword_matches += found.len(),
                Err(e) => outcome.fail("keywords", &RegwatchError::from(e)),
            }
        }
        outcome.stages.push(Stage::KeywordScanned);

        self.notify(document, outcome).await
    }

    async fn extract(&self, document: &Document) -> Result<String, RegwatchError> {
        let extractor = Arc::clone(&self.extractor);
        let path = PathBuf::from(&document.local_path);
        tokio::task::spawn_blocking(move || extract_or_empty(extractor.as_ref(), &path))
            .await
            .map_err(|e| RegwatchError::Extraction {
                name: document.filename.clone(),
                message: e.to_string(),
            })?
    }

    async fn translate(
        &self,
        original: &DocumentText,
        outcome: &mut DocumentOutcome,
    ) -> Option<DocumentText> {
        let source = &self.settings.original_language;
        let target = &self.settings.target_language;
        if source.eq_ignore_ascii_case(target) {
            return None;
        }
        match create_translation(
            self.translator.as_ref(),
            self.store.as_ref(),
            original,
            source,
            target,
        )
        .await
        {
            Ok(row) => Some(row),
            Err(e) => {
                outcome.fail("translate", &e);
                None
            }
        }
    }

    async fn notify(&self, document: &Document, mut outcome: DocumentOutcome) -> DocumentOutcome {
        let matches = match self.store.keyword_matches(document.id).await {
            Ok(matches) => matches,
            Err(e) => {
                outcome.fail("notify", &RegwatchError::from(e));
                return outcome.finish(Stage::Skipped);
            }
        };

        if matches.len() < self.settings.min_keywords {
            debug!(
                document_id = document.id,
                matches = matches.len(),
                min = self.settings.min_keywords,
                "not enough keyword matches, no notification"
            );
            return outcome.finish(Stage::Skipped);
        }
        let Some(notifier) = &self.notifier else {
            debug!(document_id = document.id, "notifications disabled");
            return outcome.finish(Stage::Skipped);
        };

        match notify_document(notifier.as_ref(), self.store.as_ref(), document, &matches).await {
            Ok(log) => {
                info!(document_id = document.id, status = log.status.as_str(), "notification recorded");
                outcome.notification = Some(log.status);
                outcome.finish(Stage::Notified)
            }
            Err(e) => {
                outcome.fail("notify", &e);
                outcome.finish(Stage::Skipped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_is_last_stage() {
        let mut outcome = DocumentOutcome {
            document_id: 1,
            url: "https://x/a.pdf".into(),
            stages: vec![Stage::Discovered, Stage::Downloaded],
            texts_saved: 0,
            keyword_matches: 0,
            notification: None,
            errors: Vec::new(),
        };
        assert_eq!(outcome.terminal(), Stage::Downloaded);
        outcome = outcome.finish(Stage::Skipped);
        assert_eq!(outcome.terminal(), Stage::Skipped);
        assert!(outcome.reached(Stage::Downloaded));
        assert!(!outcome.reached(Stage::TextExtracted));
    }
}

//! Upload-to-analysis controller.
//!
//! Runs one document through validation, extraction, analysis and
//! normalization, then records the result. The first failure stops the
//! run and is returned unchanged; no partial result ever escapes. History
//! failures are the exception: they are logged and reported as a warning
//! on an otherwise successful outcome.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::analysis::{self, AnalysisInvoker, AnalysisService};
use crate::config::{Config, ExtractionConfig};
use crate::error::PipelineError;
use crate::extract::{enforce_length, extract_with_timeout};
use crate::history::{self, HistoryStore};
use crate::models::{AnalysisResult, FileMetadata, UploadedDocument};
use crate::normalize::normalize;
use crate::upload::UploadGate;

/// Shown to the caller when the analysis succeeded but could not be saved.
pub const HISTORY_WARNING: &str = "Analysis completed but could not be saved to history.";

/// Everything a successful run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub file: FileMetadata,
    /// Text as sent for analysis, after truncation.
    pub extracted_text: String,
    pub analysis: AnalysisResult,
    pub history_warning: Option<String>,
}

#[derive(Clone)]
pub struct Pipeline {
    gate: UploadGate,
    extraction: ExtractionConfig,
    invoker: AnalysisInvoker,
    history: Arc<dyn HistoryStore>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        service: Arc<dyn AnalysisService>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            gate: UploadGate::new(&config.upload),
            extraction: config.extraction.clone(),
            invoker: AnalysisInvoker::new(
                service,
                config.analysis.timeout(),
                config.extraction.max_text_chars,
            ),
            history,
        }
    }

    /// Builds the configured service and history store.
    ///
    /// Fails when the API credential is missing or the store cannot be opened.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let service = analysis::create_service(&config.analysis)?;
        let history = history::create_store(&config.history).await?;
        Ok(Self::new(config, service, history))
    }

    pub fn gate(&self) -> &UploadGate {
        &self.gate
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Analyzes and records one document.
    pub async fn run(&self, doc: UploadedDocument) -> Result<PipelineOutcome, PipelineError> {
        let mut outcome = self.analyze(doc).await?;
        outcome.history_warning = self.record(&outcome).await;
        Ok(outcome)
    }

    /// Analyzes one document without touching history.
    pub async fn analyze(&self, doc: UploadedDocument) -> Result<PipelineOutcome, PipelineError> {
        self.gate.validate(&doc)?;
        let file = doc.metadata();

        let extraction = extract_with_timeout(doc.raw_bytes, self.extraction.timeout())
            .await
            .inspect_err(|e| {
                warn!(file = %file.original_name, size = file.size_bytes, error = %e, "Extraction failed");
            })?;

        let bounded = enforce_length(
            extraction.text,
            self.extraction.min_text_chars,
            self.extraction.max_text_chars,
        )?;
        if let Some(from) = bounded.truncated_from {
            warn!(
                from,
                to = self.extraction.max_text_chars,
                file = %file.original_name,
                "Extracted text truncated"
            );
        }

        let raw = self.invoker.invoke(&bounded.text).await?;
        let analysis = normalize(&raw);

        info!(
            file = %file.original_name,
            pages = extraction.page_count,
            skipped = extraction.skipped_pages.len(),
            risky = analysis.risky_clauses.len(),
            fallback = analysis.is_fallback(),
            "Document analyzed"
        );

        Ok(PipelineOutcome {
            file,
            extracted_text: bounded.text,
            analysis,
            history_warning: None,
        })
    }

    /// Appends to history, returning a warning instead of an error.
    pub async fn record(&self, outcome: &PipelineOutcome) -> Option<String> {
        match self
            .history
            .append(outcome.file.clone(), outcome.analysis.clone())
            .await
        {
            Ok(entry) => {
                info!(id = %entry.id, "Saved analysis to history");
                None
            }
            Err(e) => {
                error!(error = %e, file = %outcome.file.original_name, "Failed to save history entry");
                Some(HISTORY_WARNING.to_string())
            }
        }
    }
}

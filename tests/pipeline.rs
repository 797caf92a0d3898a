//! End-to-end runs of the pipeline with a scripted analysis backend.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use verilex::error::PipelineError;
use verilex::extract::{ExtractError, MIME_PDF};
use verilex::history::{HistoryStore, MemoryHistory};
use verilex::models::{AnalysisResult, FileMetadata, HistoryEntry, RiskLevel, UploadedDocument};
use verilex::pipeline::{Pipeline, HISTORY_WARNING};
use verilex::upload::UploadError;

fn pipeline_with(service: Arc<ScriptedService>) -> (Pipeline, Arc<MemoryHistory>) {
    let history = Arc::new(MemoryHistory::new(5));
    let pipeline = Pipeline::new(&test_config(), service, history.clone());
    (pipeline, history)
}

fn pdf_upload(name: &str, bytes: Vec<u8>) -> UploadedDocument {
    UploadedDocument::new(name, MIME_PDF, bytes)
}

#[tokio::test]
async fn test_valid_contract_is_analyzed_and_recorded() {
    let service = ScriptedService::replying(well_formed_reply());
    let (pipeline, history) = pipeline_with(service.clone());

    let outcome = pipeline
        .run(pdf_upload("services.pdf", contract_pdf()))
        .await
        .unwrap();

    assert_eq!(outcome.file.original_name, "services.pdf");
    assert!(outcome.extracted_text.contains("Acme Corp"));
    assert!(outcome.history_warning.is_none());
    assert_eq!(outcome.analysis.risky_clauses[0].risk_level, RiskLevel::High);
    assert!(!outcome.analysis.is_fallback());

    assert_eq!(service.calls(), 1);
    assert!(service.last_message().unwrap().contains("Acme Corp"));

    let entries = history.list_all().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].analysis, outcome.analysis);
}

#[tokio::test]
async fn test_empty_file_rejected_before_extraction() {
    let service = ScriptedService::replying(well_formed_reply());
    let (pipeline, history) = pipeline_with(service.clone());

    let err = pipeline
        .run(pdf_upload("empty.pdf", Vec::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Validation(UploadError::Empty)));
    assert_eq!(err.status().as_u16(), 422);
    assert!(err.client_message().contains("empty"));
    assert_eq!(service.calls(), 0);
    assert!(history.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_pdf_is_extraction_error() {
    let service = ScriptedService::replying(well_formed_reply());
    let (pipeline, _) = pipeline_with(service.clone());

    let err = pipeline
        .run(pdf_upload("x.pdf", b"%PDF-1.7\nthis is not really a pdf body".to_vec()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Extraction(ExtractError::Corrupted)
    ));
    assert_eq!(err.status().as_u16(), 422);
    assert!(err.client_message().contains("corrupted"));
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn test_password_protected_pdf_is_rejected() {
    let service = ScriptedService::replying(well_formed_reply());
    let (pipeline, history) = pipeline_with(service.clone());

    let err = pipeline
        .run(pdf_upload("locked.pdf", encrypted_pdf()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Extraction(ExtractError::Encrypted)
    ));
    assert_eq!(err.status().as_u16(), 422);
    assert!(err.client_message().contains("password-protected"));
    assert_eq!(service.calls(), 0);
    assert!(history.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_non_pdf_bytes_with_pdf_name_rejected() {
    let (pipeline, _) = pipeline_with(ScriptedService::replying(well_formed_reply()));
    let err = pipeline
        .run(pdf_upload("x.pdf", b"PK\x03\x04 zip archive".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Extraction(ExtractError::NotPdf)));
}

#[tokio::test]
async fn test_scanned_document_has_no_readable_text() {
    let service = ScriptedService::replying(well_formed_reply());
    let (pipeline, _) = pipeline_with(service.clone());

    let err = pipeline
        .run(pdf_upload("scan.pdf", make_pdf(&[None, None])))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoReadableText));
    assert_eq!(err.status().as_u16(), 422);
    assert!(err.client_message().contains("No readable text"));
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn test_fenced_reply_is_recovered() {
    let fenced = format!("```json\n{}\n```", well_formed_reply());
    let (pipeline, _) = pipeline_with(ScriptedService::replying(fenced));

    let outcome = pipeline
        .run(pdf_upload("fenced.pdf", contract_pdf()))
        .await
        .unwrap();

    assert!(!outcome.analysis.is_fallback());
    assert_eq!(
        outcome.analysis.summary,
        "A services agreement between Acme Corp and Client Ltd."
    );
}

#[tokio::test]
async fn test_truncated_reply_still_satisfies_schema() {
    let reply = well_formed_reply();
    let cut = &reply[..reply.len() - 40];
    let (pipeline, history) = pipeline_with(ScriptedService::replying(cut));

    let outcome = pipeline
        .run(pdf_upload("cut.pdf", contract_pdf()))
        .await
        .unwrap();

    assert!(outcome.analysis.is_fallback());
    assert_eq!(outcome.analysis, AnalysisResult::fallback());
    // fallback results are still recorded
    assert_eq!(history.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stalled_service_times_out_near_limit() {
    let (pipeline, history) = pipeline_with(ScriptedService::stalling(Duration::from_secs(30)));

    let started = Instant::now();
    let err = pipeline
        .run(pdf_upload("slow.pdf", contract_pdf()))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, PipelineError::AnalysisTimeout { secs: 1 }));
    assert_eq!(err.status().as_u16(), 504);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
    assert!(history.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upstream_failures_are_classified() {
    let cases = [
        (Some(429), "Too many requests", 429),
        (Some(403), "API key not valid", 402),
        (None, "Your credit balance is too low", 402),
        (Some(500), "Internal error", 502),
    ];
    for (status, message, expected) in cases {
        let (pipeline, _) = pipeline_with(ScriptedService::failing(status, message));
        let err = pipeline
            .run(pdf_upload("c.pdf", contract_pdf()))
            .await
            .unwrap_err();
        assert_eq!(err.status().as_u16(), expected, "{:?} {}", status, message);
    }
}

#[tokio::test]
async fn test_long_text_is_truncated_to_exact_maximum() {
    let service = ScriptedService::replying(well_formed_reply());
    let history = Arc::new(MemoryHistory::new(5));
    let mut config = test_config();
    config.extraction.max_text_chars = 40;
    let pipeline = Pipeline::new(&config, service.clone(), history);

    let outcome = pipeline
        .run(pdf_upload("long.pdf", contract_pdf()))
        .await
        .unwrap();

    assert_eq!(outcome.extracted_text.chars().count(), 40);
    assert!(service
        .last_message()
        .unwrap()
        .contains(&outcome.extracted_text));
}

struct BrokenStore;

#[async_trait::async_trait]
impl HistoryStore for BrokenStore {
    async fn append(
        &self,
        _file: FileMetadata,
        _analysis: AnalysisResult,
    ) -> anyhow::Result<HistoryEntry> {
        anyhow::bail!("disk full")
    }

    async fn list_all(&self) -> anyhow::Result<Vec<HistoryEntry>> {
        Ok(Vec::new())
    }

    fn capacity(&self) -> usize {
        0
    }
}

#[tokio::test]
async fn test_history_failure_becomes_warning() {
    let pipeline = Pipeline::new(
        &test_config(),
        ScriptedService::replying(well_formed_reply()),
        Arc::new(BrokenStore),
    );

    let outcome = pipeline
        .run(pdf_upload("ok.pdf", contract_pdf()))
        .await
        .unwrap();

    assert!(!outcome.analysis.is_fallback());
    assert_eq!(outcome.history_warning.as_deref(), Some(HISTORY_WARNING));
}

#[tokio::test]
async fn test_history_stays_newest_first_and_bounded() {
    let (pipeline, history) = pipeline_with(ScriptedService::replying(well_formed_reply()));
    for i in 0..8 {
        pipeline
            .run(pdf_upload(&format!("doc{}.pdf", i), contract_pdf()))
            .await
            .unwrap();
    }
    let entries = history.list_all().await.unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0].file.original_name, "doc7.pdf");
    assert_eq!(entries[4].file.original_name, "doc3.pdf");
    assert!(entries.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
}

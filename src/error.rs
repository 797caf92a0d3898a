//! Pipeline error taxonomy.
//!
//! Every component classifies its failures where they are detected; the
//! controller carries the first one to the HTTP layer unchanged. Each
//! variant knows its status code and a message that is safe to show a user.

use axum::http::StatusCode;
use thiserror::Error;

use crate::extract::ExtractError;
use crate::upload::UploadError;

/// Generic notice returned in place of any internal failure detail.
pub const INTERNAL_NOTICE: &str = "An internal server error occurred. Please try again later.";

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad file type, size or count.
    #[error(transparent)]
    Validation(#[from] UploadError),

    /// Corrupt, encrypted or otherwise unreadable document.
    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error("PDF parsing timed out after {secs}s. Please try again.")]
    ExtractionTimeout { secs: u64 },

    #[error(
        "No readable text found in this PDF. If it is a scanned document, please upload an OCR-processed version."
    )]
    NoReadableText,

    #[error("AI analysis timed out after {secs}s. Please try again.")]
    AnalysisTimeout { secs: u64 },

    #[error("AI service is rate-limited. Please wait a moment and try again.")]
    UpstreamRateLimited,

    #[error("AI service authentication failed. Check your API key and account credits.")]
    UpstreamAuthFailure,

    #[error("AI analysis failed due to a service error. Please try again.")]
    UpstreamServiceError,

    /// Catch-all. The detail is for logs only.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::Validation(e) => e.status(),
            PipelineError::Extraction(_) | PipelineError::NoReadableText => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PipelineError::ExtractionTimeout { .. } | PipelineError::AnalysisTimeout { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }
            PipelineError::UpstreamRateLimited => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::UpstreamAuthFailure => StatusCode::PAYMENT_REQUIRED,
            PipelineError::UpstreamServiceError => StatusCode::BAD_GATEWAY,
            PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for a response body.
    pub fn client_message(&self) -> String {
        match self {
            PipelineError::Internal(_) => INTERNAL_NOTICE.to_string(),
            other => other.to_string(),
        }
    }

    /// Whether resubmitting the same file may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::ExtractionTimeout { .. }
                | PipelineError::AnalysisTimeout { .. }
                | PipelineError::UpstreamRateLimited
                | PipelineError::UpstreamServiceError
        )
    }
}

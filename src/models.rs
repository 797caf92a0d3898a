//! Core data models used throughout VeriLex.
//!
//! These types represent the uploaded document, the structured analysis
//! produced for it, and the history records that outlive a request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file received by the upload gate.
///
/// Owned by a single pipeline invocation; the raw bytes are dropped once
/// text extraction has finished and are never persisted.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub raw_bytes: Vec<u8>,
    pub declared_mime_type: String,
    pub declared_extension: String,
    pub original_name: String,
    pub size_bytes: u64,
}

impl UploadedDocument {
    /// Builds a document from an in-memory buffer, deriving the extension
    /// from the file name.
    pub fn new(
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        raw_bytes: Vec<u8>,
    ) -> Self {
        let original_name = original_name.into();
        let declared_extension = extension_of(&original_name);
        let size_bytes = raw_bytes.len() as u64;
        Self {
            raw_bytes,
            declared_mime_type: mime_type.into(),
            declared_extension,
            original_name,
            size_bytes,
        }
    }

    /// Redacted projection retained in history.
    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            original_name: self.original_name.clone(),
            size_bytes: self.size_bytes,
            mime_type: self.declared_mime_type.clone(),
        }
    }
}

/// Lower-cased extension including the leading dot (`".pdf"`), or an empty
/// string when the name has none.
pub fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!(".{}", ext.to_ascii_lowercase()),
        _ => String::new(),
    }
}

/// File metadata kept alongside an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub original_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

/// Severity assigned to a flagged clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    /// Parses an already trimmed, upper-cased level.
    pub fn from_normalized(s: &str) -> Option<Self> {
        match s {
            "HIGH" => Some(RiskLevel::High),
            "MEDIUM" => Some(RiskLevel::Medium),
            "LOW" => Some(RiskLevel::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::High => "HIGH",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::Low => "LOW",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contractual provision flagged by the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskyClause {
    pub clause: String,
    pub risk_level: RiskLevel,
    pub reason: String,
}

/// The fixed-schema analysis result.
///
/// All five keys are always present when serialized; the arrays may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub key_obligations: Vec<String>,
    pub risky_clauses: Vec<RiskyClause>,
    pub missing_clauses: Vec<String>,
    pub suggestions: Vec<String>,
}

impl AnalysisResult {
    /// The safe fallback substituted whenever a trustworthy structured
    /// answer cannot be produced.
    pub fn fallback() -> Self {
        Self {
            summary: "Analysis could not be completed. Please retry or consult a qualified legal professional."
                .to_string(),
            key_obligations: Vec::new(),
            risky_clauses: Vec::new(),
            missing_clauses: Vec::new(),
            suggestions: vec![
                "This document could not be automatically analyzed. Please have a qualified attorney review it."
                    .to_string(),
            ],
        }
    }

    pub fn is_fallback(&self) -> bool {
        *self == Self::fallback()
    }
}

/// One record in the analysis history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub file: FileMetadata,
    pub analysis: AnalysisResult,
}

//! Response normalization.
//!
//! Recovers an [`AnalysisResult`] from whatever text the analysis service
//! returned. [`normalize`] never fails: any response that cannot be turned
//! into a trustworthy result becomes [`AnalysisResult::fallback`].
//!
//! # Recovery Stages
//!
//! Tried in order, first parse that yields a JSON object or array wins:
//!
//! 1. the whole response
//! 2. the inside of the first ```` ``` ```` fence (optional `json` tag)
//! 3. the first `{` through the last `}`
//! 4. the start of the response through the last `}` (output cut off by a length cap)
//!
//! # Coercion
//!
//! `summary` must be present and string-coercible. Array fields that are
//! missing or not arrays become empty. Plain string arrays drop nulls,
//! non-coercible values and entries that are blank after trimming. Risky
//! clauses drop non-object entries; every remaining entry must carry a
//! non-blank `clause` and `reason` and a `risk_level` that is exactly
//! `HIGH`, `MEDIUM` or `LOW` after trimming and upper-casing. A single bad
//! risk entry rejects the whole response.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::extract::truncate_chars;
use crate::models::{AnalysisResult, RiskLevel, RiskyClause};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("static regex"));

const STRING_ARRAY_FIELDS: [&str; 3] = ["key_obligations", "missing_clauses", "suggestions"];

/// Which recovery stage produced the parsed structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    Direct,
    Fenced,
    Braced,
    TrimmedToLastBrace,
}

/// Why a parsed structure does not satisfy the schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("root value is not a JSON object")]
    RootNotObject,
    #[error("summary is missing or not string-coercible")]
    MissingSummary,
    #[error("risky_clauses[{index}].{field} is missing or blank")]
    MissingClauseField { index: usize, field: &'static str },
    #[error("risky_clauses[{index}].risk_level {value:?} is not HIGH, MEDIUM, or LOW")]
    InvalidRiskLevel { index: usize, value: String },
}

/// Why normalization fell back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeFailure {
    #[error("no recovery stage produced parseable JSON")]
    Unparseable,
    #[error("schema validation failed: {0}")]
    Schema(#[from] SchemaViolation),
}

/// Normalizes raw service output, substituting the fallback on any failure.
pub fn normalize(raw: &str) -> AnalysisResult {
    match try_normalize(raw) {
        Ok((result, stage)) => {
            debug!(?stage, "Analysis response recovered");
            result
        }
        Err(failure) => {
            error!(
                reason = %failure,
                raw = truncate_chars(raw, 500),
                "Analysis response rejected; using fallback"
            );
            AnalysisResult::fallback()
        }
    }
}

/// Tagged variant of [`normalize`] that reports the stage or the failure.
pub fn try_normalize(raw: &str) -> Result<(AnalysisResult, RecoveryStage), NormalizeFailure> {
    let (value, stage) = extract_structure(raw).ok_or(NormalizeFailure::Unparseable)?;
    let result = validate(&value)?;
    Ok((result, stage))
}

/// Runs the four recovery stages over `raw`.
pub fn extract_structure(raw: &str) -> Option<(Value, RecoveryStage)> {
    if raw.trim().is_empty() {
        return None;
    }

    if let Some(v) = parse_structure(raw) {
        return Some((v, RecoveryStage::Direct));
    }

    if let Some(inner) = FENCE_RE.captures(raw).and_then(|c| c.get(1)) {
        if let Some(v) = parse_structure(inner.as_str().trim()) {
            return Some((v, RecoveryStage::Fenced));
        }
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Some(v) = parse_structure(&raw[start..=end]) {
                return Some((v, RecoveryStage::Braced));
            }
        }
    }

    if let Some(end) = raw.rfind('}') {
        if end > 0 {
            if let Some(v) = parse_structure(&raw[..=end]) {
                return Some((v, RecoveryStage::TrimmedToLastBrace));
            }
        }
    }

    None
}

fn parse_structure(s: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(s) {
        Ok(v @ (Value::Object(_) | Value::Array(_))) => Some(v),
        _ => None,
    }
}

/// Validates and coerces a parsed structure into the fixed schema.
pub fn validate(value: &Value) -> Result<AnalysisResult, SchemaViolation> {
    let obj = value.as_object().ok_or(SchemaViolation::RootNotObject)?;

    let summary = obj
        .get("summary")
        .and_then(coerce_string)
        .ok_or(SchemaViolation::MissingSummary)?;

    let [key_obligations, missing_clauses, suggestions] =
        STRING_ARRAY_FIELDS.map(|field| string_array(obj, field));

    let mut risky_clauses = Vec::new();
    for (index, item) in sequence(obj, "risky_clauses").iter().enumerate() {
        let Some(entry) = item.as_object() else {
            continue;
        };
        risky_clauses.push(risky_clause(index, entry)?);
    }

    Ok(AnalysisResult {
        summary,
        key_obligations,
        risky_clauses,
        missing_clauses,
        suggestions,
    })
}

fn risky_clause(index: usize, entry: &Map<String, Value>) -> Result<RiskyClause, SchemaViolation> {
    let clause = required_text(entry, "clause")
        .ok_or(SchemaViolation::MissingClauseField { index, field: "clause" })?;

    let raw_level = entry
        .get("risk_level")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let normalized = raw_level.trim().to_uppercase();
    let risk_level =
        RiskLevel::from_normalized(&normalized).ok_or_else(|| SchemaViolation::InvalidRiskLevel {
            index,
            value: raw_level.to_string(),
        })?;

    let reason = required_text(entry, "reason")
        .ok_or(SchemaViolation::MissingClauseField { index, field: "reason" })?;

    Ok(RiskyClause {
        clause,
        risk_level,
        reason,
    })
}

fn required_text(entry: &Map<String, Value>, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(coerce_string)
        .filter(|s| !s.is_empty())
}

fn sequence<'a>(obj: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    obj.get(key)
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn string_array(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    sequence(obj, key)
        .iter()
        .filter_map(coerce_string)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Trimmed string form of a scalar. Null, objects and arrays are not coercible.
fn coerce_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

//! External analysis invocation.
//!
//! Defines the [`AnalysisService`] trait and two HTTP implementations:
//! - **[`GeminiService`]**: Google Generative Language `generateContent`.
//! - **[`OpenAiService`]**: any OpenAI-compatible `/v1/chat/completions` endpoint.
//!
//! [`AnalysisInvoker`] wraps a service with the fixed instruction contract,
//! a hard timeout, and classification of upstream failures into the
//! pipeline taxonomy.
//!
//! # Failure Classification
//!
//! | Upstream signal | Result |
//! |-----------------|--------|
//! | timeout elapsed | [`PipelineError::AnalysisTimeout`] (504) |
//! | HTTP 429, `rate_limit`, `RESOURCE_EXHAUSTED` | [`PipelineError::UpstreamRateLimited`] (429) |
//! | HTTP 401/402/403, credit / billing / key errors | [`PipelineError::UpstreamAuthFailure`] (402) |
//! | anything else | [`PipelineError::UpstreamServiceError`] (502) |
//!
//! There are no automatic retries. Whether to resubmit is the caller's call.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::AnalysisConfig;
use crate::error::PipelineError;
use crate::extract::truncate_chars;

/// Instruction text sent with every document.
pub const SYSTEM_PROMPT: &str = r#"You review contracts and summarize their terms for informational purposes only. You never give legal advice or recommend signing, rejecting or changing a document.

Analyze the contract text supplied by the user and answer with a single JSON object.

OUTPUT RULES
- Output the raw JSON object and nothing else.
- No markdown code fences, no commentary before or after, no comments inside the JSON.

REQUIRED SCHEMA (every key is mandatory; arrays may be empty)
{
  "summary": "<string>",
  "key_obligations": ["<string>"],
  "risky_clauses": [
    { "clause": "<string>", "risk_level": "HIGH" | "MEDIUM" | "LOW", "reason": "<string>" }
  ],
  "missing_clauses": ["<string>"],
  "suggestions": ["<string>"]
}

FIELDS
summary: two or three neutral sentences naming the document type, its purpose and the parties.
key_obligations: duties the document explicitly places on each party, each starting with the party ("Client must ...", "Supplier shall ..."). Include payment, delivery, confidentiality and notice duties when present. Do not infer duties that are not written.
risky_clauses: only terms that are materially unusual, one-sided or potentially harmful compared with ordinary commercial contracts. Be conservative and do not flag routine clauses.
  clause: the relevant text, quoted or closely paraphrased.
  risk_level: HIGH (severely one-sided, significant unexpected liability), MEDIUM (meaningful deviation that may disadvantage a party), LOW (slightly unusual, worth noting). When unsure pick the lower level.
  reason: one or two neutral sentences on why the clause may deserve attention.
missing_clauses: standard clause types that are absent and commonly expected in this kind of contract.
suggestions: two to five neutral observations a reader might raise with counsel ("It may be worth clarifying ...").

CONSTRAINTS
- Informational only, not legal advice.
- Do not speculate about intent or likely outcomes.
- Do not name laws or statutes unless the document cites them.
- If the text is too short or is not a contract, keep the schema, leave the arrays empty and say so in the summary.
- risk_level must be exactly HIGH, MEDIUM or LOW in uppercase."#;

/// Builds the user turn: a short framing line followed by the document text verbatim.
pub fn build_user_message(document_text: &str) -> String {
    format!(
        "Analyze the following contract and return the JSON object described in your instructions. Do not include anything outside the JSON.\n\n---\n\n{}",
        document_text
    )
}

/// Failure reported by an analysis backend before classification.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct UpstreamError {
    /// HTTP status when the service answered at all.
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        Self {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

const RATE_LIMIT_MARKERS: &[&str] = &["rate_limit", "rate limit", "resource_exhausted", "429"];
const AUTH_MARKERS: &[&str] = &[
    "credit",
    "billing",
    "api key",
    "api_key",
    "permission_denied",
    "unauthenticated",
    "401",
    "403",
];

/// Maps an upstream failure to rate-limit, auth/billing or generic service error.
pub fn classify_upstream(err: &UpstreamError) -> PipelineError {
    match err.status {
        Some(429) => return PipelineError::UpstreamRateLimited,
        Some(401..=403) => return PipelineError::UpstreamAuthFailure,
        _ => {}
    }
    let msg = err.message.to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| msg.contains(m)) {
        PipelineError::UpstreamRateLimited
    } else if AUTH_MARKERS.iter().any(|m| msg.contains(m)) {
        PipelineError::UpstreamAuthFailure
    } else {
        PipelineError::UpstreamServiceError
    }
}

/// A backend that turns instructions plus a user message into raw text.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-1.5-flash"`).
    fn model_name(&self) -> &str;

    /// Sends one request and returns the model's raw text output.
    async fn generate(&self, instructions: &str, user_message: &str)
        -> Result<String, UpstreamError>;
}

// ============ Gemini ============

pub struct GeminiService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_output_tokens: u32,
    temperature: f32,
}

impl GeminiService {
    pub fn new(config: &AnalysisConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            endpoint: config.endpoint_url().to_string(),
            model: config.model_name().to_string(),
            api_key,
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl AnalysisService for GeminiService {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        instructions: &str,
        user_message: &str,
    ) -> Result<String, UpstreamError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );
        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": instructions }] },
            "contents": [{ "role": "user", "parts": [{ "text": user_message }] }],
            "generationConfig": {
                "maxOutputTokens": self.max_output_tokens,
                "temperature": self.temperature,
                "responseMimeType": "application/json",
            },
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let json = read_json(response).await?;
        Ok(parse_gemini_response(&json))
    }
}

/// Concatenates the text parts of the first candidate; empty when the
/// response has none (e.g. a blocked prompt).
pub fn parse_gemini_response(json: &serde_json::Value) -> String {
    json.pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default()
}

// ============ OpenAI-compatible ============

pub struct OpenAiService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_output_tokens: u32,
    temperature: f32,
}

impl OpenAiService {
    pub fn new(config: &AnalysisConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            endpoint: config.endpoint_url().to_string(),
            model: config.model_name().to_string(),
            api_key,
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl AnalysisService for OpenAiService {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        instructions: &str,
        user_message: &str,
    ) -> Result<String, UpstreamError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": instructions },
                { "role": "user", "content": user_message },
            ],
            "max_tokens": self.max_output_tokens,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let json = read_json(response).await?;
        Ok(parse_openai_response(&json))
    }
}

pub fn parse_openai_response(json: &serde_json::Value) -> String {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string()
}

fn build_client() -> Result<reqwest::Client> {
    // The overall deadline is enforced by AnalysisInvoker, not here.
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

/// Returns the body as JSON on success, or an [`UpstreamError`] carrying
/// the status and (truncated) body text otherwise.
async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body_text = response.text().await.unwrap_or_default();
    Err(UpstreamError::new(
        Some(status.as_u16()),
        format!("API error {}: {}", status, truncate_chars(&body_text, 500)),
    ))
}

/// Creates the configured backend, reading its credential from the environment.
///
/// # Errors
///
/// Fails when the provider is unknown or its API key variable is unset.
/// Callers treat this as a fatal startup condition.
pub fn create_service(config: &AnalysisConfig) -> Result<Arc<dyn AnalysisService>> {
    let api_key = config.api_key()?;
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiService::new(config, api_key)?)),
        "openai" => Ok(Arc::new(OpenAiService::new(config, api_key)?)),
        other => bail!("Unknown analysis provider: {}", other),
    }
}

// ============ Invoker ============

/// Sends length-bounded text to a service under the instruction contract.
#[derive(Clone)]
pub struct AnalysisInvoker {
    service: Arc<dyn AnalysisService>,
    timeout: Duration,
    max_chars: usize,
}

impl AnalysisInvoker {
    pub fn new(service: Arc<dyn AnalysisService>, timeout: Duration, max_chars: usize) -> Self {
        Self {
            service,
            timeout,
            max_chars,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the service's raw text, or a classified failure.
    pub async fn invoke(&self, document_text: &str) -> Result<String, PipelineError> {
        let message = build_user_message(truncate_chars(document_text, self.max_chars));
        debug!(
            model = self.service.model_name(),
            chars = message.chars().count(),
            "Invoking analysis service"
        );

        let call = self.service.generate(SYSTEM_PROMPT, &message);
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                error!(
                    timeout_secs = self.timeout.as_secs(),
                    "Analysis service timed out"
                );
                Err(PipelineError::AnalysisTimeout {
                    secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                error!(status = ?e.status, error = %e, "Analysis service failed");
                Err(classify_upstream(&e))
            }
            Ok(Ok(raw)) => Ok(raw),
        }
    }
}

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// CORS origin; any origin when unset.
    #[serde(default)]
    pub allowed_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origin: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl ServerConfig {
    /// Bind address with the port replaced by `PORT` when that variable is set.
    pub fn effective_bind(&self) -> String {
        match std::env::var("PORT") {
            Ok(port) if !port.trim().is_empty() => {
                let host = self
                    .bind
                    .rsplit_once(':')
                    .map(|(h, _)| h)
                    .unwrap_or(&self.bind);
                format!("{}:{}", host, port.trim())
            }
            _ => self.bind.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_field_name")]
    pub field_name: String,
    #[serde(default = "default_allowed_mime_type")]
    pub allowed_mime_type: String,
    #[serde(default = "default_allowed_extension")]
    pub allowed_extension: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            field_name: default_field_name(),
            allowed_mime_type: default_allowed_mime_type(),
            allowed_extension: default_allowed_extension(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    20 * 1024 * 1024
}
fn default_field_name() -> String {
    "file".to_string()
}
fn default_allowed_mime_type() -> String {
    "application/pdf".to_string()
}
fn default_allowed_extension() -> String {
    ".pdf".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
            max_text_chars: default_max_text_chars(),
            timeout_secs: default_extraction_timeout_secs(),
        }
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_min_text_chars() -> usize {
    30
}
fn default_max_text_chars() -> usize {
    90_000
}
fn default_extraction_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier; provider default when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL of the provider API; provider default when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the credential; provider default when unset.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_analysis_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            endpoint: None,
            api_key_env: None,
            max_output_tokens: default_max_output_tokens(),
            temperature: 0.0,
            timeout_secs: default_analysis_timeout_secs(),
        }
    }
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn model_name(&self) -> &str {
        match (&self.model, self.provider.as_str()) {
            (Some(m), _) => m,
            (None, "openai") => "gpt-4o-mini",
            (None, _) => "gemini-1.5-flash",
        }
    }

    pub fn endpoint_url(&self) -> &str {
        match (&self.endpoint, self.provider.as_str()) {
            (Some(e), _) => e.trim_end_matches('/'),
            (None, "openai") => "https://api.openai.com",
            (None, _) => "https://generativelanguage.googleapis.com",
        }
    }

    pub fn key_env(&self) -> &str {
        match (&self.api_key_env, self.provider.as_str()) {
            (Some(k), _) => k,
            (None, "openai") => "OPENAI_API_KEY",
            (None, _) => "GEMINI_API_KEY",
        }
    }

    /// Reads the API credential from the environment.
    pub fn api_key(&self) -> Result<String> {
        let var = self.key_env();
        match std::env::var(var) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => bail!("Missing required environment variable: {}", var),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_max_output_tokens() -> u32 {
    8192
}
fn default_analysis_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_backend")]
    pub backend: String,
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: default_history_backend(),
            path: default_history_path(),
            capacity: default_history_capacity(),
        }
    }
}

fn default_history_backend() -> String {
    "sqlite".to_string()
}
fn default_history_path() -> PathBuf {
    PathBuf::from("./data/history.sqlite")
}
fn default_history_capacity() -> usize {
    50
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Loads the file when one is given, otherwise returns validated defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => {
            let config = Config::default();
            validate(&config)?;
            Ok(config)
        }
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate upload
    if config.upload.max_file_bytes == 0 {
        bail!("upload.max_file_bytes must be > 0");
    }
    if config.upload.field_name.is_empty() {
        bail!("upload.field_name must not be empty");
    }

    // Validate extraction
    if config.extraction.max_text_chars == 0 {
        bail!("extraction.max_text_chars must be > 0");
    }
    if config.extraction.min_text_chars >= config.extraction.max_text_chars {
        bail!("extraction.min_text_chars must be < extraction.max_text_chars");
    }
    if config.extraction.timeout_secs == 0 {
        bail!("extraction.timeout_secs must be > 0");
    }

    // Validate analysis
    match config.analysis.provider.as_str() {
        "gemini" | "openai" => {}
        other => bail!(
            "Unknown analysis provider: '{}'. Must be gemini or openai.",
            other
        ),
    }
    if config.analysis.timeout_secs == 0 {
        bail!("analysis.timeout_secs must be > 0");
    }
    if config.analysis.max_output_tokens == 0 {
        bail!("analysis.max_output_tokens must be > 0");
    }

    // Validate history
    if config.history.capacity == 0 {
        bail!("history.capacity must be >= 1");
    }
    match config.history.backend.as_str() {
        "sqlite" | "memory" => {}
        other => bail!(
            "Unknown history backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.upload.max_file_bytes, 20 * 1024 * 1024);
        assert_eq!(config.extraction.min_text_chars, 30);
        assert_eq!(config.extraction.max_text_chars, 90_000);
        assert_eq!(config.extraction.timeout_secs, 30);
        assert_eq!(config.analysis.timeout_secs, 60);
        assert_eq!(config.history.capacity, 50);
        assert_eq!(config.analysis.model_name(), "gemini-1.5-flash");
        assert_eq!(config.analysis.key_env(), "GEMINI_API_KEY");
    }

    #[test]
    fn openai_provider_defaults() {
        let config: Config = toml::from_str("[analysis]\nprovider = \"openai\"\n").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.analysis.key_env(), "OPENAI_API_KEY");
        assert_eq!(config.analysis.endpoint_url(), "https://api.openai.com");
    }

    #[test]
    fn unknown_provider_rejected() {
        let config: Config = toml::from_str("[analysis]\nprovider = \"claude\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn inverted_text_bounds_rejected() {
        let config: Config =
            toml::from_str("[extraction]\nmin_text_chars = 100\nmax_text_chars = 50\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_capacity_rejected() {
        let config: Config = toml::from_str("[history]\ncapacity = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn missing_credential_is_an_error() {
        let config: Config =
            toml::from_str("[analysis]\napi_key_env = \"VERILEX_TEST_UNSET_KEY\"\n").unwrap();
        let err = config.analysis.api_key().unwrap_err();
        assert!(err.to_string().contains("VERILEX_TEST_UNSET_KEY"));
    }
}

//! Pipeline configuration persisted as TOML.
//!
//! ```toml
//! [model]
//! provider = "ollama"
//! name = "llama3.2"
//! endpoint = "http://localhost:11434"
//!
//! [disambiguation]
//! strategy = "llm"
//!
//! [resolution]
//! candidates_limit = 10
//! fast_path = true
//! ```
//!
//! Environment overrides: `RETRY_ATTEMPTS`, `LLM_API_KEY`, `LLM_API_ENDPOINT`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embed::{Embedder, HashingEmbedder, SimilarityMetric};
use crate::error::ConfigError;
use crate::llm::ollama::{OllamaClient, OllamaConfig};
use crate::resolve::ResolveOptions;
use crate::retry::RetryPolicy;

/// Chat-model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// `ollama` or `openai`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model used for every call unless overridden below.
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Model used for triple extraction, if different.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_model: Option<String>,
    /// Model used for LLM-judged disambiguation, if different.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linking_model: Option<String>,
    /// Extra request parameters passed to the provider verbatim.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

fn default_provider() -> String {
    "ollama".into()
}

fn default_model_name() -> String {
    "llama3.2".into()
}

fn default_endpoint() -> Option<String> {
    Some("http://localhost:11434".into())
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            name: default_model_name(),
            endpoint: default_endpoint(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            extraction_model: None,
            linking_model: None,
            params: serde_json::Map::new(),
        }
    }
}

impl ModelConfig {
    pub fn extraction_model_name(&self) -> &str {
        self.extraction_model.as_deref().unwrap_or(&self.name)
    }

    pub fn linking_model_name(&self) -> &str {
        self.linking_model.as_deref().unwrap_or(&self.name)
    }
}

/// Triple-extraction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Few-shot examples per question.
    #[serde(default = "default_few_shot_k")]
    pub few_shot_k: usize,
    /// Example file (`.jsonl`, `.json`, `.csv`, `.tsv`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<PathBuf>,
    /// Precomputed example index written by `kbqa index-examples`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<PathBuf>,
    /// Fall back to the built-in examples when no file is configured.
    #[serde(default = "default_true")]
    pub default_examples: bool,
}

fn default_few_shot_k() -> usize {
    5
}

fn default_true() -> bool {
    true
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            few_shot_k: default_few_shot_k(),
            examples: None,
            index: None,
            default_examples: true,
        }
    }
}

/// Disambiguation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisambiguationConfig {
    /// Registered strategy name.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub metric: SimilarityMetric,
    /// `hashing` or `ollama`.
    #[serde(default = "default_embedder")]
    pub embedder: String,
    /// Vector size of the hashing embedder.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Embedding model for the `ollama` embedder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

fn default_strategy() -> String {
    "llm".into()
}

fn default_embedder() -> String {
    "hashing".into()
}

fn default_embedding_dim() -> usize {
    384
}

impl Default for DisambiguationConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            metric: SimilarityMetric::default(),
            embedder: default_embedder(),
            embedding_dim: default_embedding_dim(),
            embedding_model: None,
        }
    }
}

/// Retry settings for model and knowledge-base calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_attempts() -> u32 {
    crate::retry::DEFAULT_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.attempts, Duration::from_millis(self.delay_ms))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub disambiguation: DisambiguationConfig,
    #[serde(default)]
    pub resolution: ResolveOptions,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl QaConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("RETRY_ATTEMPTS") {
            self.retry.attempts = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "RETRY_ATTEMPTS".into(),
                message: format!("expected a positive integer, got `{raw}`"),
            })?;
        }
        if let Some(key) = lookup("LLM_API_KEY").filter(|k| !k.is_empty()) {
            self.model.api_key = Some(key);
        }
        if let Some(endpoint) = lookup("LLM_API_ENDPOINT").filter(|e| !e.is_empty()) {
            self.model.endpoint = Some(endpoint);
        }
        Ok(())
    }

    /// The embedder selected under `[disambiguation]`.
    pub fn build_embedder(&self) -> Result<Arc<dyn Embedder>, ConfigError> {
        let d = &self.disambiguation;
        match d.embedder.trim().to_ascii_lowercase().as_str() {
            "hashing" => Ok(Arc::new(HashingEmbedder::new(d.embedding_dim))),
            "ollama" => {
                let model = d
                    .embedding_model
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .ok_or_else(|| ConfigError::Invalid {
                        key: "disambiguation.embedding_model".into(),
                        message: "the ollama embedder needs a model name".into(),
                    })?;
                let base_url = self
                    .model
                    .endpoint
                    .clone()
                    .ok_or_else(|| ConfigError::MissingEndpoint {
                        provider: "ollama".into(),
                    })?;
                Ok(Arc::new(OllamaClient::new(OllamaConfig {
                    base_url,
                    model,
                    timeout_secs: self.model.timeout_secs,
                    options: serde_json::Map::new(),
                })))
            }
            other => Err(ConfigError::Invalid {
                key: "disambiguation.embedder".into(),
                message: format!("unknown embedder `{other}`, expected `hashing` or `ollama`"),
            }),
        }
    }
}

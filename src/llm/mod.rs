//! Chat-model clients and output parsing.
//!
//! The pipeline treats a chat model as synchronous request/response: a list
//! of [`ChatMessage`]s in, free text out. Two HTTP clients ship with the
//! crate ([`ollama::OllamaClient`], [`openai::OpenAiClient`]); anything else
//! can implement [`ChatModel`] directly.

pub mod ollama;
pub mod openai;
pub mod parse;

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ModelConfig;
use crate::error::ConfigError;

/// Errors from the chat-model subsystem.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("model server is not available at {url}")]
    #[diagnostic(
        code(kbqa::llm::unavailable),
        help("Start the model server (e.g. `ollama serve`) or point `model.endpoint` elsewhere.")
    )]
    Unavailable { url: String },

    #[error("model request failed: {message}")]
    #[diagnostic(
        code(kbqa::llm::request_failed),
        help("Check that the model server is running, the model exists, and the API key is valid.")
    )]
    RequestFailed { message: String },

    #[error("failed to parse model response: {message}")]
    #[diagnostic(
        code(kbqa::llm::parse_error),
        help("The model server returned an unexpected response format.")
    )]
    ParseError { message: String },

    #[error("model request timed out after {timeout_secs}s")]
    #[diagnostic(
        code(kbqa::llm::timeout),
        help("Increase the timeout or use a smaller model.")
    )]
    Timeout { timeout_secs: u64 },
}

/// Author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A chat message for multi-turn prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat model: structured prompt in, free text out.
pub trait ChatModel: Send + Sync {
    fn invoke(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

impl<T: ChatModel + ?Sized> ChatModel for Arc<T> {
    fn invoke(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        (**self).invoke(messages)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAi,
}

impl std::str::FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            _ => Err(ConfigError::UnknownProvider { provider: s.into() }),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Build a chat model from configuration, failing before any network call
/// when a required setting is missing.
pub fn build_model(config: &ModelConfig, model_name: &str) -> Result<Arc<dyn ChatModel>, ConfigError> {
    let provider: Provider = config.provider.parse()?;
    if model_name.trim().is_empty() {
        return Err(ConfigError::MissingModelName {
            provider: provider.to_string(),
        });
    }
    let endpoint = config
        .endpoint
        .clone()
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEndpoint {
            provider: provider.to_string(),
        })?;

    match provider {
        Provider::Ollama => Ok(Arc::new(ollama::OllamaClient::new(ollama::OllamaConfig {
            base_url: endpoint,
            model: model_name.to_string(),
            timeout_secs: config.timeout_secs,
            options: config.params.clone(),
        }))),
        Provider::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingApiKey {
                    provider: provider.to_string(),
                })?;
            Ok(Arc::new(openai::OpenAiClient::new(openai::OpenAiConfig {
                base_url: endpoint,
                api_key,
                model: model_name.to_string(),
                timeout_secs: config.timeout_secs,
                params: config.params.clone(),
            })))
        }
    }
}

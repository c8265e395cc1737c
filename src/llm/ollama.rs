//! Ollama client: chat completions and embeddings over the REST API.

use std::time::Duration;

use crate::embed::{EmbedError, Embedder};

use super::{ChatMessage, ChatModel, LlmError};

/// Configuration for the Ollama client.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    pub base_url: String,
    /// Model name to use.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Sampling options forwarded verbatim (`temperature`, `num_ctx`, ...).
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            timeout_secs: 120,
            options: serde_json::Map::new(),
        }
    }
}

/// Client for the Ollama REST API.
pub struct OllamaClient {
    config: OllamaConfig,
    agent: ureq::Agent,
}

impl OllamaClient {
    /// Create a new Ollama client with the given configuration.
    pub fn new(config: OllamaConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { config, agent }
    }

    /// Probe the server with a lightweight `/api/tags` request.
    pub fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        matches!(
            self.agent.get(&url).timeout(Duration::from_secs(5)).call(),
            Ok(resp) if resp.status() == 200
        )
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, LlmError> {
        let url = format!("{}{path}", self.config.base_url);
        let body_str = serde_json::to_string(body).map_err(|e| LlmError::RequestFailed {
            message: format!("JSON serialize error: {e}"),
        })?;

        let resp = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body_str)
            .map_err(|e| match e {
                ureq::Error::Transport(t) if t.kind() == ureq::ErrorKind::ConnectionFailed => {
                    LlmError::Unavailable {
                        url: self.config.base_url.clone(),
                    }
                }
                ureq::Error::Transport(t) if t.to_string().contains("timed out") => {
                    LlmError::Timeout {
                        timeout_secs: self.config.timeout_secs,
                    }
                }
                other => LlmError::RequestFailed {
                    message: other.to_string(),
                },
            })?;

        let resp_str = resp.into_string().map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })?;

        serde_json::from_str(&resp_str).map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })
    }

    /// Get the model name being used.
    pub fn model(&self) -> &str {
        &self.config.model
    }
}

impl ChatModel for OllamaClient {
    fn invoke(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let msgs: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": msgs,
            "stream": false,
        });
        if !self.config.options.is_empty() {
            body["options"] = serde_json::Value::Object(self.config.options.clone());
        }

        let json = self.post("/api/chat", &body)?;
        json["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::ParseError {
                message: "missing 'message.content' field".into(),
            })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

impl Embedder for OllamaClient {
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.config.model,
            "input": texts,
        });
        let json = self.post("/api/embed", &body).map_err(|e| EmbedError::Backend {
            message: e.to_string(),
        })?;

        let rows = json["embeddings"]
            .as_array()
            .ok_or_else(|| EmbedError::Backend {
                message: "missing 'embeddings' field".into(),
            })?;
        let vectors: Vec<Vec<f32>> = rows
            .iter()
            .map(|row| {
                row.as_array()
                    .map(|xs| xs.iter().filter_map(|x| x.as_f64()).map(|x| x as f32).collect())
                    .unwrap_or_default()
            })
            .collect();
        if vectors.len() != texts.len() {
            return Err(EmbedError::Backend {
                message: format!("asked for {} embeddings, got {}", texts.len(), vectors.len()),
            });
        }
        Ok(vectors)
    }
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_unreachable_returns_false() {
        let client = OllamaClient::new(OllamaConfig {
            base_url: "http://127.0.0.1:1".into(), // unreachable port
            ..Default::default()
        });
        assert!(!client.probe());
    }

    #[test]
    fn chat_when_unreachable_returns_error() {
        let client = OllamaClient::new(OllamaConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout_secs: 2,
            ..Default::default()
        });
        let result = client.invoke(&[ChatMessage::user("hello")]);
        assert!(result.is_err());
    }

    #[test]
    fn empty_embedding_request_skips_network() {
        let client = OllamaClient::new(OllamaConfig {
            base_url: "http://127.0.0.1:1".into(),
            ..Default::default()
        });
        assert!(client.encode(&[]).unwrap().is_empty());
    }

    #[test]
    fn default_config_values() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.timeout_secs, 120);
    }
}

//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use super::{ChatMessage, ChatModel, LlmError};

/// Configuration for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL including the version prefix, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Extra request fields (`temperature`, `max_tokens`, ...).
    pub params: serde_json::Map<String, serde_json::Value>,
}

pub struct OpenAiClient {
    config: OpenAiConfig,
    agent: ureq::Agent,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { config, agent }
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        let msgs: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let mut body = serde_json::Map::new();
        for (k, v) in &self.config.params {
            body.insert(k.clone(), v.clone());
        }
        body.insert("model".into(), self.config.model.clone().into());
        body.insert("messages".into(), msgs.into());
        serde_json::Value::Object(body)
    }
}

impl ChatModel for OpenAiClient {
    fn invoke(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = self.request_body(messages);
        let body_str = serde_json::to_string(&body).map_err(|e| LlmError::RequestFailed {
            message: format!("JSON serialize error: {e}"),
        })?;

        let resp = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {}", self.config.api_key))
            .send_string(&body_str)
            .map_err(|e| match e {
                ureq::Error::Transport(t) if t.kind() == ureq::ErrorKind::ConnectionFailed => {
                    LlmError::Unavailable {
                        url: self.config.base_url.clone(),
                    }
                }
                other => LlmError::RequestFailed {
                    message: other.to_string(),
                },
            })?;

        let resp_str = resp.into_string().map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })?;
        let json: serde_json::Value =
            serde_json::from_str(&resp_str).map_err(|e| LlmError::ParseError {
                message: e.to_string(),
            })?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::ParseError {
                message: "missing 'choices[0].message.content' field".into(),
            })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The API key stays out of debug output.
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

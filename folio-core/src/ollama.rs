//! Model service interface and the Ollama client.
//!
//! The pipeline talks to its embedding/chat backend through the
//! [`ModelService`] trait so orchestration can be tested against mocks.
//! [`OllamaClient`] is the production implementation, speaking the Ollama
//! HTTP API: `/api/embeddings`, `/api/chat` (non-streaming), and
//! `/api/tags` as a liveness probe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::config::OllamaConfig;
use crate::error::OllamaError;

/// Per-request timeouts. Embedding and chat calls can be slow on CPU-only
/// hosts; the liveness probe must fail fast.
const EMBED_TIMEOUT: Duration = Duration::from_secs(300);
const CHAT_TIMEOUT: Duration = Duration::from_secs(600);
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat request, in the wire format the service expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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
}

/// The embedding/completion backend the pipeline calls out to.
///
/// Embedding dimensionality must be stable for the life of a store;
/// mixing embedding models invalidates the index.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Embed one text with the named embedding model.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, OllamaError>;

    /// Run one non-streaming chat completion and return the reply text.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, OllamaError>;

    /// Cheap reachability probe. Ingest and query refuse to start when
    /// this returns false.
    async fn is_alive(&self) -> bool;

    /// Names of the models the service has available, for diagnostics.
    async fn list_models(&self) -> Result<Vec<String>, OllamaError>;
}

/// HTTP client for an Ollama-compatible model server.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    num_ctx: usize,
}

impl OllamaClient {
    /// Create a client from configuration. A trailing slash on the base
    /// URL is trimmed so endpoint paths join cleanly.
    pub fn new(config: &OllamaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            num_ctx: config.num_ctx,
        }
    }

    /// The base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, OllamaError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| OllamaError::Connection {
                message: format!("Request failed: {e}"),
            })?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| OllamaError::Connection {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(OllamaError::ApiRequest {
                message: format!("HTTP {status}: {body_text}"),
            });
        }

        serde_json::from_str(&body_text).map_err(|e| OllamaError::ResponseParse {
            message: format!("Invalid JSON: {e}"),
        })
    }
}

#[async_trait]
impl ModelService for OllamaClient {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, OllamaError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = json!({ "model": model, "prompt": text });

        debug!(url = %url, model = %model, "Sending embedding request");
        let parsed = self.post_json(&url, &body, EMBED_TIMEOUT).await?;

        let embedding = parsed
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| OllamaError::ResponseParse {
                message: "No embedding in response".to_string(),
            })?;

        embedding
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| OllamaError::ResponseParse {
                    message: "Non-numeric embedding component".to_string(),
                })
            })
            .collect()
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, OllamaError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": temperature, "num_ctx": self.num_ctx },
        });

        debug!(url = %url, model = %model, "Sending chat request");
        let parsed = self.post_json(&url, &body, CHAT_TIMEOUT).await?;

        // Chat endpoints reply with message.content; generate-style
        // endpoints with a top-level response string.
        let content = parsed
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default();
        if !content.is_empty() {
            return Ok(content.to_string());
        }
        Ok(parsed
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn is_alive(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(LIVENESS_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(LIVENESS_TIMEOUT)
            .send()
            .await
            .map_err(|e| OllamaError::Connection {
                message: format!("Request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OllamaError::ApiRequest {
                message: format!("HTTP {status}"),
            });
        }

        let parsed: Value = response.json().await.map_err(|e| OllamaError::ResponseParse {
            message: format!("Invalid JSON: {e}"),
        })?;

        Ok(parsed
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Fail with `Unreachable` unless the service answers its liveness
/// probe. Ingest and query call this before doing any other work;
/// an unreachable service is a startup failure, not a retry loop.
pub async fn ensure_reachable(
    service: &dyn ModelService,
    base_url: &str,
) -> Result<(), OllamaError> {
    if service.is_alive().await {
        Ok(())
    } else {
        Err(OllamaError::Unreachable {
            base_url: base_url.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Mock service
// ---------------------------------------------------------------------------

/// A mock model service for testing and development.
///
/// Embeddings are deterministic bag-of-words vectors (each token hashed
/// to a dimension, term frequency accumulated), so texts sharing
/// vocabulary have positive inner product after normalization. Chat
/// replies come from a per-model table, and calls are recorded for
/// inspection.
pub struct MockModelService {
    dimensions: usize,
    replies: std::sync::Mutex<std::collections::HashMap<String, String>>,
    default_reply: String,
    failing: std::sync::Mutex<std::collections::HashSet<String>>,
    chat_calls: std::sync::Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl MockModelService {
    pub fn new() -> Self {
        Self {
            dimensions: 64,
            replies: std::sync::Mutex::new(std::collections::HashMap::new()),
            default_reply: "mock answer".to_string(),
            failing: std::sync::Mutex::new(std::collections::HashSet::new()),
            chat_calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Fix the reply returned for chat calls to the given model.
    pub fn with_reply(self, model: &str, reply: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(model.to_string(), reply.to_string());
        self
    }

    /// Make every chat call to the given model fail.
    pub fn with_failing_model(self, model: &str) -> Self {
        self.failing.lock().unwrap().insert(model.to_string());
        self
    }

    /// All chat calls seen so far, as (model, messages) pairs.
    pub fn chat_calls(&self) -> Vec<(String, Vec<ChatMessage>)> {
        self.chat_calls.lock().unwrap().clone()
    }
}

impl Default for MockModelService {
    fn default() -> Self {
        Self::new()
    }
}

fn mock_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl ModelService for MockModelService {
    async fn embed(&self, text: &str, _model: &str) -> Result<Vec<f32>, OllamaError> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[mock_hash(word) % self.dimensions] += 1.0;
        }
        Ok(vector)
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        _temperature: f32,
    ) -> Result<String, OllamaError> {
        self.chat_calls
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec()));

        if self.failing.lock().unwrap().contains(model) {
            return Err(OllamaError::ApiRequest {
                message: format!("mock failure for {model}"),
            });
        }

        Ok(self
            .replies
            .lock()
            .unwrap()
            .get(model)
            .cloned()
            .unwrap_or_else(|| self.default_reply.clone()))
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<String>, OllamaError> {
        Ok(self.replies.lock().unwrap().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_wire_shape() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hello"}"#);
    }

    #[test]
    fn test_system_role_serializes_lowercase() {
        let msg = ChatMessage::system("rules");
        assert!(serde_json::to_string(&msg).unwrap().contains("\"system\""));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = OllamaClient::new(&OllamaConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..OllamaConfig::default()
        });
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_mock_embed_is_deterministic() {
        let mock = MockModelService::new();
        let a = mock.embed("capital of France", "m").await.unwrap();
        let b = mock.embed("capital of France", "m").await.unwrap();
        assert_eq!(a, b);
        assert!(a.iter().any(|&v| v > 0.0));
    }

    #[tokio::test]
    async fn test_mock_embed_shares_mass_for_shared_vocabulary() {
        let mock = MockModelService::new();
        let a = mock.embed("the capital of France", "m").await.unwrap();
        let b = mock.embed("France capital", "m").await.unwrap();
        let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!(dot > 0.0);
    }

    #[tokio::test]
    async fn test_mock_chat_reply_table_and_recording() {
        let mock = MockModelService::new().with_reply("fast", "quick answer");
        let reply = mock
            .chat("fast", &[ChatMessage::user("q")], 0.2)
            .await
            .unwrap();
        assert_eq!(reply, "quick answer");

        let calls = mock.chat_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "fast");
        assert_eq!(calls[0].1[0].content, "q");
    }

    #[tokio::test]
    async fn test_mock_failing_model_errors() {
        let mock = MockModelService::new().with_failing_model("bad");
        let err = mock.chat("bad", &[ChatMessage::user("q")], 0.2).await;
        assert!(err.is_err());
    }
}

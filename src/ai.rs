//! AI completion client
//!
//! The agent loop talks to the model through the `AiClient` seam: one
//! synchronous call per loop iteration, no retries. The HTTP implementation
//! targets an OpenAI-compatible chat completions endpoint and keeps a
//! long-lived reqwest::Client for connection pooling.

use crate::error::AssistantError;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Seam between the agent loop and the model provider.
#[async_trait::async_trait]
pub trait AiClient: Send + Sync {
    /// Single-shot completion call. A transport failure aborts the turn.
    async fn call(&self, system_prompt: &str, conversation: &str) -> Result<String>;
}

/// HTTP completion client for OpenAI-compatible chat APIs
pub struct HttpCompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait::async_trait]
impl AiClient for HttpCompletionClient {
    async fn call(&self, system_prompt: &str, conversation: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(AssistantError::Completion(
                "AI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}/chat/completions", self.base_url);

        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: conversation.to_string(),
                },
            ],
            temperature: 0.3,
            stream: false,
        };

        info!(model = %self.model, "Calling completion API");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Completion request failed: {}", e);
                AssistantError::Completion(format!("request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Completion API error response: {} {}", status, error_text);
            return Err(AssistantError::Completion(format!(
                "API returned {}: {}",
                status, error_text
            )));
        }

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            error!("Failed to parse completion response: {}", e);
            AssistantError::Completion(format!("parse error: {}", e))
        })?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                AssistantError::Completion("empty response from completion API".to_string())
            })?;

        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Scripted client for development & testing.
/// Keeps the system functional without a model provider: plays back queued
/// responses in order, then falls back to a canned answer.
pub struct MockAiClient {
    responses: Mutex<VecDeque<String>>,
}

impl MockAiClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn scripted(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }

    pub async fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().await.push_back(response.into());
    }
}

impl Default for MockAiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AiClient for MockAiClient {
    async fn call(&self, _system_prompt: &str, _conversation: &str) -> Result<String> {
        let mut responses = self.responses.lock().await;
        Ok(responses
            .pop_front()
            .unwrap_or_else(|| "I don't have a live model configured right now.".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = CompletionRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "What are my positions?".to_string(),
            }],
            temperature: 0.3,
            stream: false,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("deepseek-chat"));
        assert!(json.contains("What are my positions?"));
    }

    #[tokio::test]
    async fn test_mock_client_plays_back_in_order() {
        let client = MockAiClient::scripted(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(client.call("", "").await.unwrap(), "first");
        assert_eq!(client.call("", "").await.unwrap(), "second");
        // Exhausted script falls back to the canned answer
        assert!(client.call("", "").await.unwrap().contains("live model"));
    }

    #[tokio::test]
    async fn test_http_client_requires_api_key() {
        let client =
            HttpCompletionClient::new("https://api.example.com/v1", "", "deepseek-chat").unwrap();
        let err = client.call("system", "hello").await.unwrap_err();
        assert!(err.to_string().contains("AI_API_KEY"));
    }
}

//!
//! src/llm.rs  Andrew Belles  Oct 2025
//!
//! Thin text-completion interface over an OpenAI-compatible
//! chat completions endpoint. Prompting and parsing live in src/model.rs
//!

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::LlmConfig;

#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
            timeout: Duration::from_secs(120),
        }
    }
}

impl From<&LlmConfig> for CompletionOptions {
    fn from(cfg: &LlmConfig) -> Self {
        Self { temperature: cfg.temperature, max_tokens: None, timeout: cfg.timeout }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request timeout")]
    Timeout,
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LlmError {
    /// Throttling, timeouts, transport and 5xx failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited | LlmError::Timeout | LlmError::Connection(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::InvalidResponse(_) | LlmError::Serialization(_) => false
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Sends one user prompt, returns the assistant's text
    async fn complete(&self, prompt: &str, options: &CompletionOptions) ->
        Result<String, LlmError>;
}

pub struct OpenAiProvider {
    client: Client,
    base_url: url::Url,
    model: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(cfg: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| LlmError::Connection(format!("build client: {e}")))?;
        Ok( Self {
            client,
            base_url: cfg.api_base.clone(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) ->
        Result<String, LlmError> {
        let url = self.base_url.join("chat/completions")
            .map_err(|e| LlmError::Connection(format!("bad base url: {e}")))?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| LlmError::Serialization(e.to_string()))?;

        debug!(model = %self.model, prompt_chars = prompt.len(), "llm.request");

        let response = self.client
            .post(url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), message });
        }

        let parsed: ChatResponse = response.json().await
            .map_err(|e| LlmError::InvalidResponse(format!("chat response: {e}")))?;
        let choice = parsed.choices.into_iter().next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".into()))?;

        debug!(finish_reason = ?choice.finish_reason, "llm.response");
        Ok( choice.message.content.unwrap_or_default() )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use wiremock::matchers::{body_partial_json, header, method, path};

    fn provider(server: &MockServer) -> OpenAiProvider {
        let cfg = LlmConfig {
            api_key: "sk-test".into(),
            api_base: url::Url::parse(&format!("{}/v1/", server.uri())).unwrap(),
            model: "gpt-test".into(),
            temperature: 0.0,
            timeout: Duration::from_secs(5),
        };
        OpenAiProvider::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn completion_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-test",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [
                    {"message": {"role": "assistant", "content": "hi there"}, "finish_reason": "stop"}
                ]
            })))
            .mount(&server)
            .await;

        let text = provider(&server)
            .complete("hello", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn error_statuses_are_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let p = provider(&server);
        let opts = CompletionOptions::default();
        assert!(matches!(p.complete("x", &opts).await, Err(LlmError::RateLimited)));
        match p.complete("x", &opts).await {
            Err(LlmError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(LlmError::RateLimited.is_retryable());
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!LlmError::Api { status: 401, message: String::new() }.is_retryable());
        assert!(!LlmError::InvalidResponse("no choices".into()).is_retryable());
    }
}

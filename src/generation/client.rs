// HTTP client for OpenAI-compatible chat completion endpoints
//
// Works with any backend exposing /v1/chat/completions. Structured output
// uses `response_format: {type: "json_schema", strict: true}`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::types::{GenerationRequest, Message, StructuredReply, StructuredSchema};
use super::GenerationService;
use crate::config::GenerationConfig;
use crate::retry::{with_retry, RetryPolicy};

const BASE_DELAY_MS: u64 = 1000;

pub struct HttpGenerationClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl HttpGenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            retry: RetryPolicy::new(config.max_attempts, Duration::from_millis(BASE_DELAY_MS)),
        })
    }

    /// Override the retry policy (tests use zero backoff)
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    async fn complete(&self, body: &ChatRequest<'_>) -> Result<ChatMessage> {
        with_retry(self.retry, is_transient, |_| self.complete_once(body)).await
    }

    /// Send a single request (no retry)
    async fn complete_once(&self, body: &ChatRequest<'_>) -> Result<ChatMessage> {
        tracing::debug!("Sending chat completion to {} ({})", self.endpoint(), self.model);

        let mut request = self.client.post(self.endpoint()).json(body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send request to generation service")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!(
                "Generation request failed\n\nStatus: {}\nBody: {}",
                status,
                error_body
            );
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse generation response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .context("Generation response contained no choices")
    }
}

/// Network errors, timeouts, 429 and 5xx are worth another attempt
fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        return e.is_timeout() || e.is_connect() || e.is_request();
    }
    let msg = err.to_string();
    msg.contains("Status: 429") || msg.contains("Status: 5")
}

#[async_trait]
impl GenerationService for HttpGenerationClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let messages = request.messages();
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            temperature: Some(request.temperature),
            response_format: None,
        };
        let message = self.complete(&body).await?;
        if let Some(refusal) = message.refusal {
            bail!("Generation refused: {}", refusal);
        }
        Ok(message.content.unwrap_or_default().trim().to_string())
    }

    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &StructuredSchema,
    ) -> Result<StructuredReply> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: Some(0.0),
            response_format: Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": true,
                    "schema": schema.schema,
                }
            })),
        };
        let message = self.complete(&body).await?;

        if let Some(refusal) = message.refusal {
            return Ok(StructuredReply::refused(refusal));
        }
        Ok(StructuredReply {
            value: message.content.map(Value::String),
            refusal: None,
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::parse_structured;

    fn client_for(server: &mockito::ServerGuard) -> HttpGenerationClient {
        let config = GenerationConfig {
            base_url: server.url(),
            model: "test-model".to_string(),
            api_key: "sk-test".to_string(),
            timeout_secs: 5,
            max_attempts: 2,
        };
        HttpGenerationClient::new(&config)
            .unwrap()
            .with_retry_policy(RetryPolicy::immediate(2))
    }

    #[tokio::test]
    async fn test_generate_returns_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"  hello  "}}]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let text = client
            .generate(&GenerationRequest::new("hi").with_system("sys"))
            .await
            .unwrap();
        assert_eq!(text, "hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_structured_refusal_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":null,"refusal":"schema impossible"}}]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let schema = StructuredSchema::new("s", json!({"type": "object"}));
        let reply = client
            .generate_structured(&[Message::user("x")], &schema)
            .await
            .unwrap();
        assert_eq!(reply.refusal.as_deref(), Some("schema impossible"));
        assert!(reply.value.is_none());
    }

    #[tokio::test]
    async fn test_structured_content_parses() {
        #[derive(serde::Deserialize)]
        struct Out {
            n: u32,
        }

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"{\"n\": 4}"}}]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let schema = StructuredSchema::new("s", json!({"type": "object"}));
        let reply = client
            .generate_structured(&[Message::user("x")], &schema)
            .await
            .unwrap();
        let out: Out = parse_structured(reply).unwrap();
        assert_eq!(out.n, 4);
    }

    #[tokio::test]
    async fn test_server_error_retries_then_fails() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body("unavailable")
            .expect(2)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.generate(&GenerationRequest::new("hi")).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(400)
            .with_body("bad request")
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(client.generate(&GenerationRequest::new("hi")).await.is_err());
        mock.assert_async().await;
    }
}

//! HTTP client for the reasoning endpoint.
//!
//! Speaks the OpenAI chat-completions wire format, which OpenRouter and
//! most self-hosted gateways also accept.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OracleConfig;

/// Oracle transport error types
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Oracle not configured: {0}")]
    NotConfigured(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Request timeout after {0}s")]
    Timeout(u64),
    #[error("Rate limited")]
    RateLimited,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Authentication error: {0}")]
    Authentication(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Something that can answer a consult request with raw model text.
///
/// The pipeline only depends on this trait; tests substitute a canned
/// implementation for the HTTP client.
#[async_trait]
pub trait Consultant: Send + Sync {
    async fn consult(&self, request: ConsultRequest) -> Result<String, OracleError>;
}

/// One bounded consult: a system role, a user prompt, and sampling limits.
#[derive(Debug, Clone)]
pub struct ConsultRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Reqwest-backed consultant
pub struct OracleClient {
    endpoint: String,
    api_key: String,
    timeout_secs: u64,
    client: Client,
}

impl OracleClient {
    pub fn new(config: &OracleConfig) -> Result<Self, OracleError> {
        if config.api_key.is_empty() {
            return Err(OracleError::NotConfigured("API key is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OracleError::Internal(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
            client,
        })
    }
}

#[async_trait]
impl Consultant for OracleClient {
    async fn consult(&self, request: ConsultRequest) -> Result<String, OracleError> {
        let body = ChatRequest {
            model: request.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!("Consulting oracle: model={}", request.model);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    OracleError::Connection(e.to_string())
                } else {
                    OracleError::Internal(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Oracle returned HTTP {}", status);
            return Err(match status.as_u16() {
                401 | 403 => OracleError::Authentication(format!("HTTP {}", status)),
                429 => OracleError::RateLimited,
                _ => OracleError::Internal(format!("HTTP {}", status)),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OracleError::InvalidResponse("No choices in response".to_string()))
    }
}

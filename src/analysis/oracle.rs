use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OracleConfig;

use super::error::OracleError;
use super::prompt::{OraclePayload, PayloadContent};

/// The external generative vision/language service. One synchronous call per
/// invocation, no internal retry; any transport problem or empty reply is an
/// `OracleError` and the caller decides what to do with it.
#[async_trait]
pub trait OracleClient: Send + Sync {
    async fn complete(&self, payload: &OraclePayload) -> Result<String, OracleError>;
}

// --- OpenAI-compatible chat-completions wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Production oracle client against an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OracleConfig,
}

impl OpenAiClient {
    pub fn new(config: OracleConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    fn request_body<'a>(&'a self, payload: &OraclePayload) -> ChatRequest<'a> {
        let mut parts = vec![ContentPart::Text {
            text: payload.instruction.clone(),
        }];
        match &payload.content {
            PayloadContent::Image { data, mime } => parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", mime, data),
                },
            }),
            PayloadContent::Text(text) => parts.push(ContentPart::Text { text: text.clone() }),
        }
        ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: parts,
            }],
            max_tokens: self.config.max_tokens,
        }
    }
}

#[async_trait]
impl OracleClient for OpenAiClient {
    async fn complete(&self, payload: &OraclePayload) -> Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = self.request_body(payload);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(OracleError::EmptyResponse);
        }
        debug!(chars = text.len(), "oracle reply received");
        Ok(text)
    }
}

//! OpenAI-compatible chat completions backend.
//!
//! Each request carries the system prompt, the previous exchange (when there is one), and the new
//! message. Conversation memory is limited to that single exchange.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BotError, ChatBot, Exchange};
use crate::config::BotConfig;

const NO_RESPONSE: &str = "No response available.";

/// Client for an OpenAI-style `/v1/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiChatBot {
    api_url: String,
    api_key: String,
    prompt: String,
    model: String,
    temperature: f64,
    top_p: f64,
    client: reqwest::Client,
}

impl OpenAiChatBot {
    pub fn new(config: &BotConfig, api_key: String) -> Self {
        Self {
            api_url: config.api_url.trim().to_string(),
            api_key,
            prompt: config.prompt.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, send: &str, last_exchange: &Exchange) -> ChatRequest {
        let mut messages = vec![ChatMessage::system(&self.prompt)];
        if !last_exchange.is_empty() {
            messages.push(ChatMessage::user(&last_exchange.received));
            messages.push(ChatMessage::assistant(&last_exchange.sent));
        }
        messages.push(ChatMessage::user(send));
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

#[async_trait]
impl ChatBot for OpenAiChatBot {
    async fn exchange_message(&self, send: &str, last_exchange: &Exchange) -> Result<String, BotError> {
        let body = self.request_body(send, last_exchange);
        let res = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 | 404 | 429 => {
                    let data: ErrorResponse = res.json().await?;
                    BotError::Api(data.error.message)
                }
                other => BotError::UnknownStatus(other),
            });
        }
        let data: ChatResponse = res.json().await?;
        Ok(data.into_reply())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn system(content: &str) -> Self {
        Self::with_role("system", content)
    }

    fn user(content: &str) -> Self {
        Self::with_role("user", content)
    }

    fn assistant(content: &str) -> Self {
        Self::with_role("assistant", content)
    }

    fn with_role(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

impl ChatResponse {
    fn into_reply(self) -> String {
        self.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_else(|| NO_RESPONSE.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

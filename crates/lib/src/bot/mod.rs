//! Reply backends: given a message and the last exchange, produce the bot's answer.
//!
//! The chat session only sees [`ChatBot`]; which backend runs is a configuration choice.

mod canned;
mod openai;

use async_trait::async_trait;

pub use canned::CannedChatBot;
pub use openai::OpenAiChatBot;

/// The most recent (inbound, outbound) pair in a conversation. Empty strings before the first
/// exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exchange {
    pub received: String,
    pub sent: String,
}

impl Exchange {
    pub fn new(received: impl Into<String>, sent: impl Into<String>) -> Self {
        Self {
            received: received.into(),
            sent: sent.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("bot request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("error from upstream api: {0}")]
    Api(String),
    #[error("unknown error from upstream api: {0}")]
    UnknownStatus(u16),
    #[error("bot did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// Produces a reply to `send`, given the previous exchange as conversational memory.
#[async_trait]
pub trait ChatBot: Send + Sync {
    async fn exchange_message(&self, send: &str, last_exchange: &Exchange) -> Result<String, BotError>;
}

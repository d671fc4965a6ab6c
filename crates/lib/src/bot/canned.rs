//! Offline backend: canned chat-speak after a short random delay.

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use rand::Rng;

use super::{BotError, ChatBot, Exchange};

const RESPONSES: &[&str] = &[
    "hi2u", "a/s/l?", "brb", "lol", "rofl", "ttyl", "omg", "g2g", "idk", "bbl",
];
const MAX_DELAY_MS: u64 = 1000;

/// Answers without any network access; used for testing against a local server.
#[derive(Debug, Clone, Default)]
pub struct CannedChatBot {
    delay: bool,
}

impl CannedChatBot {
    pub fn new() -> Self {
        Self { delay: true }
    }

    /// Same responses with no artificial delay.
    pub fn instant() -> Self {
        Self { delay: false }
    }
}

#[async_trait]
impl ChatBot for CannedChatBot {
    async fn exchange_message(&self, _send: &str, _last_exchange: &Exchange) -> Result<String, BotError> {
        if self.delay {
            let ms = rand::rng().random_range(0..MAX_DELAY_MS);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        let reply = RESPONSES.choose(&mut rand::rng()).copied().unwrap_or("lol");
        Ok(reply.to_string())
    }
}

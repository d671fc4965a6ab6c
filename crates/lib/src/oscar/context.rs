//! Per-correspondent conversation state.
//!
//! The store is owned by the receive loop, which alone inserts contexts. A context is shared with
//! response tasks through an `Arc`; its conversational fields are reachable only through a
//! [`ResponseGuard`], so at most one task reads or writes them at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use super::policy::{Admission, RateLimiter};
use crate::bot::Exchange;

#[derive(Debug, Default)]
struct Conversation {
    last_exchange: Exchange,
    warn_count: u32,
}

/// State kept for one screen name for the life of the session.
#[derive(Debug)]
pub struct ChatContext {
    /// Conversation cookie of the most recent inbound IM.
    cookie: AtomicU64,
    /// Single slot: held by whichever task is producing a response for this user.
    slot: Arc<Semaphore>,
    conversation: Mutex<Conversation>,
    limiter: Mutex<RateLimiter>,
}

impl ChatContext {
    pub fn new(cookie: u64, max_msg_per_min: u32) -> Self {
        Self {
            cookie: AtomicU64::new(cookie),
            slot: Arc::new(Semaphore::new(1)),
            conversation: Mutex::new(Conversation::default()),
            limiter: Mutex::new(RateLimiter::new(max_msg_per_min)),
        }
    }

    pub fn cookie(&self) -> u64 {
        self.cookie.load(Ordering::Acquire)
    }

    pub fn set_cookie(&self, cookie: u64) {
        self.cookie.store(cookie, Ordering::Release);
    }

    /// Take the response slot if it is free. `None` means a response is already in flight.
    pub fn try_lock(self: &Arc<Self>) -> Option<ResponseGuard> {
        let permit = Arc::clone(&self.slot).try_acquire_owned().ok()?;
        Some(ResponseGuard {
            ctx: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Wait for the response slot. `None` only if the slot has been closed.
    pub async fn lock(self: &Arc<Self>) -> Option<ResponseGuard> {
        let permit = Arc::clone(&self.slot).acquire_owned().await.ok()?;
        Some(ResponseGuard {
            ctx: Arc::clone(self),
            _permit: permit,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Count this message against the user's rate limit.
    pub async fn admit(&self) -> Admission {
        self.limiter.lock().await.check()
    }
}

/// Exclusive access to a context's conversation. Dropping the guard frees the slot.
#[derive(Debug)]
pub struct ResponseGuard {
    ctx: Arc<ChatContext>,
    _permit: OwnedSemaphorePermit,
}

impl ResponseGuard {
    pub async fn last_exchange(&self) -> Exchange {
        self.ctx.conversation.lock().await.last_exchange.clone()
    }

    pub async fn record_exchange(&self, received: String, sent: String) {
        self.ctx.conversation.lock().await.last_exchange = Exchange { received, sent };
    }

    /// Count another warning from this user; returns the new total.
    pub async fn add_warning(&self) -> u32 {
        let mut conv = self.ctx.conversation.lock().await;
        conv.warn_count += 1;
        conv.warn_count
    }

    pub async fn warn_count(&self) -> u32 {
        self.ctx.conversation.lock().await.warn_count
    }
}

/// Screen name → context. Single writer: the session's receive loop.
#[derive(Debug)]
pub struct ContextStore {
    contexts: HashMap<String, Arc<ChatContext>>,
    max_msg_per_min: u32,
}

impl ContextStore {
    pub fn new(max_msg_per_min: u32) -> Self {
        Self {
            contexts: HashMap::new(),
            max_msg_per_min,
        }
    }

    pub fn get_or_create(&mut self, screen_name: &str, cookie: u64) -> Arc<ChatContext> {
        let max = self.max_msg_per_min;
        Arc::clone(
            self.contexts
                .entry(screen_name.to_string())
                .or_insert_with(|| {
                    log::debug!("new chat context for {}", screen_name);
                    Arc::new(ChatContext::new(cookie, max))
                }),
        )
    }

    pub fn get(&self, screen_name: &str) -> Option<Arc<ChatContext>> {
        self.contexts.get(screen_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

//! OSCAR client: BUCP authentication and the BOS chat session.
//!
//! [`run`] does both in order: log in at the auth host, disconnect, then connect to the relay
//! host it named and chat until the session ends. There is no reconnect; a caller that wants
//! one starts over from authentication.

mod auth;
mod chat;
mod context;
mod outbound;
mod policy;

pub use auth::{authenticate, AuthError, Credentials};
pub use chat::{chat, ChatError, ChatLimits, Dispatcher, HEARTBEAT_INTERVAL, OUTBOUND_QUEUE_CAPACITY};
pub use context::{ChatContext, ContextStore, ResponseGuard};
pub use outbound::{
    retaliates, warning_prompt, wrap_html, Outbound, MESSAGE_TOO_LONG, TOO_MANY_MESSAGES,
};
pub use policy::{strip_html_tags, Admission, RateLimiter, SizeLimits, RATE_WINDOW};

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpStream;

use crate::bot::ChatBot;
use crate::config::{self, Config};
use crate::wire::FlapClient;

/// Relay hosts may come without a port; use the configured one then.
pub fn relay_addr(relay_host: &str, default_port: u16) -> String {
    let host = relay_host.trim();
    let has_port = match host.rsplit_once(':') {
        // bare IPv6 literal: more than one colon and no brackets
        Some((h, _)) if h.contains(':') && !h.ends_with(']') => false,
        Some((_, port)) => port.parse::<u16>().is_ok(),
        None => false,
    };
    if has_port {
        host.to_string()
    } else {
        config::join_host_port(host, default_port)
    }
}

/// Authenticate with the configured account and run the chat session to completion.
pub async fn run(config: &Config, bot: Arc<dyn ChatBot>) -> Result<()> {
    let screen_name = config.oscar.screen_name.trim();
    let password = config::resolve_password(config).context("no password configured")?;

    let auth_addr = config.oscar.auth_addr();
    let creds = {
        let stream = TcpStream::connect(&auth_addr)
            .await
            .with_context(|| format!("unable to dial into auth host {}", auth_addr))?;
        log::debug!("connected to auth service: host={}", auth_addr);
        let mut flapc = FlapClient::from_tcp(stream);
        let creds = authenticate(&mut flapc, screen_name, &password)
            .await
            .context("authentication failed")?;
        log::debug!("disconnected from auth service: host={}", auth_addr);
        creds
    };
    log::info!("authentication succeeded, proceeding to BOS host {}", creds.relay_host);

    let bos_addr = relay_addr(&creds.relay_host, config.oscar.port);
    let stream = TcpStream::connect(&bos_addr)
        .await
        .with_context(|| format!("unable to dial into BOS host {}", bos_addr))?;
    log::info!("connected to BOS server: host={}", bos_addr);

    chat(
        FlapClient::from_tcp(stream),
        creds.cookie,
        bot,
        ChatLimits::from(&config.limits),
    )
    .await
    .context("chat failed")
}

//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.buddybot/config.json`) and environment.
//! Secrets (account password, API key) may come from the environment instead of the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// OSCAR server and account settings.
    #[serde(default)]
    pub oscar: OscarConfig,

    /// Per-correspondent rate and size limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Reply backend settings.
    #[serde(default)]
    pub bot: BotConfig,

    /// Default log filter when RUST_LOG is unset: "debug", "info", "warn", or "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oscar: OscarConfig::default(),
            limits: LimitsConfig::default(),
            bot: BotConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Auth server address and bot account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OscarConfig {
    /// Auth server host (default "127.0.0.1").
    #[serde(default = "default_oscar_host")]
    pub host: String,

    /// Auth server port (default 5190). Also used for relay hosts that omit a port.
    #[serde(default = "default_oscar_port")]
    pub port: u16,

    /// The bot's screen name.
    #[serde(default = "default_screen_name")]
    pub screen_name: String,

    /// The bot's password. Overridden by BUDDYBOT_PASSWORD env.
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for OscarConfig {
    fn default() -> Self {
        Self {
            host: default_oscar_host(),
            port: default_oscar_port(),
            screen_name: default_screen_name(),
            password: None,
        }
    }
}

impl OscarConfig {
    /// `host:port` of the auth service.
    pub fn auth_addr(&self) -> String {
        join_host_port(self.host.trim(), self.port)
    }
}

/// Limits applied to each correspondent before a message reaches the bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    /// Messages a user may send per rolling minute before being told to slow down.
    #[serde(default = "default_max_msg_per_min")]
    pub max_msg_per_min: u32,

    /// Maximum number of words in one message.
    #[serde(default = "default_word_count_limit")]
    pub word_count_limit: usize,

    /// Maximum length of any single word.
    #[serde(default = "default_word_length_limit")]
    pub word_length_limit: usize,

    /// Give up on a bot reply after this many seconds. Unset waits indefinitely.
    #[serde(default)]
    pub reply_timeout_secs: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_msg_per_min: default_max_msg_per_min(),
            word_count_limit: default_word_count_limit(),
            word_length_limit: default_word_length_limit(),
            reply_timeout_secs: None,
        }
    }
}

/// Reply backend: canned offline responses or an OpenAI-compatible API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Serve canned responses instead of calling the API (default true).
    #[serde(default = "default_offline_mode")]
    pub offline_mode: bool,

    /// API key. Overridden by OPENAI_API_KEY env.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// System prompt sent at the start of every request.
    #[serde(default = "default_prompt")]
    pub prompt: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_top_p")]
    pub top_p: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            offline_mode: default_offline_mode(),
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            prompt: default_prompt(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_oscar_host() -> String {
    "127.0.0.1".to_string()
}

fn default_oscar_port() -> u16 {
    5190
}

fn default_screen_name() -> String {
    "smartersmarterchild".to_string()
}

fn default_max_msg_per_min() -> u32 {
    10
}

fn default_word_count_limit() -> usize {
    25
}

fn default_word_length_limit() -> usize {
    15
}

fn default_offline_mode() -> bool {
    true
}

fn default_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_prompt() -> String {
    "You are SmarterChild, a dumb AIM chatbot.".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.5
}

/// Join host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Trimmed env value if set and non-empty, otherwise the trimmed non-empty config value.
fn env_or(var: &str, fallback: Option<&String>) -> Option<String> {
    non_empty(std::env::var(var).ok().as_deref())
        .or_else(|| non_empty(fallback.map(String::as_str)))
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

/// Resolve the account password: env BUDDYBOT_PASSWORD overrides config.
pub fn resolve_password(config: &Config) -> Option<String> {
    env_or("BUDDYBOT_PASSWORD", config.oscar.password.as_ref())
}

/// Resolve the API key: env OPENAI_API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    env_or("OPENAI_API_KEY", config.bot.api_key.as_ref())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("BUDDYBOT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".buddybot").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Write the default config to `path` unless a file is already there. Returns true when written.
pub fn write_default_config(path: &std::path::Path) -> Result<bool> {
    if path.exists() {
        log::debug!("config already exists at {}, skipping", path.display());
        return Ok(false);
    }
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(&Config::default())?;
    std::fs::write(path, json)
        .with_context(|| format!("writing default config to {}", path.display()))?;
    log::info!("created default config at {}", path.display());
    Ok(true)
}

/// Check that the settings needed to go online are present.
pub fn validate_for_run(config: &Config) -> Result<()> {
    if config.oscar.screen_name.trim().is_empty() {
        anyhow::bail!("oscar.screenName must be set");
    }
    if resolve_password(config).is_none() {
        anyhow::bail!("no password configured; set oscar.password or BUDDYBOT_PASSWORD");
    }
    if !config.bot.offline_mode && resolve_api_key(config).is_none() {
        anyhow::bail!("online mode requires bot.apiKey or OPENAI_API_KEY");
    }
    Ok(())
}

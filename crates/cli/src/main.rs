use std::path::PathBuf;
use std::sync::Arc;

use buddybot::bot::{CannedChatBot, ChatBot, OpenAiChatBot};
use buddybot::config::{self, Config};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "buddybot")]
#[command(about = "BuddyBot: keep an AIM screen name online and let a bot answer its IMs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Write a default config file if none exists.
    Init {
        /// Config file path (default: BUDDYBOT_CONFIG_PATH or ~/.buddybot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Sign on and answer IMs until the server ends the session.
    Run {
        /// Config file path (default: BUDDYBOT_CONFIG_PATH or ~/.buddybot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Use canned replies instead of the chat-completions API, whatever the config says.
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            init_logging("warn");
            println!("buddybot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            init_logging("info");
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, offline }) => {
            let (mut cfg, path) = match config::load_config(config) {
                Ok(loaded) => loaded,
                Err(e) => {
                    init_logging("info");
                    log::error!("unable to load config: {:#}", e);
                    std::process::exit(1);
                }
            };
            init_logging(&cfg.log_level);
            log::debug!("loaded config from {}", path.display());
            if offline {
                cfg.bot.offline_mode = true;
            }
            if let Err(e) = run_bot(&cfg).await {
                log::error!("bot stopped: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

/// RUST_LOG, when set, wins over the configured level.
fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    if config::write_default_config(&path)? {
        println!("wrote default configuration to {}", path.display());
    } else {
        println!("configuration already exists at {}", path.display());
    }
    Ok(())
}

async fn run_bot(cfg: &Config) -> anyhow::Result<()> {
    config::validate_for_run(cfg)?;
    let bot = build_bot(cfg)?;
    log::info!(
        "starting bot: screen_name={} offline_mode={}",
        cfg.oscar.screen_name,
        cfg.bot.offline_mode
    );
    buddybot::oscar::run(cfg, bot).await
}

fn build_bot(cfg: &Config) -> anyhow::Result<Arc<dyn ChatBot>> {
    if cfg.bot.offline_mode {
        log::info!("offline mode: replying with canned responses");
        return Ok(Arc::new(CannedChatBot::new()));
    }
    let api_key = config::resolve_api_key(cfg)
        .ok_or_else(|| anyhow::anyhow!("online mode requires bot.apiKey or OPENAI_API_KEY"))?;
    log::info!("replying via {} ({})", cfg.bot.api_url, cfg.bot.model);
    Ok(Arc::new(OpenAiChatBot::new(&cfg.bot, api_key)))
}

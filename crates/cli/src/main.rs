use bridge::config::{load_config, resolve_discord_token, resolve_telegram_token, Config};
use bridge::platform::{DiscordDestination, TelegramSource};
use bridge::relay::Relay;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "tgcord")]
#[command(about = "Relay Telegram chats into Discord channels", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the relay until Ctrl+C or SIGTERM.
    Run {
        /// Config file path (default: TGCORD_CONFIG_PATH or ~/.tgcord/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Log at debug level (same as "debug": true in the config)
        #[arg(long)]
        debug: bool,
    },

    /// Load and validate the config, then print the bridge table.
    CheckConfig {
        /// Config file path (default: TGCORD_CONFIG_PATH or ~/.tgcord/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("tgcord {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run { config, debug }) => {
            let loaded = load_config(config);
            let debug = debug || loaded.as_ref().map(|(c, _)| c.debug).unwrap_or(false);
            init_logging(debug);
            let result = match loaded {
                Ok((config, path)) => run_relay(config, path).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                log::error!("relay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::CheckConfig { config }) => {
            init_logging(false);
            if let Err(e) = check_config(config) {
                log::error!("config check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn check_config(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, path) = load_config(config_path)?;
    config.validate()?;
    println!("config: {}", path.display());
    println!(
        "telegram token: {}",
        if resolve_telegram_token(&config).is_some() { "set" } else { "missing" }
    );
    println!(
        "discord token: {}",
        if resolve_discord_token(&config).is_some() { "set" } else { "missing" }
    );
    for bridge in &config.bridges {
        println!(
            "  {}: telegram {} -> discord {}{}",
            bridge.name,
            bridge.telegram_chat_id,
            bridge.discord_channel_id,
            if bridge.forward_sticker_emoji { " (sticker emoji)" } else { "" }
        );
    }
    Ok(())
}

async fn run_relay(config: Config, path: PathBuf) -> anyhow::Result<()> {
    config.validate()?;
    let Some(telegram_token) = resolve_telegram_token(&config) else {
        anyhow::bail!(
            "no Telegram bot token: set TELEGRAM_BOT_TOKEN or source.botToken in {}",
            path.display()
        );
    };
    let Some(discord_token) = resolve_discord_token(&config) else {
        anyhow::bail!(
            "no Discord bot token: set DISCORD_BOT_TOKEN or destination.botToken in {}",
            path.display()
        );
    };

    let source = Arc::new(TelegramSource::new(telegram_token));
    let destination = Arc::new(DiscordDestination::new(discord_token));
    let relay = Relay::new(&config, source, destination);

    log::info!(
        "starting relay with {} bridge(s) from {}",
        config.bridges.len(),
        path.display()
    );
    let cancel = CancellationToken::new();
    let poller = relay.start(cancel.clone()).await?;

    shutdown_signal().await;
    log::info!("shutdown signal received, stopping poller");
    cancel.cancel();
    if let Err(e) = poller.await {
        log::warn!("poller task ended abnormally: {}", e);
    }
    log::info!("relay stopped; {} message(s) mapped", relay.identities().len().await);
    Ok(())
}

/// Completes on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("installing Ctrl+C handler failed: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("installing SIGTERM handler failed: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

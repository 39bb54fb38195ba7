//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.tgcord/config.json`) and environment.
//! Bot tokens may come from the environment so the file can be committed without secrets.

use crate::relay::{BridgeContext, BridgeLookup};
use crate::router::DEFAULT_MAX_IN_FLIGHT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Raise the default log level to debug.
    #[serde(default)]
    pub debug: bool,

    /// Telegram (source) settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Discord (destination) settings.
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Handler concurrency.
    #[serde(default)]
    pub relay: RelayConfig,

    /// One entry per bridged Telegram chat.
    #[serde(default)]
    pub bridges: Vec<BridgeConfig>,
}

/// Telegram bot and polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,

    /// Long-poll timeout for getUpdates in seconds (default 60).
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Drop updates that accumulated while the relay was not running (default true).
    #[serde(default = "default_true")]
    pub skip_backlog: bool,

    /// Ceiling for the retry delay after failed polls, in seconds (default 60).
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

/// Discord bot settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationConfig {
    /// Bot token from the Discord developer portal. Overridden by DISCORD_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Maximum number of update handlers running at once (default 32).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

/// A bridge: one Telegram chat relayed into one Discord channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Label used in logs.
    pub name: String,
    pub telegram_chat_id: i64,
    pub discord_channel_id: String,
    /// Put the sticker's emoji in the caption of relayed stickers.
    #[serde(default)]
    pub forward_sticker_emoji: bool,
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_max_backoff_secs() -> u64 {
    60
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_true() -> bool {
    true
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            poll_timeout_secs: default_poll_timeout_secs(),
            skip_backlog: true,
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Non-empty trimmed value of an environment variable.
fn env_token(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn config_token(token: &Option<String>) -> Option<String> {
    token
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    env_token("TELEGRAM_BOT_TOKEN").or_else(|| config_token(&config.source.bot_token))
}

/// Resolve the Discord bot token: env DISCORD_BOT_TOKEN overrides config.
pub fn resolve_discord_token(config: &Config) -> Option<String> {
    env_token("DISCORD_BOT_TOKEN").or_else(|| config_token(&config.destination.bot_token))
}

impl Config {
    /// Check the bridge table. Tokens are checked separately because they may come from env.
    pub fn validate(&self) -> Result<()> {
        if self.source.poll_timeout_secs == 0 {
            anyhow::bail!("source.pollTimeoutSecs must be at least 1");
        }
        let mut seen = HashSet::new();
        for bridge in &self.bridges {
            if bridge.discord_channel_id.trim().is_empty() {
                anyhow::bail!("bridge \"{}\" has an empty discordChannelId", bridge.name);
            }
            if !seen.insert(bridge.telegram_chat_id) {
                anyhow::bail!(
                    "telegram chat {} is configured in more than one bridge",
                    bridge.telegram_chat_id
                );
            }
        }
        if self.bridges.is_empty() {
            log::warn!("no bridges configured; every chat will get the not-bridged reply");
        }
        Ok(())
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TGCORD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".tgcord").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (or TGCORD_CONFIG_PATH).
/// Missing file => default config. Returns the config and the path that was used.
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

/// Bridge table keyed by Telegram chat id, built from `Config::bridges`.
pub struct ConfigBridgeLookup {
    by_chat: HashMap<i64, BridgeContext>,
}

impl ConfigBridgeLookup {
    pub fn new(bridges: &[BridgeConfig]) -> Self {
        let by_chat = bridges
            .iter()
            .map(|b| {
                (
                    b.telegram_chat_id,
                    BridgeContext {
                        name: b.name.clone(),
                        channel_id: b.discord_channel_id.trim().to_string(),
                        forward_sticker_emoji: b.forward_sticker_emoji,
                    },
                )
            })
            .collect();
        Self { by_chat }
    }
}

impl BridgeLookup for ConfigBridgeLookup {
    fn bridge_for_chat(&self, chat_id: i64) -> Option<BridgeContext> {
        self.by_chat.get(&chat_id).cloned()
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::BackendEndpoint;
use crate::error::RelayError;

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    /// Directory holding the token files. Defaults to `~/.slack`.
    #[serde(default)]
    pub tokens_directory: Option<PathBuf>,
    #[serde(default = "default_bot_token_name")]
    pub bot_token_name: String,
    #[serde(default = "default_app_token_name")]
    pub app_token_name: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            tokens_directory: None,
            bot_token_name: default_bot_token_name(),
            app_token_name: default_app_token_name(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl SlackConfig {
    pub fn effective_tokens_directory(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.tokens_directory {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir().context("Cannot determine home directory for ~/.slack")?;
        Ok(home.join(".slack"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub team: String,
}

impl BackendConfig {
    pub fn endpoint(&self) -> BackendEndpoint {
        BackendEndpoint::new(&self.base_url, &self.team)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationConfig {
    /// Slack channel that backend notifications are posted into.
    pub channel: String,
    /// Externally reachable URL of our `/notification` route.
    pub url: String,
    pub listen_address: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub slack: SlackConfig,
    pub backend: BackendConfig,
    pub notification: NotificationConfig,
}

/// Loose on-disk shape; the notification values may also come from the environment.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    slack: SlackConfig,
    backend: BackendConfig,
    #[serde(default)]
    notification: RawNotificationConfig,
}

#[derive(Deserialize, Default)]
struct RawNotificationConfig {
    channel: Option<String>,
    url: Option<String>,
    listen_address: Option<String>,
}

fn default_bot_token_name() -> String {
    "niancat.token".to_string()
}

fn default_app_token_name() -> String {
    "niancat.app-token".to_string()
}

fn default_api_base_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:8000".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(path: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(Self::from_raw(raw, env)?)
    }

    fn from_raw<F>(raw: RawConfig, env: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let mut slack = raw.slack;
        if let Some(name) = non_empty(env("SLACK_BOT_TOKEN_NAME")) {
            slack.bot_token_name = name;
        }
        if let Some(name) = non_empty(env("SLACK_APP_TOKEN_NAME")) {
            slack.app_token_name = name;
        }

        if raw.backend.base_url.trim().is_empty() {
            return Err(RelayError::ConfigurationMissing("backend.base_url"));
        }
        if raw.backend.team.trim().is_empty() {
            return Err(RelayError::ConfigurationMissing("backend.team"));
        }

        let channel = non_empty(env("NOTIFICATION_CHANNEL"))
            .or_else(|| non_empty(raw.notification.channel))
            .ok_or(RelayError::ConfigurationMissing(
                "notification.channel (or NOTIFICATION_CHANNEL)",
            ))?;
        let url = non_empty(env("NOTIFICATION_URL"))
            .or_else(|| non_empty(raw.notification.url))
            .ok_or(RelayError::ConfigurationMissing(
                "notification.url (or NOTIFICATION_URL)",
            ))?;
        let listen_address = non_empty(raw.notification.listen_address)
            .unwrap_or_else(default_listen_address);

        Ok(Config {
            slack,
            backend: raw.backend,
            notification: NotificationConfig {
                channel,
                url,
                listen_address,
            },
        })
    }
}

/// The two Slack credentials: the bot token for the Web API and the
/// app-level token for socket mode.
#[derive(Clone)]
pub struct SlackTokens {
    pub bot: String,
    pub app: String,
}

impl std::fmt::Debug for SlackTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackTokens")
            .field("bot", &"<redacted>")
            .field("app", &"<redacted>")
            .finish()
    }
}

impl SlackTokens {
    pub fn load(config: &SlackConfig) -> Result<Self> {
        let dir = config.effective_tokens_directory()?;
        Ok(Self {
            bot: read_token(&dir, &config.bot_token_name)?,
            app: read_token(&dir, &config.app_token_name)?,
        })
    }
}

fn read_token(dir: &Path, name: &str) -> Result<String> {
    let path = dir.join(name);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read token file: {}", path.display()))?;
    let token = content.trim();
    if token.is_empty() {
        anyhow::bail!("Token file is empty: {}", path.display());
    }
    Ok(token.to_string())
}

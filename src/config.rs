//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::commands::parse_bool;
use crate::error::ConfigError;
use crate::restart::RestartConfig;
use crate::store::TenantId;

pub const DEFAULT_FEED_URL: &str = "https://rss.nodeseek.com/";

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Telegram bot token.
    pub bot_token: SecretString,
    /// Admin chat: controls the polling interval and receives restart notices.
    pub admin_chat: Option<TenantId>,
    /// Chats allowed to issue commands; `*` allows all.
    pub allowed_chats: Vec<String>,
    pub feed_url: String,
    /// Directory holding `config.json`, `notified.json` and logs.
    pub data_dir: PathBuf,
    pub fetch_timeout: Duration,
    pub send_timeout: Duration,
    pub announce_restart: bool,
    pub restart: RestartConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bot_token = get("TG_BOT_TOKEN")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("TG_BOT_TOKEN".into()))?;

        let admin_chat = get("TG_CHAT_ID").map(TenantId::from);

        let allowed_chats = get("FEEDWATCH_ALLOWED_CHATS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["*".to_string()]);

        let feed_url = get("FEEDWATCH_FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string());

        let data_dir = get("FEEDWATCH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let fetch_timeout = secs(get("FEEDWATCH_FETCH_TIMEOUT_SECS"), "FEEDWATCH_FETCH_TIMEOUT_SECS", 30)?;
        let send_timeout = secs(get("FEEDWATCH_SEND_TIMEOUT_SECS"), "FEEDWATCH_SEND_TIMEOUT_SECS", 10)?;

        let announce_restart = match get("FEEDWATCH_ANNOUNCE_RESTART") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "FEEDWATCH_ANNOUNCE_RESTART".into(),
                message: format!("'{raw}' is not a boolean"),
            })?,
            None => true,
        };

        Ok(Self {
            bot_token,
            admin_chat,
            allowed_chats,
            feed_url,
            data_dir,
            fetch_timeout,
            send_timeout,
            announce_restart,
            restart: RestartConfig::default(),
        })
    }

    pub fn tenants_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn notified_path(&self) -> PathBuf {
        self.data_dir.join("notified.json")
    }
}

fn default_data_dir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("./data")
    } else {
        PathBuf::from("/data")
    }
}

fn secs(raw: Option<String>, key: &str, default: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Duration::from_secs(default));
    };
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
        _ => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("'{raw}' is not a positive number of seconds"),
        }),
    }
}

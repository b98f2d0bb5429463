use chrono::{FixedOffset, Local, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub calendar: CalendarConfig,
    pub reminders: ReminderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Root of the REST API, without a trailing slash.
    pub base_url: String,
    pub oauth_provider: String,
    /// Navigations starting with this prefix carry the OAuth `code`.
    pub callback_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub session_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarConfig {
    /// Offset used to decide which calendar day an instant belongs to.
    pub utc_offset_minutes: i32,
    pub default_reminder_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReminderConfig {
    /// When false, every alarm registration is refused as if permission were denied.
    pub exact_alarms: bool,
    /// How often `watch` re-reads events to pick up changes from other commands.
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
}

fn default_poll_seconds() -> u64 {
    30
}

impl CalendarConfig {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    pub fn load_or_create() -> Result<Self, ConfigError> {
        Self::load_or_create_at(&Self::config_path())
    }

    pub fn load_or_create_at(config_path: &Path) -> Result<Self, ConfigError> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            Self::from_toml(&content)
        } else {
            let config = Self::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ralendar")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn save_to(&self, config_path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = Self::config_dir();
        let data_dir = dirs::data_dir()
            .map(|d| d.join("ralendar"))
            .unwrap_or_else(|| config_dir.clone());

        Self {
            server: ServerConfig {
                base_url: "http://localhost:8000/api".to_string(),
                oauth_provider: "qq".to_string(),
                callback_prefix: "http://localhost:8000/qq/callback".to_string(),
            },
            storage: StorageConfig {
                database_path: data_dir.join("events.db"),
                session_path: config_dir.join("session.json"),
            },
            calendar: CalendarConfig {
                utc_offset_minutes: Local::now().offset().local_minus_utc() / 60,
                default_reminder_minutes: 15,
            },
            reminders: ReminderConfig {
                exact_alarms: true,
                poll_seconds: default_poll_seconds(),
            },
        }
    }
}

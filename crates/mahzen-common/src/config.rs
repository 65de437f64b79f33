use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = ".mahzen/config.toml";
const PREFERENCES_FILE: &str = "preferences.json";
const HISTORY_DB_FILE: &str = "history.db";
const LOG_FILE: &str = "bot.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MahzenConfig {
    pub data_dir: PathBuf,
    pub log_level: String,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: Option<String>,
    #[serde(default)]
    pub bot_username: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            bot_username: String::new(),
            api_base: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default = "default_model_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: "models/gemini-2.0-flash".to_string(),
            endpoint: Some("https://generativelanguage.googleapis.com".to_string()),
            api_key_env: Some("GEMINI_API_KEY".to_string()),
            timeout_ms: default_model_timeout_ms(),
        }
    }
}

/// Who may talk to the bot and how long its replies may be.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Empty means every group is accepted.
    #[serde(default)]
    pub allowed_groups: Vec<i64>,
    #[serde(default)]
    pub admin_user_ids: Vec<i64>,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            allowed_groups: Vec::new(),
            admin_user_ids: Vec::new(),
            max_message_length: default_max_message_length(),
        }
    }
}

impl ChatConfig {
    pub fn is_group_allowed(&self, chat_id: i64) -> bool {
        self.allowed_groups.is_empty() || self.allowed_groups.contains(&chat_id)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_private_messages")]
    pub max_private_messages: usize,
    #[serde(default = "default_max_group_messages")]
    pub max_group_messages: usize,
    #[serde(default = "default_prompt_history")]
    pub prompt_history: usize,
    #[serde(default = "default_summary_window_hours")]
    pub summary_window_hours: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_private_messages: default_max_private_messages(),
            max_group_messages: default_max_group_messages(),
            prompt_history: default_prompt_history(),
            summary_window_hours: default_summary_window_hours(),
        }
    }
}

impl Default for MahzenConfig {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mahzen-data");

        Self {
            data_dir,
            log_level: "info".to_string(),
            telegram: TelegramConfig::default(),
            model: ModelConfig::default(),
            chat: ChatConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_model_timeout_ms() -> u64 {
    60_000
}

fn default_max_message_length() -> usize {
    4000
}

fn default_max_private_messages() -> usize {
    20
}

fn default_max_group_messages() -> usize {
    50
}

fn default_prompt_history() -> usize {
    6
}

fn default_summary_window_hours() -> u32 {
    24
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize default config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("config has invalid value: {0}")]
    ValidationFailed(String),
}

impl MahzenConfig {
    pub fn resolve_path() -> PathBuf {
        if let Ok(path) = env::var("MAHZEN_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, raw).map_err(|source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn load_or_create() -> Result<(Self, PathBuf, bool), ConfigError> {
        let path = Self::resolve_path();
        Self::load_or_create_at(&path).map(|(cfg, created)| (cfg, path, created))
    }

    pub fn load_or_create_at(path: &Path) -> Result<(Self, bool), ConfigError> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }

        let cfg = Self::default();
        cfg.save(path)?;
        Ok((cfg, true))
    }

    pub fn validate_and_prepare(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "log_level cannot be empty".to_string(),
            ));
        }
        if self.model.model_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model.model_id cannot be empty".to_string(),
            ));
        }
        if let Some(endpoint) = &self.model.endpoint
            && endpoint.trim().is_empty()
        {
            return Err(ConfigError::ValidationFailed(
                "model.endpoint cannot be empty if set".to_string(),
            ));
        }
        if self.chat.max_message_length < 4 {
            return Err(ConfigError::ValidationFailed(
                "chat.max_message_length must be at least 4".to_string(),
            ));
        }
        if self.memory.max_private_messages == 0 || self.memory.max_group_messages == 0 {
            return Err(ConfigError::ValidationFailed(
                "memory message limits must be positive".to_string(),
            ));
        }
        fs::create_dir_all(&self.data_dir).map_err(|source| ConfigError::WriteFailed {
            path: self.data_dir.clone(),
            source,
        })?;
        Ok(())
    }

    /// Bot token from `TELEGRAM_BOT_TOKEN`, falling back to the config file.
    pub fn telegram_token(&self) -> Option<String> {
        env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.telegram.token.clone())
            .filter(|value| !value.trim().is_empty())
    }

    pub fn model_api_key(&self) -> Option<String> {
        self.model
            .api_key_env
            .as_deref()
            .and_then(|name| env::var(name).ok())
            .filter(|value| !value.trim().is_empty())
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join(PREFERENCES_FILE)
    }

    pub fn history_db_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_DB_FILE)
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }
}

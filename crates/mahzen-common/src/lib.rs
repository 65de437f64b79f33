pub mod config;
pub mod logging;

pub const APP_NAME: &str = "mahzen";

pub use config::{ChatConfig, ConfigError, MahzenConfig, MemoryConfig, ModelConfig, TelegramConfig};

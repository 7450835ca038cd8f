//! Bot configuration
//!
//! Static settings are read once at startup from a YAML file. The bot token
//! is taken from the environment so it never has to live next to the rules.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::UserId;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable overriding the configuration file path
pub const CONFIG_PATH_ENV: &str = "CHAT_WARDEN_CONFIG";
/// Environment variable holding the Telegram bot token
pub const TOKEN_ENV: &str = "TELEGRAM_TOKEN";

/// Errors that abort startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Settings for a single moderated chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot token, only used when `TELEGRAM_TOKEN` is not set
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    /// The moderated group chat
    #[serde(default)]
    pub main_chat_id: i64,
    /// Rules posted by `/rules` (HTML)
    #[serde(default)]
    pub chat_rules: String,
    /// Terms whose presence gets a message deleted
    #[serde(default)]
    pub bad_words: Vec<String>,
    /// Users allowed to run moderation commands from the chat
    #[serde(default)]
    pub admin_user_ids: Vec<UserId>,
    /// Warnings that trigger an automatic mute
    #[serde(default = "default_warn_count")]
    pub auto_mute_warn_count: u32,
    /// Length of the automatic mute
    #[serde(default = "default_auto_mute_minutes")]
    pub auto_mute_duration_minutes: i64,
    /// Where warnings and mutes are persisted
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Post a chat confirmation for control-channel actions and auto-mutes
    #[serde(default)]
    pub send_confirmations_to_chat: bool,
    /// Seconds between expiry sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_warn_count() -> u32 {
    3
}

fn default_auto_mute_minutes() -> i64 {
    60
}

fn default_data_file() -> PathBuf {
    PathBuf::from("bot_data.json")
}

fn default_sweep_interval() -> u64 {
    30 * 60
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            main_chat_id: 0,
            chat_rules: String::new(),
            bad_words: Vec::new(),
            admin_user_ids: Vec::new(),
            auto_mute_warn_count: default_warn_count(),
            auto_mute_duration_minutes: default_auto_mute_minutes(),
            data_file: default_data_file(),
            send_confirmations_to_chat: false,
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl BotConfig {
    /// Load the configuration from the path in `CHAT_WARDEN_CONFIG`, or
    /// `config.yaml` when unset.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        Self::from_file(&path)
    }

    /// Load and validate the configuration from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values a running bot cannot do without
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.main_chat_id == 0 {
            return Err(ConfigError::Missing("main_chat_id"));
        }
        if self.auto_mute_warn_count == 0 {
            return Err(ConfigError::Invalid {
                field: "auto_mute_warn_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.auto_mute_duration_minutes < 0 {
            return Err(ConfigError::Invalid {
                field: "auto_mute_duration_minutes",
                reason: format!("{} is negative", self.auto_mute_duration_minutes),
            });
        }
        if self.sweep_interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval_seconds",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the bot token, preferring the environment
    ///
    /// # Errors
    /// Returns an error if neither source provides a token.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .or_else(|| self.token.clone().filter(|token| !token.trim().is_empty()))
            .ok_or(ConfigError::Missing(TOKEN_ENV))
    }

    #[must_use]
    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: BotConfig = serde_yaml::from_str("main_chat_id: -100123").unwrap();
        assert_eq!(config.main_chat_id, -100_123);
        assert_eq!(config.auto_mute_warn_count, 3);
        assert_eq!(config.auto_mute_duration_minutes, 60);
        assert_eq!(config.data_file, PathBuf::from("bot_data.json"));
        assert_eq!(config.sweep_interval_seconds, 1800);
        assert!(!config.send_confirmations_to_chat);
        assert!(config.bad_words.is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "main_chat_id: -1001\nbad_words: [spam, scam]\nadmin_user_ids: [42]\nauto_mute_warn_count: 2\nsend_confirmations_to_chat: true"
        )
        .unwrap();

        let config = BotConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bad_words, vec!["spam", "scam"]);
        assert!(config.is_admin(42));
        assert!(!config.is_admin(7));
        assert_eq!(config.auto_mute_warn_count, 2);
        assert!(config.send_confirmations_to_chat);
    }

    #[test]
    fn test_missing_chat_id_is_rejected() {
        let config: BotConfig = serde_yaml::from_str("bad_words: []").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("main_chat_id"))
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = BotConfig {
            main_chat_id: 1,
            auto_mute_warn_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "auto_mute_warn_count",
                ..
            })
        ));

        let config = BotConfig {
            main_chat_id: 1,
            auto_mute_duration_minutes: -1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unreadable_file() {
        let err = BotConfig::from_file(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

pub mod commands;
pub mod config;
pub mod control;
pub mod data;
pub mod handlers;
pub mod logging;
pub mod moderation;
pub mod telegram;

// Logical sources for the log stream
pub const BOT_NAME: &str = "chat_warden";
pub const COMMAND_TARGET: &str = "chat_warden::command";
pub const CONTROL_TARGET: &str = "chat_warden::control";
pub const SWEEP_TARGET: &str = "chat_warden::sweep";
pub const FILTER_TARGET: &str = "chat_warden::filter";
pub const ERROR_TARGET: &str = "chat_warden::error";
pub const EVENT_TARGET: &str = "chat_warden::handlers";
pub const CONSOLE_TARGET: &str = "chat_warden";

pub use config::BotConfig;
pub use data::{MuteIssuer, MuteRecord, PersistedState, StateStore, UserId};
pub use moderation::{ChatPlatform, ModerationContext, ModerationError};
pub type Error = Box<dyn std::error::Error + Send + Sync>;

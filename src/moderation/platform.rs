//! Platform actions
//!
//! The moderation core only ever talks to the chat platform through this
//! trait. The production implementation lives in [`crate::telegram`].

use chrono::{DateTime, Utc};
use derive_more::Display;
use teloxide::utils::html;
use thiserror::Error;

use crate::data::UserId;

/// Errors reported by the chat platform
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform refused the request (missing rights, unknown user, ...)
    #[error("Platform API error: {0}")]
    Api(String),

    /// The request did not reach the platform
    #[error("Platform request failed: {0}")]
    Network(String),
}

/// Result type for platform actions
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Permission sets the bot applies to members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MemberPermissions {
    /// Cannot send anything
    #[display("muted")]
    Muted,
    /// Text, media, other messages and link previews
    #[display("default")]
    Default,
}

/// Capability to act on the moderated chat
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a message, optionally with HTML formatting
    async fn send_message(&self, chat_id: i64, text: String, html: bool) -> PlatformResult<()>;

    /// Delete a single message
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> PlatformResult<()>;

    /// Change a member's permissions; `until` of `None` means no expiry
    async fn restrict_member(
        &self,
        chat_id: i64,
        user_id: UserId,
        permissions: MemberPermissions,
        until: Option<DateTime<Utc>>,
    ) -> PlatformResult<()>;

    /// Ban a member from the chat
    async fn ban_member(&self, chat_id: i64, user_id: UserId) -> PlatformResult<()>;

    /// Lift a ban
    async fn unban_member(&self, chat_id: i64, user_id: UserId) -> PlatformResult<()>;
}

/// Link to a user that Telegram renders as a mention
#[must_use]
pub fn mention(user_id: UserId, name: &str) -> String {
    html::user_mention(teloxide::types::UserId(user_id), &html::escape(name))
}

/// Escape text for HTML parse mode
#[must_use]
pub fn escape_html(text: &str) -> String {
    html::escape(text)
}

//! Moderation core
//!
//! Warning escalation, mutes and their expiry, bans and the content filter.
//! Everything here talks to the chat through [`ChatPlatform`] and to the
//! persisted state through [`ModerationContext`].

mod engine;
mod error;
mod filter;
mod platform;
mod sweeper;

pub use engine::{AUTO_MUTE_REASON, ModerationContext, SweepReport, WarnOutcome};
pub use error::{ModerationError, ModerationResult};
pub use filter::{ContentFilter, FilterVerdict};
pub use platform::{
    ChatPlatform, MemberPermissions, PlatformError, PlatformResult, escape_html, mention,
};
pub use sweeper::{ExpirySweeper, SweepRequest};

#[cfg(test)]
pub use platform::MockChatPlatform;

use crate::data::UserId;

/// A chat member as seen on an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUser {
    pub id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl ChatUser {
    /// First and last name joined, without stray whitespace
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last_name) => format!("{} {last_name}", self.first_name)
                .trim()
                .to_string(),
            None => self.first_name.trim().to_string(),
        }
    }
}

/// A text message received from the platform
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub chat_title: Option<String>,
    /// Group or supergroup
    pub is_group: bool,
    pub message_id: i32,
    pub author: ChatUser,
    pub text: String,
    /// Author of the message this one replies to
    pub reply_to: Option<ChatUser>,
}

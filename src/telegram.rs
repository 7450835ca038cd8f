//! Telegram Bot API implementation of [`ChatPlatform`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::RequestError;
use teloxide::payloads::{RestrictChatMemberSetters, SendMessageSetters, UnbanChatMemberSetters};
use teloxide::prelude::*;
use teloxide::types::{ChatId, ChatPermissions, MessageId, ParseMode, UserId};

use crate::data::UserId as MemberId;
use crate::moderation::{ChatPlatform, MemberPermissions, PlatformError, PlatformResult};

/// [`ChatPlatform`] backed by a teloxide [`Bot`]
#[derive(Debug, Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Bot API permission set for a [`MemberPermissions`] value
#[must_use]
pub fn chat_permissions(permissions: MemberPermissions) -> ChatPermissions {
    match permissions {
        MemberPermissions::Muted => ChatPermissions::empty(),
        MemberPermissions::Default => {
            ChatPermissions::SEND_MESSAGES
                | ChatPermissions::SEND_AUDIOS
                | ChatPermissions::SEND_DOCUMENTS
                | ChatPermissions::SEND_PHOTOS
                | ChatPermissions::SEND_VIDEOS
                | ChatPermissions::SEND_VIDEO_NOTES
                | ChatPermissions::SEND_VOICE_NOTES
                | ChatPermissions::SEND_OTHER_MESSAGES
                | ChatPermissions::ADD_WEB_PAGE_PREVIEWS
        }
    }
}

impl From<RequestError> for PlatformError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Network(_) | RequestError::Io(_) => Self::Network(e.to_string()),
            other => Self::Api(other.to_string()),
        }
    }
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    async fn send_message(&self, chat_id: i64, text: String, html: bool) -> PlatformResult<()> {
        let request = self.bot.send_message(ChatId(chat_id), text);
        if html {
            request.parse_mode(ParseMode::Html).await?;
        } else {
            request.await?;
        }
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> PlatformResult<()> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await?;
        Ok(())
    }

    async fn restrict_member(
        &self,
        chat_id: i64,
        user_id: MemberId,
        permissions: MemberPermissions,
        until: Option<DateTime<Utc>>,
    ) -> PlatformResult<()> {
        let request = self.bot.restrict_chat_member(
            ChatId(chat_id),
            UserId(user_id),
            chat_permissions(permissions),
        );
        match until {
            Some(until) => request.until_date(until).await?,
            None => request.await?,
        };
        Ok(())
    }

    async fn ban_member(&self, chat_id: i64, user_id: MemberId) -> PlatformResult<()> {
        self.bot
            .ban_chat_member(ChatId(chat_id), UserId(user_id))
            .await?;
        Ok(())
    }

    async fn unban_member(&self, chat_id: i64, user_id: MemberId) -> PlatformResult<()> {
        // Without only_if_banned the API kicks members who are not banned
        self.bot
            .unban_chat_member(ChatId(chat_id), UserId(user_id))
            .only_if_banned(true)
            .await?;
        Ok(())
    }
}

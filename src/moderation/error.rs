//! Error types for moderation operations

use thiserror::Error;

use super::platform::PlatformError;
use crate::data::UserId;

/// Errors that can occur during moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    /// Negative mute length
    #[error("Invalid mute duration: {0} minutes")]
    InvalidDuration(i64),

    /// The platform rejected the action; nothing was persisted
    #[error("Failed to {action} user {user_id}: {source}")]
    Platform {
        action: &'static str,
        user_id: UserId,
        #[source]
        source: PlatformError,
    },
}

impl ModerationError {
    pub(crate) fn platform(action: &'static str, user_id: UserId, source: PlatformError) -> Self {
        Self::Platform {
            action,
            user_id,
            source,
        }
    }
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;

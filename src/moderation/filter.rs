//! Disallowed-term filter for group messages

use tracing::{error, info};

use super::InboundMessage;
use super::engine::ModerationContext;
use super::platform::mention;
use crate::FILTER_TARGET;

/// Outcome of filtering one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Not a group message
    Skipped,
    /// No disallowed term found
    Clean,
    /// The message was deleted and the author notified
    Removed { term: String },
    /// A term matched but the message could not be deleted
    RemovalFailed { term: String },
}

/// Case-insensitive substring filter
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    terms: Vec<String>,
}

impl ContentFilter {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|term| term.as_ref().trim().to_lowercase())
            .filter(|term| !term.is_empty())
            .collect();
        Self { terms }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// First configured term contained in `text`
    #[must_use]
    pub fn find_match(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.terms
            .iter()
            .find(|term| text.contains(term.as_str()))
            .map(String::as_str)
    }

    /// Delete a group message containing a disallowed term and post a notice
    ///
    /// Only the first matching term is acted on. Deletion failures are
    /// logged and not retried.
    pub async fn check(&self, ctx: &ModerationContext, msg: &InboundMessage) -> FilterVerdict {
        if !msg.is_group {
            return FilterVerdict::Skipped;
        }
        let Some(term) = self.find_match(&msg.text) else {
            return FilterVerdict::Clean;
        };
        let term = term.to_string();

        if let Err(e) = ctx
            .platform()
            .delete_message(msg.chat_id, msg.message_id)
            .await
        {
            error!(
                target: FILTER_TARGET,
                chat_id = msg.chat_id,
                message_id = msg.message_id,
                user_id = msg.author.id,
                error = %e,
                "Failed to delete message, the bot may lack admin rights"
            );
            return FilterVerdict::RemovalFailed { term };
        }

        info!(
            target: FILTER_TARGET,
            chat_id = msg.chat_id,
            user_id = msg.author.id,
            term = %term,
            "Deleted message containing a disallowed term"
        );

        let notice = format!(
            "{}, your message was removed for breaking the chat rules (a disallowed word was detected).",
            mention(msg.author.id, &msg.author.first_name)
        );
        if let Err(e) = ctx.platform().send_message(msg.chat_id, notice, true).await {
            error!(
                target: FILTER_TARGET,
                chat_id = msg.chat_id,
                error = %e,
                "Failed to send removal notice"
            );
        }

        FilterVerdict::Removed { term }
    }
}

use std::fmt::Display;
use std::time::Duration;

use teloxide::dispatching::{HandlerExt, ShutdownToken, UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::User;
use tracing::debug;

use crate::commands::{self, Command};
use crate::logging;
use crate::moderation::{
    ChatUser, ContentFilter, FilterVerdict, InboundMessage, ModerationContext,
};
use crate::{EVENT_TARGET, Error};

/// Delay between shutdown attempts while the dispatcher is still starting
const SHUTDOWN_RETRY: Duration = Duration::from_millis(100);

/// Update handling tree
///
/// Every text message is logged. Recognised commands are executed, all other
/// text goes through the content filter. Commands from non-administrators are
/// filtered too and dropped when the message gets removed.
pub fn schema() -> UpdateHandler<Error> {
    Update::filter_message()
        .filter_map(|msg: Message| {
            let inbound = to_inbound(&msg)?;
            logging::log_inbound(&inbound);
            Some(inbound)
        })
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::endpoint(handle_text))
}

async fn handle_command(
    ctx: ModerationContext,
    filter: ContentFilter,
    msg: InboundMessage,
    command: Command,
) -> Result<(), Error> {
    if !ctx.config().is_admin(msg.author.id)
        && matches!(filter.check(&ctx, &msg).await, FilterVerdict::Removed { .. })
    {
        return Ok(());
    }
    commands::execute(&ctx, &msg, command).await;
    Ok(())
}

async fn handle_text(
    ctx: ModerationContext,
    filter: ContentFilter,
    msg: InboundMessage,
) -> Result<(), Error> {
    filter.check(&ctx, &msg).await;
    Ok(())
}

fn chat_user(user: &User) -> ChatUser {
    ChatUser {
        id: user.id.0,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
    }
}

/// Platform-neutral view of a text message; `None` for anything else
pub fn to_inbound(msg: &Message) -> Option<InboundMessage> {
    let text = msg.text()?;
    let author = msg.from.as_ref()?;

    Some(InboundMessage {
        chat_id: msg.chat.id.0,
        chat_title: msg.chat.title().map(str::to_string),
        is_group: msg.chat.is_group() || msg.chat.is_supergroup(),
        message_id: msg.id.0,
        author: chat_user(author),
        text: text.to_string(),
        reply_to: msg
            .reply_to_message()
            .and_then(|reply| reply.from.as_ref())
            .map(chat_user),
    })
}

/// Stop the dispatcher, waiting for it to start first if needed
pub async fn stop_dispatcher(token: ShutdownToken) {
    stop_when_running(|| token.shutdown()).await;
}

async fn stop_when_running<F, Fut, E>(mut shutdown: F)
where
    F: FnMut() -> Result<Fut, E>,
    Fut: Future<Output = ()>,
    E: Display,
{
    loop {
        match shutdown() {
            Ok(stopped) => return stopped.await,
            Err(e) => {
                debug!(
                    target: EVENT_TARGET,
                    error = %e,
                    "Dispatcher not running yet, retrying shutdown"
                );
                tokio::time::sleep(SHUTDOWN_RETRY).await;
            }
        }
    }
}

use teloxide::utils::command::BotCommands;

use crate::control::{DEFAULT_MUTE_MINUTES, NO_REASON};
use crate::data::{MuteIssuer, UserId};
use crate::logging;
use crate::moderation::{ChatUser, InboundMessage, ModerationContext, escape_html, mention};

/// Commands available in the chat
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "show the greeting")]
    Start,
    #[command(description = "show the chat rules")]
    Rules,
    #[command(description = "warn the author of the replied message")]
    Warn,
    #[command(description = "mute the author of the replied message: /mute [minutes] [reason]")]
    Mute(String),
    #[command(description = "unmute the author of the replied message")]
    Unmute,
    #[command(description = "ban the author of the replied message: /ban [reason]")]
    Ban(String),
    #[command(description = "unban a user by id: /unban <user_id>")]
    Unban(String),
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Rules => "rules",
            Self::Warn => "warn",
            Self::Mute(_) => "mute",
            Self::Unmute => "unmute",
            Self::Ban(_) => "ban",
            Self::Unban(_) => "unban",
        }
    }
}

pub const GREETING: &str =
    "Hello! I'm the moderator bot of this chat. Use /rules to read the chat rules.";
pub const NO_RULES: &str = "No rules have been set for this chat yet.";
pub const PERMISSION_DENIED: &str = "You don't have permission to use this command.";
pub const WRONG_CHAT: &str = "Moderation commands only work in the moderated chat.";
pub const COMMAND_FAILED: &str =
    "Something went wrong while running the command. The bot may lack the rights to do this.";

/// Reply sent when a command is used without its required input
fn usage(command: &Command) -> &'static str {
    match command {
        Command::Warn => "Reply to a user's message with /warn.",
        Command::Mute(_) => "Reply to a user's message with /mute [minutes] [reason].",
        Command::Unmute => "Reply to a user's message with /unmute.",
        Command::Ban(_) => "Reply to a user's message with /ban [reason].",
        Command::Unban(_) => "Usage: /unban <user_id>",
        Command::Start | Command::Rules => "",
    }
}

/// Minutes and reason of a chat `/mute`; `None` when minutes are not a number
fn parse_mute_args(args: &str) -> Option<(i64, String)> {
    let args = args.trim();
    let (minutes, reason) = match args.split_once(char::is_whitespace) {
        Some((minutes, reason)) => (minutes, reason.trim()),
        None => (args, ""),
    };
    let minutes = if minutes.is_empty() {
        DEFAULT_MUTE_MINUTES
    } else {
        minutes.parse().ok()?
    };
    Some((minutes, reason_or_default(reason)))
}

fn reason_or_default(reason: &str) -> String {
    let reason = reason.trim();
    if reason.is_empty() {
        NO_REASON.to_string()
    } else {
        reason.to_string()
    }
}

fn parse_user_id(arg: &str) -> Option<UserId> {
    arg.trim().parse().ok().filter(|id| *id > 0)
}

async fn reply(ctx: &ModerationContext, msg: &InboundMessage, text: impl Into<String>, html: bool) {
    if let Err(e) = ctx
        .platform()
        .send_message(msg.chat_id, text.into(), html)
        .await
    {
        logging::log_command_error("reply", msg, &e);
    }
}

/// Run a chat command. Failures are answered in the chat and logged.
pub async fn execute(ctx: &ModerationContext, msg: &InboundMessage, command: Command) {
    let name = command.name();
    let started = logging::log_command_start(name, msg);

    match command {
        Command::Start => reply(ctx, msg, GREETING, false).await,
        Command::Rules => {
            let rules = &ctx.config().chat_rules;
            if rules.trim().is_empty() {
                reply(ctx, msg, NO_RULES, false).await;
            } else {
                reply(ctx, msg, rules.clone(), true).await;
            }
        }
        command => {
            if !ctx.config().is_admin(msg.author.id) {
                reply(ctx, msg, PERMISSION_DENIED, false).await;
            } else if msg.chat_id != ctx.chat_id() {
                reply(ctx, msg, WRONG_CHAT, false).await;
            } else {
                moderate(ctx, msg, command).await;
            }
        }
    }

    logging::log_command_end(name, msg, started);
}

async fn moderate(ctx: &ModerationContext, msg: &InboundMessage, command: Command) {
    let name = command.name();

    if let Command::Unban(arg) = &command {
        let Some(user_id) = parse_user_id(arg) else {
            reply(ctx, msg, usage(&command), false).await;
            return;
        };
        match ctx.unban(user_id).await {
            Ok(()) => {
                let text = format!(
                    "User {} has been unbanned.",
                    mention(user_id, &user_id.to_string())
                );
                reply(ctx, msg, text, true).await;
            }
            Err(e) => {
                logging::log_command_error(name, msg, &e);
                reply(ctx, msg, COMMAND_FAILED, false).await;
            }
        }
        return;
    }

    let Some(target) = msg.reply_to.as_ref() else {
        reply(ctx, msg, usage(&command), false).await;
        return;
    };

    let result = match command {
        Command::Warn => {
            let outcome = ctx.warn(target.id, msg.author.id).await;
            Ok(format!(
                "{}, you have received a warning ({}/{}).",
                target_mention(target),
                outcome.count,
                outcome.threshold
            ))
        }
        Command::Mute(args) => {
            let Some((minutes, reason)) = parse_mute_args(&args) else {
                reply(ctx, msg, usage(&Command::Mute(args)), false).await;
                return;
            };
            ctx.mute(target.id, minutes, &reason, MuteIssuer::Admin(msg.chat_id))
                .await
                .map(|record| {
                    let length = if record.is_indefinite() {
                        "indefinitely".to_string()
                    } else {
                        format!("for {minutes} minutes")
                    };
                    format!(
                        "{} has been muted {length}. Reason: {}",
                        target_mention(target),
                        escape_html(&reason)
                    )
                })
        }
        Command::Unmute => ctx
            .unmute(target.id)
            .await
            .map(|_| format!("{} has been unmuted.", target_mention(target))),
        Command::Ban(reason) => {
            let reason = reason_or_default(&reason);
            ctx.ban(target.id, &reason).await.map(|()| {
                format!(
                    "{} has been banned. Reason: {}",
                    target_mention(target),
                    escape_html(&reason)
                )
            })
        }
        Command::Start | Command::Rules | Command::Unban(_) => return,
    };

    match result {
        Ok(text) => reply(ctx, msg, text, true).await,
        Err(e) => {
            logging::log_command_error(name, msg, &e);
            reply(ctx, msg, COMMAND_FAILED, false).await;
        }
    }
}

fn target_mention(user: &ChatUser) -> String {
    mention(user.id, &user.first_name)
}

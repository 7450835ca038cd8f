//! Control channel
//!
//! The desktop control panel writes administrative command lines to the bot
//! process's standard input. Lines are queued in order and consumed by a
//! single task, which parses each one, applies the fallback defaults and
//! runs it against the moderation engine. Results only ever reach the log;
//! nothing is answered back to the sender.
//!
//! Grammar: `<verb> <target>? <minutes>? <reason>?`
//!
//! | verb                          | arguments                     |
//! |-------------------------------|-------------------------------|
//! | `/ban_id`                     | `<user_id> [reason]`          |
//! | `/mute`                       | `<user_id> [minutes] [reason]`|
//! | `/unban_id`                   | `<user_id>`                   |
//! | `/unmute`                     | `<user_id>`                   |
//! | `/send_message_to_main_chat`  | `<text>`                      |
//!
//! The literal `SHUTDOWN` stops the consumer.

use derive_more::Display;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::CONTROL_TARGET;
use crate::data::{MuteIssuer, UserId};
use crate::moderation::{ModerationContext, escape_html, mention};

/// Poison pill ending the consumer loop
pub const SHUTDOWN_TOKEN: &str = "SHUTDOWN";
/// Mute length when none (or garbage) is given
pub const DEFAULT_MUTE_MINUTES: i64 = 60;
/// Shortest mute the control channel will issue
pub const MIN_MUTE_MINUTES: i64 = 1;
/// Reason recorded when none is given
pub const NO_REASON: &str = "no reason given";
/// Capacity of the in-process command queue
pub const CONTROL_QUEUE_CAPACITY: usize = 64;

/// Command verbs understood on the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum AdminCommandKind {
    #[display("/ban_id")]
    Ban,
    #[display("/mute")]
    Mute,
    #[display("/unban_id")]
    Unban,
    #[display("/unmute")]
    Unmute,
    #[display("/send_message_to_main_chat")]
    BroadcastMessage,
}

impl AdminCommandKind {
    const ALL: [Self; 5] = [
        Self::Ban,
        Self::Mute,
        Self::Unban,
        Self::Unmute,
        Self::BroadcastMessage,
    ];

    fn from_verb(verb: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.to_string() == verb)
    }
}

/// A validated administrative command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Ban {
        target: UserId,
        reason: String,
    },
    Mute {
        target: UserId,
        duration_minutes: i64,
        reason: String,
    },
    Unban {
        target: UserId,
    },
    Unmute {
        target: UserId,
    },
    BroadcastMessage {
        text: String,
    },
}

impl AdminCommand {
    #[must_use]
    pub fn kind(&self) -> AdminCommandKind {
        match self {
            Self::Ban { .. } => AdminCommandKind::Ban,
            Self::Mute { .. } => AdminCommandKind::Mute,
            Self::Unban { .. } => AdminCommandKind::Unban,
            Self::Unmute { .. } => AdminCommandKind::Unmute,
            Self::BroadcastMessage { .. } => AdminCommandKind::BroadcastMessage,
        }
    }

    #[must_use]
    pub fn target(&self) -> Option<UserId> {
        match self {
            Self::Ban { target, .. }
            | Self::Mute { target, .. }
            | Self::Unban { target }
            | Self::Unmute { target } => Some(*target),
            Self::BroadcastMessage { .. } => None,
        }
    }
}

/// A default substituted for missing or unusable input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// No duration given, 60 minutes used
    MissingDuration,
    /// Duration was not a number, 60 minutes used
    NonNumericDuration(String),
    /// Duration was zero or negative, 1 minute used
    NonPositiveDuration(i64),
    /// No reason given, placeholder used
    MissingReason,
}

/// Output of [`parse_command`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: AdminCommand,
    /// Defaults applied while parsing, in argument order
    pub fallbacks: Vec<Fallback>,
}

/// Reasons a command line is dropped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    UnknownVerb(String),

    #[error("{0} needs a target user id")]
    MissingTarget(AdminCommandKind),

    #[error("{kind}: '{token}' is a username, a numeric user id is required")]
    UsernameTarget {
        kind: AdminCommandKind,
        token: String,
    },

    #[error("{kind}: invalid user id '{token}'")]
    InvalidTarget {
        kind: AdminCommandKind,
        token: String,
    },

    #[error("Refusing to send an empty message")]
    EmptyBroadcast,
}

/// Parse one control line, applying the fallback defaults
///
/// # Errors
/// Returns why the line has to be dropped: unknown verb, missing or
/// non-numeric target, or an empty broadcast.
pub fn parse_command(line: &str) -> Result<ParsedCommand, ParseError> {
    let (verb, rest) = split_token(line).ok_or(ParseError::Empty)?;
    let kind =
        AdminCommandKind::from_verb(verb).ok_or_else(|| ParseError::UnknownVerb(verb.to_string()))?;

    let mut fallbacks = Vec::new();
    let command = match kind {
        AdminCommandKind::BroadcastMessage => {
            let text = rest.trim();
            if text.is_empty() {
                return Err(ParseError::EmptyBroadcast);
            }
            AdminCommand::BroadcastMessage {
                text: text.to_string(),
            }
        }
        AdminCommandKind::Ban => {
            let (target, rest) = take_target(kind, rest)?;
            AdminCommand::Ban {
                target,
                reason: reason_or_default(rest, &mut fallbacks),
            }
        }
        AdminCommandKind::Mute => {
            let (target, rest) = take_target(kind, rest)?;
            let (duration_token, rest) =
                split_token(rest).map_or((None, ""), |(t, r)| (Some(t), r));
            let duration_minutes = duration_or_default(duration_token, &mut fallbacks);
            AdminCommand::Mute {
                target,
                duration_minutes,
                reason: reason_or_default(rest, &mut fallbacks),
            }
        }
        AdminCommandKind::Unban => AdminCommand::Unban {
            target: take_target(kind, rest)?.0,
        },
        AdminCommandKind::Unmute => AdminCommand::Unmute {
            target: take_target(kind, rest)?.0,
        },
    };

    Ok(ParsedCommand { command, fallbacks })
}

/// First whitespace-separated token and the remainder
fn split_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    Some(match input.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (input, ""),
    })
}

/// Leading user id and the remainder
fn take_target(kind: AdminCommandKind, input: &str) -> Result<(UserId, &str), ParseError> {
    let (token, rest) = split_token(input).ok_or(ParseError::MissingTarget(kind))?;
    if token.starts_with('@') {
        return Err(ParseError::UsernameTarget {
            kind,
            token: token.to_string(),
        });
    }
    match token.parse::<UserId>() {
        Ok(user_id) if user_id > 0 => Ok((user_id, rest)),
        _ => Err(ParseError::InvalidTarget {
            kind,
            token: token.to_string(),
        }),
    }
}

fn duration_or_default(token: Option<&str>, fallbacks: &mut Vec<Fallback>) -> i64 {
    let Some(token) = token else {
        fallbacks.push(Fallback::MissingDuration);
        return DEFAULT_MUTE_MINUTES;
    };
    match token.parse::<i64>() {
        Ok(minutes) if minutes <= 0 => {
            fallbacks.push(Fallback::NonPositiveDuration(minutes));
            MIN_MUTE_MINUTES
        }
        Ok(minutes) => minutes,
        Err(_) => {
            fallbacks.push(Fallback::NonNumericDuration(token.to_string()));
            DEFAULT_MUTE_MINUTES
        }
    }
}

fn reason_or_default(rest: &str, fallbacks: &mut Vec<Fallback>) -> String {
    let reason = rest.trim();
    if reason.is_empty() {
        fallbacks.push(Fallback::MissingReason);
        NO_REASON.to_string()
    } else {
        reason.to_string()
    }
}

/// What happened to a dispatched line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The command ran successfully
    Executed(AdminCommand),
    /// The line was dropped before any platform action
    Rejected(ParseError),
    /// The platform refused the action
    Failed(AdminCommand),
}

/// Runs control-channel commands against the moderation engine
#[derive(Debug, Clone)]
pub struct ControlDispatcher {
    ctx: ModerationContext,
}

impl ControlDispatcher {
    pub fn new(ctx: ModerationContext) -> Self {
        Self { ctx }
    }

    /// Parse and execute one line. Never fails; every outcome is logged.
    pub async fn dispatch(&self, line: &str) -> DispatchOutcome {
        info!(
            target: CONTROL_TARGET,
            command = %line,
            "Received control command"
        );

        let parsed = match parse_command(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                match &e {
                    ParseError::UnknownVerb(_) | ParseError::EmptyBroadcast => {
                        warn!(target: CONTROL_TARGET, command = %line, "{e}");
                    }
                    ParseError::UsernameTarget { .. } => {
                        error!(
                            target: CONTROL_TARGET,
                            command = %line,
                            "{e}; usernames cannot be resolved, use the numeric user id"
                        );
                    }
                    _ => error!(target: CONTROL_TARGET, command = %line, "{e}"),
                }
                return DispatchOutcome::Rejected(e);
            }
        };

        for fallback in &parsed.fallbacks {
            log_fallback(line, fallback);
        }

        let command = parsed.command;
        if self.execute(&command).await {
            DispatchOutcome::Executed(command)
        } else {
            DispatchOutcome::Failed(command)
        }
    }

    async fn execute(&self, command: &AdminCommand) -> bool {
        let ctx = &self.ctx;
        let result = match command {
            AdminCommand::Ban { target, reason } => ctx.ban(*target, reason).await.map(|()| {
                format!(
                    "User {} has been banned via the control panel. Reason: {}",
                    mention(*target, &target.to_string()),
                    escape_html(reason)
                )
            }),
            AdminCommand::Mute {
                target,
                duration_minutes,
                reason,
            } => ctx
                .mute(*target, *duration_minutes, reason, MuteIssuer::ControlChannel)
                .await
                .map(|_| {
                    format!(
                        "User {} has been muted for {duration_minutes} minutes via the control panel. Reason: {}",
                        mention(*target, &target.to_string()),
                        escape_html(reason)
                    )
                }),
            AdminCommand::Unban { target } => ctx.unban(*target).await.map(|()| {
                format!(
                    "User {} has been unbanned via the control panel.",
                    mention(*target, &target.to_string())
                )
            }),
            AdminCommand::Unmute { target } => ctx.unmute(*target).await.map(|_| {
                format!(
                    "User {} has been unmuted via the control panel.",
                    mention(*target, &target.to_string())
                )
            }),
            AdminCommand::BroadcastMessage { text } => {
                return self.broadcast(text).await;
            }
        };

        match result {
            Ok(confirmation) => {
                info!(
                    target: CONTROL_TARGET,
                    kind = %command.kind(),
                    user_id = ?command.target(),
                    "Control command executed"
                );
                if ctx.config().send_confirmations_to_chat {
                    ctx.announce(confirmation).await;
                }
                true
            }
            Err(e) => {
                error!(
                    target: CONTROL_TARGET,
                    kind = %command.kind(),
                    error = %e,
                    "Control command failed"
                );
                false
            }
        }
    }

    async fn broadcast(&self, text: &str) -> bool {
        let chat_id = self.ctx.chat_id();
        match self
            .ctx
            .platform()
            .send_message(chat_id, text.to_string(), true)
            .await
        {
            Ok(()) => {
                info!(
                    target: CONTROL_TARGET,
                    chat_id,
                    text = %text,
                    "Sent message to the main chat"
                );
                true
            }
            Err(e) => {
                error!(
                    target: CONTROL_TARGET,
                    chat_id,
                    error = %e,
                    "Failed to send message to the main chat"
                );
                false
            }
        }
    }
}

fn log_fallback(line: &str, fallback: &Fallback) {
    match fallback {
        Fallback::MissingDuration => info!(
            target: CONTROL_TARGET,
            command = %line,
            "No mute duration given, using {DEFAULT_MUTE_MINUTES} minutes"
        ),
        Fallback::NonNumericDuration(token) => warn!(
            target: CONTROL_TARGET,
            command = %line,
            "Invalid mute duration '{token}', using {DEFAULT_MUTE_MINUTES} minutes"
        ),
        Fallback::NonPositiveDuration(minutes) => warn!(
            target: CONTROL_TARGET,
            command = %line,
            "Mute duration must be positive, got {minutes}, using {MIN_MUTE_MINUTES} minute"
        ),
        Fallback::MissingReason => {}
    }
}

/// Consume queued command lines until the shutdown token or a closed queue
pub async fn run_control_loop(dispatcher: ControlDispatcher, mut rx: Receiver<String>) {
    info!(target: CONTROL_TARGET, "Control command listener started");

    while let Some(line) = rx.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == SHUTDOWN_TOKEN {
            info!(target: CONTROL_TARGET, "Received shutdown command");
            break;
        }
        dispatcher.dispatch(line).await;
    }

    info!(target: CONTROL_TARGET, "Control command listener stopped");
}

/// Forward lines from `reader` into the command queue
///
/// Stops at end of input or once the queue is closed.
pub fn spawn_line_reader<R>(reader: R, tx: Sender<String>) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    info!(target: CONTROL_TARGET, "Control input closed");
                    break;
                }
                Err(e) => {
                    error!(
                        target: CONTROL_TARGET,
                        error = %e,
                        "Failed to read control input"
                    );
                    break;
                }
            }
        }
    })
}

use crate::moderation::InboundMessage;
use crate::{COMMAND_TARGET, CONSOLE_TARGET, ERROR_TARGET, EVENT_TARGET, Error};
use std::fmt::Display;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Activity log tailed by the control panel, `bot_activity.<date>.log`
pub const ACTIVITY_LOG_PREFIX: &str = "bot_activity";
/// Days of activity log kept on disk
pub const ACTIVITY_LOG_DAYS: usize = 7;
/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";

/// Initialize the logging system with console and file outputs
pub fn init() -> Result<(), Error> {
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    let activity_file = activity_appender(LOG_DIR)?;
    let command_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, COMMAND_LOG_FILE);

    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    let activity_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(activity_file);

    let command_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file);

    // Default to INFO, but keep teloxide's polling chatter out of the logs
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info").add_directive("teloxide=warn".parse()?),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(activity_layer)
        .with(command_layer)
        .try_init()?;

    info!("Logging system initialized");
    Ok(())
}

/// Plain-text activity log, rotated daily with old days pruned
pub fn activity_appender(dir: impl AsRef<Path>) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(ACTIVITY_LOG_PREFIX)
        .filename_suffix("log")
        .max_log_files(ACTIVITY_LOG_DAYS)
        .build(dir)
}

fn chat_label(msg: &InboundMessage) -> String {
    msg.chat_title
        .clone()
        .unwrap_or_else(|| "private".to_string())
}

/// Log every inbound text message with its chat and author
pub fn log_inbound(msg: &InboundMessage) {
    info!(
        target: EVENT_TARGET,
        chat = %chat_label(msg),
        chat_id = msg.chat_id,
        user_id = msg.author.id,
        name = %msg.author.full_name(),
        username = %msg.author.username.as_deref().unwrap_or_default(),
        text = %msg.text,
        "Message received"
    );
}

/// Log the start of a chat command and return its start time
pub fn log_command_start(command: &str, msg: &InboundMessage) -> Instant {
    info!(
        target: COMMAND_TARGET,
        command = %command,
        chat_id = msg.chat_id,
        user_id = msg.author.id,
        arguments = %msg.text,
        event = "start",
        "Command execution started"
    );
    Instant::now()
}

/// Log the end of a chat command
pub fn log_command_end(command: &str, msg: &InboundMessage, started: Instant) {
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or_default();
    info!(
        target: COMMAND_TARGET,
        command = %command,
        chat_id = msg.chat_id,
        user_id = msg.author.id,
        duration_ms,
        event = "end",
        "Command execution completed"
    );
}

/// Log errors that occur during command execution
pub fn log_command_error(command: &str, msg: &InboundMessage, error: &dyn Display) {
    error!(
        target: ERROR_TARGET,
        command = %command,
        chat = %chat_label(msg),
        chat_id = msg.chat_id,
        user_id = msg.author.id,
        error = %error,
        "Command error"
    );
}

pub fn log_console(message: String) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}

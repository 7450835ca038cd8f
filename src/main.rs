use std::sync::Arc;
use std::time::Duration;

use chat_warden::commands::Command;
use chat_warden::config::BotConfig;
use chat_warden::control::{self, CONTROL_QUEUE_CAPACITY, ControlDispatcher, SHUTDOWN_TOKEN};
use chat_warden::moderation::{ContentFilter, ExpirySweeper, ModerationContext, SweepRequest};
use chat_warden::telegram::TelegramPlatform;
use chat_warden::{CONTROL_TARGET, ERROR_TARGET, Error, FILTER_TARGET, handlers, logging};
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    // Startup errors end the process before the state file is touched
    let config = BotConfig::load().inspect_err(|e| {
        error!(target: ERROR_TARGET, error = %e, "Failed to load configuration");
    })?;
    let token = config.resolve_token().inspect_err(|e| {
        error!(target: ERROR_TARGET, error = %e, "No bot token available");
    })?;
    info!(
        chat_id = config.main_chat_id,
        admins = config.admin_user_ids.len(),
        bad_words = config.bad_words.len(),
        "Configuration loaded"
    );

    let bot = Bot::new(token);
    let platform = Arc::new(TelegramPlatform::new(bot.clone()));
    let ctx = ModerationContext::open(config, platform).await;
    let filter = ContentFilter::new(&ctx.config().bad_words);
    if filter.is_empty() {
        warn!(target: FILTER_TARGET, "No disallowed words configured, content filter is off");
    }

    let interval = Duration::from_secs(ctx.config().sweep_interval_seconds);
    let (sweeper, sweeper_handle) = ExpirySweeper::new(ctx.clone(), interval).start();

    // Control panel commands arrive on stdin
    let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
    control::spawn_line_reader(BufReader::new(tokio::io::stdin()), control_tx.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: CONTROL_TARGET, "Interrupt received, shutting down");
            if control_tx.send(SHUTDOWN_TOKEN.to_string()).await.is_err() {
                warn!(target: CONTROL_TARGET, "Control listener already stopped");
            }
        }
    });

    logging::log_console("Registering chat commands".to_string());
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(target: ERROR_TARGET, error = %e, "Failed to register chat commands");
    }

    let mut dispatcher = Dispatcher::builder(bot, handlers::schema())
        .dependencies(dptree::deps![ctx.clone(), filter])
        .default_handler(|_| async {})
        .build();

    let shutdown = dispatcher.shutdown_token();
    let control_task = tokio::spawn(async move {
        control::run_control_loop(ControlDispatcher::new(ctx), control_rx).await;
        handlers::stop_dispatcher(shutdown).await;
    });

    info!("Starting bot...");
    dispatcher.dispatch().await;

    if sweeper.send(SweepRequest::Shutdown).await.is_ok() {
        sweeper_handle.await?;
    }
    control_task.abort();

    info!("Bot stopped");
    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| runtime.block_on(async_main()));

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

//! Expiry sweeper
//!
//! Periodically lifts mutes whose end time has passed. Sweeps run inline in
//! the task loop, so two sweeps never overlap and a slow sweep pushes the
//! next one back.

use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::engine::{ModerationContext, SweepReport};
use crate::SWEEP_TARGET;

/// Requests accepted by the sweeper task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepRequest {
    /// Sweep now instead of waiting for the next tick
    SweepNow,
    /// Stop the task
    Shutdown,
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Recurring task lifting expired mutes
pub struct ExpirySweeper {
    ctx: ModerationContext,
    interval: Duration,
    clock: Clock,
}

impl ExpirySweeper {
    pub fn new(ctx: ModerationContext, interval: Duration) -> Self {
        Self::with_clock(ctx, interval, || Local::now().naive_local())
    }

    /// Use a custom source of local wall-clock time
    pub fn with_clock(
        ctx: ModerationContext,
        interval: Duration,
        clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static,
    ) -> Self {
        Self {
            ctx,
            interval,
            clock: Box::new(clock),
        }
    }

    /// Spawn the sweeper and return its request sender
    pub fn start(self) -> (Sender<SweepRequest>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(self.run(rx));
        (tx, handle)
    }

    /// Run until a shutdown request arrives or every sender is dropped
    pub async fn run(self, mut rx: Receiver<SweepRequest>) {
        info!(
            target: SWEEP_TARGET,
            interval_seconds = self.interval.as_secs(),
            "Starting expiry sweeper"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(SweepRequest::SweepNow) => {
                        info!(target: SWEEP_TARGET, "Sweep requested");
                        self.sweep().await;
                    }
                    Some(SweepRequest::Shutdown) | None => break,
                },
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }

        info!(target: SWEEP_TARGET, "Expiry sweeper shut down");
    }

    async fn sweep(&self) -> SweepReport {
        let report = self.ctx.sweep_expired_at((self.clock)()).await;
        if !report.lifted.is_empty() || !report.failed.is_empty() {
            info!(
                target: SWEEP_TARGET,
                lifted = report.lifted.len(),
                failed = report.failed.len(),
                "Sweep finished"
            );
        }
        report
    }
}

//! Moderation engine
//!
//! [`ModerationContext`] is the only owner of the persisted state. Every
//! operation takes the state lock, talks to the platform, updates the state
//! and flushes it to disk before releasing the lock, so concurrent callers
//! (chat events, control channel, sweeper) never lose an update.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::error::{ModerationError, ModerationResult};
use super::platform::{ChatPlatform, MemberPermissions, mention};
use crate::config::BotConfig;
use crate::data::{MuteIssuer, MuteRecord, PersistedState, StateStore, UserId};
use crate::{COMMAND_TARGET, ERROR_TARGET, SWEEP_TARGET};

/// Reason recorded on mutes applied by warning escalation
pub const AUTO_MUTE_REASON: &str = "auto-escalation";

/// Result of a warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarnOutcome {
    /// Warnings accumulated including this one, before any reset
    pub count: u32,
    /// Threshold in force when the warning was issued
    pub threshold: u32,
    /// The mute applied by escalation, if it went through
    pub auto_mute: Option<MuteRecord>,
}

impl WarnOutcome {
    /// Whether this warning reached the threshold
    #[must_use]
    pub fn escalated(&self) -> bool {
        self.count >= self.threshold
    }
}

/// Result of one expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Users whose mute was lifted
    pub lifted: Vec<UserId>,
    /// Users whose unmute failed; their records stay for the next sweep
    pub failed: Vec<UserId>,
}

/// Shared handle to the moderation state and the platform
#[derive(Clone)]
pub struct ModerationContext(Arc<ContextInner>);

struct ContextInner {
    config: BotConfig,
    store: StateStore,
    state: Mutex<PersistedState>,
    platform: Arc<dyn ChatPlatform>,
}

impl std::fmt::Debug for ModerationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationContext")
            .field("chat_id", &self.0.config.main_chat_id)
            .field("store", &self.0.store)
            .finish_non_exhaustive()
    }
}

impl ModerationContext {
    /// Create a context around already loaded state
    pub fn new(
        config: BotConfig,
        store: StateStore,
        state: PersistedState,
        platform: Arc<dyn ChatPlatform>,
    ) -> Self {
        Self(Arc::new(ContextInner {
            config,
            store,
            state: Mutex::new(state),
            platform,
        }))
    }

    /// Load the state file named in the configuration and create a context
    pub async fn open(config: BotConfig, platform: Arc<dyn ChatPlatform>) -> Self {
        let store = StateStore::new(config.data_file.clone());
        let state = store.load().await;
        Self::new(config, store, state, platform)
    }

    #[must_use]
    pub fn config(&self) -> &BotConfig {
        &self.0.config
    }

    #[must_use]
    pub fn chat_id(&self) -> i64 {
        self.0.config.main_chat_id
    }

    #[must_use]
    pub fn platform(&self) -> &dyn ChatPlatform {
        self.0.platform.as_ref()
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> PersistedState {
        self.0.state.lock().await.clone()
    }

    pub async fn warn_count(&self, user_id: UserId) -> u32 {
        self.0.state.lock().await.warn_count(user_id)
    }

    pub async fn mute_record(&self, user_id: UserId) -> Option<MuteRecord> {
        self.0.state.lock().await.mutes.get(&user_id).cloned()
    }

    /// Add a warning and escalate to a mute once the threshold is reached
    ///
    /// The increment, the escalation mute and the counter reset are applied
    /// and persisted as one unit. If the escalation mute fails it is logged
    /// and the counter is reset anyway.
    pub async fn warn(&self, user_id: UserId, issuer: UserId) -> WarnOutcome {
        let config = &self.0.config;
        let threshold = config.auto_mute_warn_count;

        let mut state = self.0.state.lock().await;
        let count = {
            let entry = state.warns.entry(user_id).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };

        info!(
            target: COMMAND_TARGET,
            user_id,
            issuer_id = issuer,
            count,
            threshold,
            event = "warn",
            "User warned"
        );

        let mut auto_mute = None;
        if count >= threshold {
            match self
                .apply_mute(
                    user_id,
                    config.auto_mute_duration_minutes,
                    AUTO_MUTE_REASON,
                    MuteIssuer::System,
                )
                .await
            {
                Ok(record) => {
                    state.mutes.insert(user_id, record.clone());
                    auto_mute = Some(record);
                }
                Err(e) => {
                    error!(
                        target: ERROR_TARGET,
                        user_id,
                        error = %e,
                        "Automatic mute after warnings failed"
                    );
                }
            }
            state.warns.insert(user_id, 0);
        }

        self.persist(&state).await;
        drop(state);

        if auto_mute.is_some() && config.send_confirmations_to_chat {
            self.announce(format!(
                "User {} has been muted for {} minutes. Reason: {AUTO_MUTE_REASON}",
                mention(user_id, &user_id.to_string()),
                config.auto_mute_duration_minutes
            ))
            .await;
        }

        WarnOutcome {
            count,
            threshold,
            auto_mute,
        }
    }

    /// Mute a user; `duration_minutes == 0` mutes indefinitely
    ///
    /// # Errors
    /// Returns an error for a negative duration or when the platform rejects
    /// the restriction. Nothing is persisted in either case.
    pub async fn mute(
        &self,
        user_id: UserId,
        duration_minutes: i64,
        reason: &str,
        issuer: MuteIssuer,
    ) -> ModerationResult<MuteRecord> {
        let mut state = self.0.state.lock().await;
        let record = self
            .apply_mute(user_id, duration_minutes, reason, issuer)
            .await?;
        state.mutes.insert(user_id, record.clone());
        self.persist(&state).await;
        Ok(record)
    }

    /// Restore a user's permissions and drop their mute record
    ///
    /// Returns whether a record existed.
    ///
    /// # Errors
    /// Returns an error when the platform rejects the change; the record is
    /// kept in that case.
    pub async fn unmute(&self, user_id: UserId) -> ModerationResult<bool> {
        let mut state = self.0.state.lock().await;
        self.restore_permissions(user_id).await?;

        let existed = state.mutes.remove(&user_id).is_some();
        if existed {
            self.persist(&state).await;
        }

        info!(
            target: COMMAND_TARGET,
            user_id,
            had_record = existed,
            event = "unmute",
            "User unmuted"
        );
        Ok(existed)
    }

    /// Ban a user. Warning and mute records are left as they are.
    ///
    /// # Errors
    /// Returns an error when the platform rejects the ban.
    pub async fn ban(&self, user_id: UserId, reason: &str) -> ModerationResult<()> {
        self.platform()
            .ban_member(self.chat_id(), user_id)
            .await
            .map_err(|e| ModerationError::platform("ban", user_id, e))?;

        info!(
            target: COMMAND_TARGET,
            user_id,
            reason = %reason,
            event = "ban",
            "User banned"
        );
        Ok(())
    }

    /// Lift a ban. Best effort on the platform side.
    ///
    /// # Errors
    /// Returns an error when the platform rejects the request.
    pub async fn unban(&self, user_id: UserId) -> ModerationResult<()> {
        self.platform()
            .unban_member(self.chat_id(), user_id)
            .await
            .map_err(|e| ModerationError::platform("unban", user_id, e))?;

        info!(
            target: COMMAND_TARGET,
            user_id,
            event = "unban",
            "User unbanned"
        );
        Ok(())
    }

    /// Lift every mute that has expired at `now`
    ///
    /// A failure for one user does not stop the batch; that user's record is
    /// retained. The state is persisted once after the batch.
    pub async fn sweep_expired_at(&self, now: NaiveDateTime) -> SweepReport {
        let mut report = SweepReport::default();

        {
            let mut state = self.0.state.lock().await;
            let expired = state.expired_mutes(now);
            if expired.is_empty() {
                return report;
            }

            for user_id in expired {
                match self.restore_permissions(user_id).await {
                    Ok(()) => {
                        state.mutes.remove(&user_id);
                        info!(
                            target: SWEEP_TARGET,
                            user_id,
                            event = "auto_unmute",
                            "User unmuted automatically"
                        );
                        report.lifted.push(user_id);
                    }
                    Err(e) => {
                        error!(
                            target: SWEEP_TARGET,
                            user_id,
                            error = %e,
                            "Automatic unmute failed, retrying on the next sweep"
                        );
                        report.failed.push(user_id);
                    }
                }
            }

            if !report.lifted.is_empty() {
                self.persist(&state).await;
            }
        }

        for user_id in &report.lifted {
            self.announce(format!(
                "User {} has been unmuted automatically.",
                mention(*user_id, &user_id.to_string())
            ))
            .await;
        }

        report
    }

    /// Post an HTML message to the moderated chat, logging any failure
    pub async fn announce(&self, text: String) {
        if let Err(e) = self.platform().send_message(self.chat_id(), text, true).await {
            warn!(
                target: ERROR_TARGET,
                chat_id = self.chat_id(),
                error = %e,
                "Failed to send message to chat"
            );
        }
    }

    async fn apply_mute(
        &self,
        user_id: UserId,
        duration_minutes: i64,
        reason: &str,
        issuer: MuteIssuer,
    ) -> ModerationResult<MuteRecord> {
        let (end_time, until) = mute_deadline(Local::now(), duration_minutes)?;

        self.platform()
            .restrict_member(self.chat_id(), user_id, MemberPermissions::Muted, until)
            .await
            .map_err(|e| ModerationError::platform("mute", user_id, e))?;

        info!(
            target: COMMAND_TARGET,
            user_id,
            duration_minutes,
            reason = %reason,
            issuer = %issuer,
            end_time = ?end_time,
            event = "mute",
            "User muted"
        );

        Ok(MuteRecord {
            end_time,
            reason: reason.to_string(),
            issuer,
        })
    }

    async fn restore_permissions(&self, user_id: UserId) -> ModerationResult<()> {
        self.platform()
            .restrict_member(self.chat_id(), user_id, MemberPermissions::Default, None)
            .await
            .map_err(|e| ModerationError::platform("unmute", user_id, e))
    }

    async fn persist(&self, state: &PersistedState) {
        if let Err(e) = self.0.store.save(state).await {
            error!(
                target: ERROR_TARGET,
                path = %self.0.store.path().display(),
                error = %e,
                "Failed to save moderation state"
            );
        }
    }
}

/// Local expiry and platform deadline for a mute starting at `now`
fn mute_deadline(
    now: DateTime<Local>,
    duration_minutes: i64,
) -> ModerationResult<(Option<NaiveDateTime>, Option<DateTime<Utc>>)> {
    if duration_minutes < 0 {
        return Err(ModerationError::InvalidDuration(duration_minutes));
    }
    if duration_minutes == 0 {
        return Ok((None, None));
    }

    let end = TimeDelta::try_minutes(duration_minutes)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or(ModerationError::InvalidDuration(duration_minutes))?;
    Ok((Some(end.naive_local()), Some(end.with_timezone(&Utc))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::platform::{MockChatPlatform, PlatformError};
    use chrono::Duration;
    use tempfile::TempDir;

    const CHAT: i64 = -100_777;

    fn config(dir: &TempDir) -> BotConfig {
        BotConfig {
            main_chat_id: CHAT,
            auto_mute_warn_count: 3,
            auto_mute_duration_minutes: 60,
            data_file: dir.path().join("bot_data.json"),
            ..Default::default()
        }
    }

    fn context(config: BotConfig, mock: MockChatPlatform) -> ModerationContext {
        let store = StateStore::new(config.data_file.clone());
        ModerationContext::new(config, store, PersistedState::default(), Arc::new(mock))
    }

    fn expect_mute(mock: &mut MockChatPlatform, user: UserId, times: usize) {
        mock.expect_restrict_member()
            .withf(move |chat, user_id, permissions, _| {
                *chat == CHAT && *user_id == user && *permissions == MemberPermissions::Muted
            })
            .times(times)
            .returning(|_, _, _, _| Ok(()));
    }

    fn expect_unmute(mock: &mut MockChatPlatform, user: UserId, times: usize) {
        mock.expect_restrict_member()
            .withf(move |chat, user_id, permissions, until| {
                *chat == CHAT
                    && *user_id == user
                    && *permissions == MemberPermissions::Default
                    && until.is_none()
            })
            .times(times)
            .returning(|_, _, _, _| Ok(()));
    }

    #[tokio::test]
    async fn test_warnings_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(config(&dir), MockChatPlatform::new());

        for expected in 1..=2 {
            let outcome = ctx.warn(12345, 1).await;
            assert_eq!(outcome.count, expected);
            assert!(!outcome.escalated());
            assert!(outcome.auto_mute.is_none());
        }

        assert_eq!(ctx.warn_count(12345).await, 2);
        assert!(ctx.mute_record(12345).await.is_none());

        let on_disk = StateStore::new(dir.path().join("bot_data.json")).load().await;
        assert_eq!(on_disk.warn_count(12345), 2);
        assert!(on_disk.mutes.is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_state_file_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the state directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let mut mock = MockChatPlatform::new();
        expect_mute(&mut mock, 12345, 1);
        let config = BotConfig {
            data_file: blocker.join("bot_data.json"),
            ..config(&dir)
        };
        let ctx = context(config, mock);

        assert_eq!(ctx.warn(12345, 1).await.count, 1);
        assert_eq!(ctx.warn(12345, 1).await.count, 2);
        assert_eq!(ctx.warn_count(12345).await, 2);

        let record = ctx
            .mute(12345, 10, "flooding", MuteIssuer::ControlChannel)
            .await
            .unwrap();
        assert_eq!(ctx.mute_record(12345).await, Some(record));
        assert!(!blocker.join("bot_data.json").exists());
    }

    #[tokio::test]
    async fn test_threshold_escalates_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockChatPlatform::new();
        mock.expect_restrict_member()
            .withf(|chat, user_id, permissions, until| {
                *chat == CHAT
                    && *user_id == 12345
                    && *permissions == MemberPermissions::Muted
                    && until.is_some()
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let ctx = context(config(&dir), mock);

        ctx.warn(12345, 1).await;
        ctx.warn(12345, 1).await;
        let before = Local::now().naive_local();
        let outcome = ctx.warn(12345, 1).await;
        let after = Local::now().naive_local();

        assert_eq!(outcome.count, 3);
        assert!(outcome.escalated());
        let record = outcome.auto_mute.expect("escalation should mute");
        assert_eq!(record.reason, AUTO_MUTE_REASON);
        assert_eq!(record.issuer, MuteIssuer::System);
        let end_time = record.end_time.unwrap();
        assert!(end_time >= before + Duration::minutes(60));
        assert!(end_time <= after + Duration::minutes(60));

        assert_eq!(ctx.warn_count(12345).await, 0);
        assert_eq!(ctx.mute_record(12345).await, Some(record.clone()));

        let on_disk = StateStore::new(dir.path().join("bot_data.json")).load().await;
        assert_eq!(on_disk.warn_count(12345), 0);
        assert_eq!(on_disk.mutes.get(&12345), Some(&record));
    }

    #[tokio::test]
    async fn test_escalation_announced_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockChatPlatform::new();
        expect_mute(&mut mock, 5, 1);
        mock.expect_send_message()
            .withf(|chat, text, html| *chat == CHAT && text.contains("tg://user?id=5") && *html)
            .times(1)
            .returning(|_, _, _| Ok(()));
        let ctx = context(
            BotConfig {
                auto_mute_warn_count: 1,
                send_confirmations_to_chat: true,
                ..config(&dir)
            },
            mock,
        );

        let outcome = ctx.warn(5, 1).await;
        assert!(outcome.auto_mute.is_some());
    }

    #[tokio::test]
    async fn test_failed_escalation_still_resets() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockChatPlatform::new();
        mock.expect_restrict_member()
            .times(1)
            .returning(|_, _, _, _| Err(PlatformError::Api("not enough rights".to_string())));
        let ctx = context(
            BotConfig {
                auto_mute_warn_count: 1,
                ..config(&dir)
            },
            mock,
        );

        let outcome = ctx.warn(5, 1).await;
        assert!(outcome.escalated());
        assert!(outcome.auto_mute.is_none());
        assert_eq!(ctx.warn_count(5).await, 0);
        assert!(ctx.mute_record(5).await.is_none());
    }

    #[tokio::test]
    async fn test_zero_duration_mutes_indefinitely() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockChatPlatform::new();
        mock.expect_restrict_member()
            .withf(|_, user_id, permissions, until| {
                *user_id == 77 && *permissions == MemberPermissions::Muted && until.is_none()
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let ctx = context(config(&dir), mock);

        let record = ctx.mute(77, 0, "flood", MuteIssuer::Admin(CHAT)).await.unwrap();
        assert!(record.is_indefinite());
        assert_eq!(ctx.mute_record(77).await, Some(record));

        // Indefinite mutes are never swept
        let report = ctx
            .sweep_expired_at(Local::now().naive_local() + Duration::days(3650))
            .await;
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_negative_duration_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(config(&dir), MockChatPlatform::new());

        let result = ctx.mute(77, -5, "flood", MuteIssuer::ControlChannel).await;
        assert!(matches!(result, Err(ModerationError::InvalidDuration(-5))));
        assert_eq!(ctx.snapshot().await, PersistedState::default());
        assert!(!dir.path().join("bot_data.json").exists());
    }

    #[tokio::test]
    async fn test_platform_failure_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockChatPlatform::new();
        mock.expect_restrict_member()
            .returning(|_, _, _, _| Err(PlatformError::Network("timed out".to_string())));
        let ctx = context(config(&dir), mock);

        let result = ctx.mute(77, 10, "flood", MuteIssuer::ControlChannel).await;
        assert!(matches!(
            result,
            Err(ModerationError::Platform { action: "mute", user_id: 77, .. })
        ));
        assert!(ctx.mute_record(77).await.is_none());
        assert!(!dir.path().join("bot_data.json").exists());
    }

    #[tokio::test]
    async fn test_mute_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockChatPlatform::new();
        expect_mute(&mut mock, 77, 2);
        let ctx = context(config(&dir), mock);

        ctx.mute(77, 10, "first", MuteIssuer::ControlChannel).await.unwrap();
        let second = ctx.mute(77, 0, "second", MuteIssuer::Admin(1)).await.unwrap();

        let state = ctx.snapshot().await;
        assert_eq!(state.mutes.len(), 1);
        assert_eq!(state.mutes.get(&77), Some(&second));
    }

    #[tokio::test]
    async fn test_unmute_reports_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockChatPlatform::new();
        expect_mute(&mut mock, 77, 1);
        expect_unmute(&mut mock, 77, 2);
        let ctx = context(config(&dir), mock);

        ctx.mute(77, 10, "flood", MuteIssuer::ControlChannel).await.unwrap();
        assert!(ctx.unmute(77).await.unwrap());
        assert!(ctx.mute_record(77).await.is_none());

        // Unmuting an unmuted user still succeeds
        assert!(!ctx.unmute(77).await.unwrap());

        let on_disk = StateStore::new(dir.path().join("bot_data.json")).load().await;
        assert!(on_disk.mutes.is_empty());
    }

    #[tokio::test]
    async fn test_failed_unmute_keeps_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockChatPlatform::new();
        expect_mute(&mut mock, 77, 1);
        mock.expect_restrict_member()
            .withf(|_, _, permissions, _| *permissions == MemberPermissions::Default)
            .returning(|_, _, _, _| Err(PlatformError::Api("chat not found".to_string())));
        let ctx = context(config(&dir), mock);

        ctx.mute(77, 10, "flood", MuteIssuer::ControlChannel).await.unwrap();
        assert!(ctx.unmute(77).await.is_err());
        assert!(ctx.mute_record(77).await.is_some());
    }

    #[tokio::test]
    async fn test_ban_leaves_bookkeeping_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockChatPlatform::new();
        expect_mute(&mut mock, 77, 1);
        mock.expect_ban_member()
            .withf(|chat, user_id| *chat == CHAT && *user_id == 77)
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_unban_member()
            .withf(|chat, user_id| *chat == CHAT && *user_id == 77)
            .times(1)
            .returning(|_, _| Ok(()));
        let ctx = context(config(&dir), mock);

        ctx.warn(77, 1).await;
        ctx.mute(77, 10, "flood", MuteIssuer::ControlChannel).await.unwrap();
        let before = ctx.snapshot().await;

        ctx.ban(77, "raid").await.unwrap();
        ctx.unban(77).await.unwrap();
        assert_eq!(ctx.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_sweep_lifts_each_mute_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockChatPlatform::new();
        expect_mute(&mut mock, 1, 1);
        expect_mute(&mut mock, 2, 1);
        expect_mute(&mut mock, 3, 1);
        expect_unmute(&mut mock, 1, 1);
        expect_unmute(&mut mock, 2, 1);
        mock.expect_send_message()
            .withf(|_, text, _| text.contains("unmuted automatically"))
            .times(2)
            .returning(|_, _, _| Ok(()));
        let ctx = context(config(&dir), mock);

        ctx.mute(1, 5, "a", MuteIssuer::ControlChannel).await.unwrap();
        ctx.mute(2, 10, "b", MuteIssuer::ControlChannel).await.unwrap();
        ctx.mute(3, 600, "c", MuteIssuer::ControlChannel).await.unwrap();

        let later = Local::now().naive_local() + Duration::minutes(30);
        let report = ctx.sweep_expired_at(later).await;
        assert_eq!(report.lifted, vec![1, 2]);
        assert!(report.failed.is_empty());

        let report = ctx.sweep_expired_at(later).await;
        assert_eq!(report, SweepReport::default());

        let on_disk = StateStore::new(dir.path().join("bot_data.json")).load().await;
        assert_eq!(on_disk.mutes.keys().copied().collect::<Vec<_>>(), vec![3]);
    }

    #[tokio::test]
    async fn test_sweep_failure_retains_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockChatPlatform::new();
        expect_mute(&mut mock, 1, 1);
        expect_mute(&mut mock, 2, 1);
        mock.expect_restrict_member()
            .withf(|_, user_id, permissions, _| {
                *user_id == 1 && *permissions == MemberPermissions::Default
            })
            .times(2)
            .returning(|_, _, _, _| Err(PlatformError::Api("user not found".to_string())));
        expect_unmute(&mut mock, 2, 1);
        mock.expect_send_message().times(1).returning(|_, _, _| Ok(()));
        let ctx = context(config(&dir), mock);

        ctx.mute(1, 5, "a", MuteIssuer::ControlChannel).await.unwrap();
        ctx.mute(2, 5, "b", MuteIssuer::ControlChannel).await.unwrap();

        let later = Local::now().naive_local() + Duration::minutes(30);
        let report = ctx.sweep_expired_at(later).await;
        assert_eq!(report.lifted, vec![2]);
        assert_eq!(report.failed, vec![1]);
        assert!(ctx.mute_record(1).await.is_some());

        // Retried on the next pass
        let report = ctx.sweep_expired_at(later).await;
        assert_eq!(report.failed, vec![1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_warnings_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            BotConfig {
                auto_mute_warn_count: 1000,
                ..config(&dir)
            },
            MockChatPlatform::new(),
        );
        ctx.warn(9, 1).await;

        let first = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.warn(9, 1).await }
        });
        let second = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.warn(9, 2).await }
        });
        let (first, second) = (first.await.unwrap(), second.await.unwrap());

        let mut counts = [first.count, second.count];
        counts.sort_unstable();
        assert_eq!(counts, [2, 3]);
        assert_eq!(ctx.warn_count(9).await, 3);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let ctx = ctx.clone();
                tokio::spawn(async move { ctx.warn(9, 1).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(ctx.warn_count(9).await, 53);

        let on_disk = StateStore::new(dir.path().join("bot_data.json")).load().await;
        assert_eq!(on_disk.warn_count(9), 53);
    }

    #[test]
    fn test_mute_deadline() {
        let now = Local::now();
        assert_eq!(mute_deadline(now, 0).unwrap(), (None, None));
        assert!(matches!(
            mute_deadline(now, -1),
            Err(ModerationError::InvalidDuration(-1))
        ));
        assert!(mute_deadline(now, i64::MAX).is_err());

        let (end_time, until) = mute_deadline(now, 90).unwrap();
        assert_eq!(end_time, Some((now + Duration::minutes(90)).naive_local()));
        assert_eq!(until, Some((now + Duration::minutes(90)).with_timezone(&Utc)));
    }
}

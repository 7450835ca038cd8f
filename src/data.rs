//! Persisted moderation state
//!
//! Warning counts and active mutes live in a single JSON document. It is
//! loaded once at startup and rewritten in full after every mutation.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Platform account identifier
pub type UserId = u64;

/// Marker stored in `admin_id` for mutes issued through the control channel
pub const CONTROL_ISSUER: &str = "GUI";
/// Marker stored in `admin_id` for automatic mutes
pub const SYSTEM_ISSUER: &str = "system";

/// Who applied a mute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(into = "String")]
pub enum MuteIssuer {
    /// An administrator or the chat the command was issued in
    #[display("{_0}")]
    Admin(i64),
    /// The external control panel
    #[display("{}", CONTROL_ISSUER)]
    ControlChannel,
    /// Automatic escalation
    #[display("{}", SYSTEM_ISSUER)]
    System,
}

impl From<MuteIssuer> for String {
    fn from(issuer: MuteIssuer) -> Self {
        issuer.to_string()
    }
}

impl<'de> Deserialize<'de> for MuteIssuer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Older files store the issuing chat as a bare number
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(id) => Self::Admin(id),
            Raw::Text(text) if text == SYSTEM_ISSUER => Self::System,
            Raw::Text(text) => text
                .trim()
                .parse()
                .map_or(Self::ControlChannel, Self::Admin),
        })
    }
}

/// An active restriction on a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteRecord {
    /// Local wall-clock expiry; `None` for an indefinite mute
    pub end_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub reason: String,
    #[serde(rename = "admin_id")]
    pub issuer: MuteIssuer,
}

impl MuteRecord {
    /// Check if the mute has run out at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: NaiveDateTime) -> bool {
        self.end_time.is_some_and(|end_time| end_time <= now)
    }

    #[must_use]
    pub fn is_indefinite(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Everything the bot remembers between restarts
///
/// Both keys are required on disk; a file missing either one is treated as
/// having no prior state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub warns: BTreeMap<UserId, u32>,
    pub mutes: BTreeMap<UserId, MuteRecord>,
}

impl PersistedState {
    #[must_use]
    pub fn warn_count(&self, user_id: UserId) -> u32 {
        self.warns.get(&user_id).copied().unwrap_or_default()
    }

    /// Users whose mute has expired at `now`
    #[must_use]
    pub fn expired_mutes(&self, now: NaiveDateTime) -> Vec<UserId> {
        self.mutes
            .iter()
            .filter(|(_, record)| record.is_expired_at(now))
            .map(|(user_id, _)| *user_id)
            .collect()
    }
}

/// Errors raised while writing the state file
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// JSON file backing the persisted state
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state file
    ///
    /// A missing, unreadable or malformed file yields an empty state.
    pub async fn load(&self) -> PersistedState {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    path = %self.path.display(),
                    "State file not found, starting with empty state"
                );
                return PersistedState::default();
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read state file, starting with empty state"
                );
                return PersistedState::default();
            }
        };

        match serde_json::from_str::<PersistedState>(&content) {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    warns = state.warns.len(),
                    mutes = state.mutes.len(),
                    "Loaded moderation state"
                );
                state
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file is corrupt or has the wrong shape, starting with empty state"
                );
                PersistedState::default()
            }
        }
    }

    /// Save the full state
    ///
    /// The document is written to a sibling temporary file and renamed over
    /// the state file, so a reader sees either the old or the new content.
    ///
    /// # Errors
    /// Returns an error if the state cannot be encoded or written.
    pub async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, json).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "state".into(), |name| name.to_string_lossy());
        self.path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProgressError, ProgressResult};

/// Highest profile id an identity may own
pub const MAX_PROFILE_ID: i32 = 5;

fn default_episode_id() -> i32 {
    1
}

/// Identity tuple of one progress record: (identity, profile, content, episode)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressKey {
    #[serde(rename = "userId")]
    pub identity: String,
    pub profile_id: i32,
    pub content_id: i64,
    #[serde(default = "default_episode_id")]
    pub episode_id: i32,
}

impl ProgressKey {
    pub fn new(identity: impl Into<String>, profile_id: i32, content_id: i64, episode_id: i32) -> Self {
        Self {
            identity: identity.into(),
            profile_id,
            content_id,
            episode_id,
        }
    }

    /// Same identity, profile and content, different episode
    pub fn with_episode(&self, episode_id: i32) -> Self {
        Self {
            episode_id,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> ProgressResult<()> {
        validate_profile(&self.identity, self.profile_id)?;
        if self.content_id <= 0 {
            return Err(ProgressError::Validation(format!(
                "content id must be positive, got {}",
                self.content_id
            )));
        }
        if self.episode_id <= 0 {
            return Err(ProgressError::Validation(format!(
                "episode id must be positive, got {}",
                self.episode_id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.identity, self.profile_id, self.content_id, self.episode_id
        )
    }
}

/// Validates the (identity, profile) pair shared by every store query
pub fn validate_profile(identity: &str, profile_id: i32) -> ProgressResult<()> {
    if identity.trim().is_empty() {
        return Err(ProgressError::Validation("identity is required".to_string()));
    }
    if !(1..=MAX_PROFILE_ID).contains(&profile_id) {
        return Err(ProgressError::Validation(format!(
            "profile id must be between 1 and {}, got {}",
            MAX_PROFILE_ID, profile_id
        )));
    }
    Ok(())
}

/// Derives the rounded watch percentage, clamped to 0..=100
///
/// A zero duration yields 0.
pub fn watch_percentage(current_time: f64, duration: f64) -> u8 {
    if duration <= 0.0 {
        return 0;
    }
    let pct = (current_time / duration * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Write payload for an ordinary progress upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(flatten)]
    pub key: ProgressKey,
    pub current_time: f64,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<String>,
}

impl ProgressUpdate {
    /// Rejects payloads the store can never persist
    pub fn validate(&self) -> ProgressResult<()> {
        self.key.validate()?;
        if !self.current_time.is_finite() || self.current_time < 0.0 {
            return Err(ProgressError::Validation(format!(
                "current time must be a non-negative number, got {}",
                self.current_time
            )));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(ProgressError::Validation(format!(
                "duration must be a non-negative number, got {}",
                self.duration
            )));
        }
        if self.duration <= 0.0 && self.current_time > 0.0 {
            return Err(ProgressError::Validation(
                "duration must be positive when current time is set".to_string(),
            ));
        }
        Ok(())
    }
}

/// One persisted playback position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    #[serde(flatten)]
    pub key: ProgressKey,
    pub current_time: f64,
    pub duration: f64,
    pub watch_percentage: u8,
    pub completed: bool,
    pub last_watched_at: DateTime<Utc>,
    pub device_info: String,
}

impl ProgressRecord {
    /// Builds a fresh record from a validated update
    pub fn from_update(update: ProgressUpdate, completion_threshold: u8, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            key: update.key,
            current_time: 0.0,
            duration: 0.0,
            watch_percentage: 0,
            completed: false,
            last_watched_at: now,
            device_info: update
                .device_info
                .unwrap_or_else(|| "unknown".to_string()),
        };
        record.set_position(update.current_time, update.duration, completion_threshold);
        record
    }

    /// Applies an update to an existing record in place
    ///
    /// The device string is only replaced when the update carries one.
    pub fn apply_update(&mut self, update: ProgressUpdate, completion_threshold: u8, now: DateTime<Utc>) {
        self.set_position(update.current_time, update.duration, completion_threshold);
        if let Some(device_info) = update.device_info {
            self.device_info = device_info;
        }
        self.last_watched_at = now;
    }

    /// Marks the record as fully watched: the position jumps to the end
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.current_time = self.duration;
        self.watch_percentage = 100;
        self.completed = true;
        self.last_watched_at = now;
    }

    // Percentage and completion are only ever written here.
    fn set_position(&mut self, current_time: f64, duration: f64, completion_threshold: u8) {
        self.current_time = current_time;
        self.duration = duration;
        self.watch_percentage = watch_percentage(current_time, duration);
        self.completed = self.watch_percentage >= completion_threshold;
    }
}

/// Aggregate viewing numbers for one profile
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStatistics {
    pub total_watch_time_hours: f64,
    pub total_content_count: usize,
    pub completed_content_count: usize,
    pub average_watch_percentage: f64,
}

impl WatchStatistics {
    /// Folds a profile's records into statistics
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ProgressRecord>) -> Self {
        let mut total_seconds = 0.0;
        let mut content = std::collections::HashSet::new();
        let mut completed = 0;
        let mut percentage_sum = 0.0;
        let mut count = 0usize;

        for record in records {
            total_seconds += record.current_time;
            content.insert(record.key.content_id);
            if record.completed {
                completed += 1;
            }
            percentage_sum += f64::from(record.watch_percentage);
            count += 1;
        }

        if count == 0 {
            return Self::default();
        }

        Self {
            total_watch_time_hours: round_to_hundredths(total_seconds / 3600.0),
            total_content_count: content.len(),
            completed_content_count: completed,
            average_watch_percentage: round_to_hundredths(percentage_sum / count as f64),
        }
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    error::ProgressResult,
    models::{EpisodeInfo, ProgressKey, ProgressRecord},
    store::ProgressStore,
};

/// Per-episode progress shown on an episode list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeProgress {
    pub current_time: f64,
    pub duration: f64,
    pub percentage: f64,
    pub completed: bool,
}

/// State owned by one active player instance
///
/// Holds the tuple being played and a possibly-stale cache of the content's
/// episode progress keyed by episode id. Nothing here outlives the session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    session_id: Uuid,
    key: ProgressKey,
    device_info: String,
    episode_cache: HashMap<i32, ProgressRecord>,
}

impl SessionContext {
    pub fn new(key: ProgressKey, device_info: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            key,
            device_info: device_info.into(),
            episode_cache: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn key(&self) -> &ProgressKey {
        &self.key
    }

    pub fn device_info(&self) -> &str {
        &self.device_info
    }

    /// Moves the session to another episode of the same content
    pub fn switch_episode(&mut self, episode_id: i32) {
        self.key = self.key.with_episode(episode_id);
    }

    /// Rebuilds the episode cache from the store
    ///
    /// On failure the cache is left untouched.
    pub async fn load_episode_progress(&mut self, store: &dyn ProgressStore) -> ProgressResult<usize> {
        let records = store
            .list_progress_for_content(&self.key.identity, self.key.profile_id, self.key.content_id)
            .await?;

        self.episode_cache = records
            .into_iter()
            .map(|r| (r.key.episode_id, r))
            .collect();

        Ok(self.episode_cache.len())
    }

    /// Updates the cache with a record from a write or a remote poll
    ///
    /// Records for other content or profiles are ignored.
    pub fn remember(&mut self, record: ProgressRecord) {
        let key = &record.key;
        if key.identity == self.key.identity
            && key.profile_id == self.key.profile_id
            && key.content_id == self.key.content_id
        {
            self.episode_cache.insert(key.episode_id, record);
        }
    }

    pub fn cached_record(&self, episode_id: i32) -> Option<&ProgressRecord> {
        self.episode_cache.get(&episode_id)
    }

    /// Progress for an episode the viewer has actually started
    pub fn episode_progress(&self, episode_id: i32) -> Option<EpisodeProgress> {
        let record = self.episode_cache.get(&episode_id)?;
        if record.current_time <= 0.0 {
            return None;
        }
        let percentage = if record.duration > 0.0 {
            (record.current_time / record.duration * 100.0).min(100.0)
        } else {
            0.0
        };
        Some(EpisodeProgress {
            current_time: record.current_time,
            duration: record.duration,
            percentage,
            completed: record.completed,
        })
    }

    /// The episode following the one being played
    pub fn next_episode<'a>(&self, episodes: &'a [EpisodeInfo]) -> Option<&'a EpisodeInfo> {
        episodes
            .iter()
            .find(|ep| ep.episode_id == self.key.episode_id + 1)
    }

    pub fn previous_episode<'a>(&self, episodes: &'a [EpisodeInfo]) -> Option<&'a EpisodeInfo> {
        episodes
            .iter()
            .find(|ep| ep.episode_id == self.key.episode_id - 1)
    }
}

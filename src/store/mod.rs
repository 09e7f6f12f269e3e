//! Durable watch-progress storage
//!
//! The sync agent and the continuity resolver only ever talk to a
//! [`ProgressStore`]. Implementations decide where records live (process
//! memory, Postgres, or the remote progress service over HTTP) but must all
//! keep at most one record per (identity, profile, content, episode) tuple and
//! derive percentage/completion from the position at every write.
//!
//! ```
//! use watch_progress::models::{ProgressKey, ProgressUpdate};
//! use watch_progress::{InMemoryProgressStore, ProgressStore};
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryProgressStore::default();
//! let key = ProgressKey::new("user-1", 1, 42, 1);
//! let update = ProgressUpdate {
//!     key: key.clone(),
//!     current_time: 950.0,
//!     duration: 1000.0,
//!     device_info: None,
//! };
//! store.upsert_progress(update).await.unwrap();
//!
//! let record = store.find_progress(&key).await.unwrap().unwrap();
//! assert_eq!(record.watch_percentage, 95);
//! assert!(record.completed);
//! # });
//! ```

use chrono::{DateTime, Utc};

use crate::{
    error::ProgressResult,
    models::{ProgressKey, ProgressRecord, ProgressUpdate, WatchStatistics},
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryProgressStore;
pub use postgres::{create_pool, PgProgressStore};

/// Thresholds applied by store implementations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressPolicy {
    /// Percentage at which a record is marked completed
    pub completion_threshold: u8,
    /// Recent history skips records below this position
    pub trivial_watch_secs: f64,
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        Self {
            completion_threshold: 90,
            trivial_watch_secs: 120.0,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ProgressStore: Send + Sync {
    /// Looks up the record for one tuple
    async fn find_progress(&self, key: &ProgressKey) -> ProgressResult<Option<ProgressRecord>>;

    /// Creates or updates the record for the update's tuple
    ///
    /// Fails with a validation error when the payload cannot be stored, e.g. a
    /// positive position with no duration.
    async fn upsert_progress(&self, update: ProgressUpdate) -> ProgressResult<ProgressRecord>;

    /// Marks an existing record as completed (position = duration, 100%)
    ///
    /// Returns `NotFound` when the tuple has no record yet.
    async fn mark_completed(&self, key: &ProgressKey) -> ProgressResult<ProgressRecord>;

    /// Most recently watched first, skipping trivial opens
    async fn list_recent_progress(
        &self,
        identity: &str,
        profile_id: i32,
        limit: usize,
    ) -> ProgressResult<Vec<ProgressRecord>>;

    /// Every episode's record for one content, by episode id ascending
    async fn list_progress_for_content(
        &self,
        identity: &str,
        profile_id: i32,
        content_id: i64,
    ) -> ProgressResult<Vec<ProgressRecord>>;

    /// Records written after `since` (all when `None`), most recent first
    async fn list_updated_since(
        &self,
        identity: &str,
        profile_id: i32,
        since: Option<DateTime<Utc>>,
    ) -> ProgressResult<Vec<ProgressRecord>>;

    /// Aggregate viewing statistics for a profile
    async fn watch_statistics(
        &self,
        identity: &str,
        profile_id: i32,
    ) -> ProgressResult<WatchStatistics>;
}

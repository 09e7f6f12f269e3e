use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::{ProgressError, ProgressResult},
    models::{validate_profile, ProgressKey, ProgressRecord, ProgressUpdate, WatchStatistics},
    store::{ProgressPolicy, ProgressStore},
};

/// Process-local store keyed by the progress tuple
#[derive(Default)]
pub struct InMemoryProgressStore {
    policy: ProgressPolicy,
    records: RwLock<HashMap<ProgressKey, ProgressRecord>>,
}

impl InMemoryProgressStore {
    pub fn new(policy: ProgressPolicy) -> Self {
        Self {
            policy,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a record as-is, bypassing derivation
    ///
    /// Lets callers seed state written by another device at a chosen time.
    pub async fn insert_record(&self, record: ProgressRecord) {
        self.records.write().await.insert(record.key.clone(), record);
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn profile_records(&self, identity: &str, profile_id: i32) -> Vec<ProgressRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.key.identity == identity && r.key.profile_id == profile_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn find_progress(&self, key: &ProgressKey) -> ProgressResult<Option<ProgressRecord>> {
        key.validate()?;
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn upsert_progress(&self, update: ProgressUpdate) -> ProgressResult<ProgressRecord> {
        update.validate()?;
        let now = Utc::now();
        let threshold = self.policy.completion_threshold;

        let mut records = self.records.write().await;
        let record = match records.get_mut(&update.key) {
            Some(existing) => {
                existing.apply_update(update, threshold, now);
                existing.clone()
            }
            None => {
                let record = ProgressRecord::from_update(update, threshold, now);
                records.insert(record.key.clone(), record.clone());
                record
            }
        };

        tracing::debug!(
            key = %record.key,
            current_time = record.current_time,
            watch_percentage = record.watch_percentage,
            "Stored progress"
        );

        Ok(record)
    }

    async fn mark_completed(&self, key: &ProgressKey) -> ProgressResult<ProgressRecord> {
        key.validate()?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| ProgressError::NotFound(format!("progress {}", key)))?;
        record.complete(Utc::now());
        Ok(record.clone())
    }

    async fn list_recent_progress(
        &self,
        identity: &str,
        profile_id: i32,
        limit: usize,
    ) -> ProgressResult<Vec<ProgressRecord>> {
        validate_profile(identity, profile_id)?;
        let mut recent: Vec<ProgressRecord> = self
            .profile_records(identity, profile_id)
            .await
            .into_iter()
            .filter(|r| r.current_time >= self.policy.trivial_watch_secs)
            .collect();
        recent.sort_by(|a, b| b.last_watched_at.cmp(&a.last_watched_at));
        recent.truncate(limit);
        Ok(recent)
    }

    async fn list_progress_for_content(
        &self,
        identity: &str,
        profile_id: i32,
        content_id: i64,
    ) -> ProgressResult<Vec<ProgressRecord>> {
        validate_profile(identity, profile_id)?;
        let mut episodes: Vec<ProgressRecord> = self
            .profile_records(identity, profile_id)
            .await
            .into_iter()
            .filter(|r| r.key.content_id == content_id)
            .collect();
        episodes.sort_by_key(|r| r.key.episode_id);
        Ok(episodes)
    }

    async fn list_updated_since(
        &self,
        identity: &str,
        profile_id: i32,
        since: Option<DateTime<Utc>>,
    ) -> ProgressResult<Vec<ProgressRecord>> {
        validate_profile(identity, profile_id)?;
        let mut updates: Vec<ProgressRecord> = self
            .profile_records(identity, profile_id)
            .await
            .into_iter()
            .filter(|r| since.map_or(true, |since| r.last_watched_at > since))
            .collect();
        updates.sort_by(|a, b| b.last_watched_at.cmp(&a.last_watched_at));
        Ok(updates)
    }

    async fn watch_statistics(
        &self,
        identity: &str,
        profile_id: i32,
    ) -> ProgressResult<WatchStatistics> {
        validate_profile(identity, profile_id)?;
        let records = self.profile_records(identity, profile_id).await;
        Ok(WatchStatistics::from_records(&records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tokio_test::assert_ok;

    fn update(content_id: i64, episode_id: i32, current_time: f64, duration: f64) -> ProgressUpdate {
        ProgressUpdate {
            key: ProgressKey::new("user-1", 1, content_id, episode_id),
            current_time,
            duration,
            device_info: None,
        }
    }

    fn record_at(key: ProgressKey, current_time: f64, last_watched_at: DateTime<Utc>) -> ProgressRecord {
        let mut record =
            ProgressRecord::from_update(
                ProgressUpdate {
                    key,
                    current_time,
                    duration: 3000.0,
                    device_info: None,
                },
                90,
                last_watched_at,
            );
        record.last_watched_at = last_watched_at;
        record
    }

    #[tokio::test]
    async fn test_repeated_upserts_keep_one_record() {
        let store = InMemoryProgressStore::default();
        for t in [10.0, 200.0, 450.0, 300.0] {
            assert_ok!(store.upsert_progress(update(42, 1, t, 1000.0)).await);
        }

        assert_eq!(store.len().await, 1);
        let record = store
            .find_progress(&ProgressKey::new("user-1", 1, 42, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.current_time, 300.0);
        assert_eq!(record.watch_percentage, 30);
        assert!(!record.completed);
    }

    #[tokio::test]
    async fn test_upsert_rejects_position_without_duration() {
        let store = InMemoryProgressStore::default();
        let err = store.upsert_progress(update(42, 1, 30.0, 0.0)).await.unwrap_err();
        assert!(matches!(err, ProgressError::Validation(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_upsert_uses_configured_threshold() {
        let store = InMemoryProgressStore::new(ProgressPolicy {
            completion_threshold: 95,
            trivial_watch_secs: 120.0,
        });
        let record = store.upsert_progress(update(42, 1, 920.0, 1000.0)).await.unwrap();
        assert_eq!(record.watch_percentage, 92);
        assert!(!record.completed);
    }

    #[tokio::test]
    async fn test_mark_completed_requires_record() {
        let store = InMemoryProgressStore::default();
        let key = ProgressKey::new("user-1", 1, 42, 1);
        let err = store.mark_completed(&key).await.unwrap_err();
        assert!(matches!(err, ProgressError::NotFound(_)));

        store.upsert_progress(update(42, 1, 600.0, 1000.0)).await.unwrap();
        let record = store.mark_completed(&key).await.unwrap();
        assert!(record.completed);
        assert_eq!(record.watch_percentage, 100);
        assert_eq!(record.current_time, 1000.0);
    }

    #[tokio::test]
    async fn test_recent_history_skips_trivial_watches() {
        let store = InMemoryProgressStore::default();
        let now = Utc::now();
        store
            .insert_record(record_at(ProgressKey::new("user-1", 1, 1, 1), 119.0, now))
            .await;
        store
            .insert_record(record_at(
                ProgressKey::new("user-1", 1, 2, 1),
                120.0,
                now - Duration::minutes(5),
            ))
            .await;
        store
            .insert_record(record_at(
                ProgressKey::new("user-1", 1, 3, 1),
                900.0,
                now - Duration::minutes(1),
            ))
            .await;

        let history = store.list_recent_progress("user-1", 1, 10).await.unwrap();
        let contents: Vec<i64> = history.iter().map(|r| r.key.content_id).collect();
        assert_eq!(contents, vec![3, 2]);
        assert!(history.iter().all(|r| r.current_time >= 120.0));

        let limited = store.list_recent_progress("user-1", 1, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].key.content_id, 3);
    }

    #[tokio::test]
    async fn test_content_progress_ordered_by_episode() {
        let store = InMemoryProgressStore::default();
        for episode in [3, 1, 2] {
            store.upsert_progress(update(42, episode, 60.0, 1000.0)).await.unwrap();
        }
        store.upsert_progress(update(99, 1, 60.0, 1000.0)).await.unwrap();

        let episodes = store.list_progress_for_content("user-1", 1, 42).await.unwrap();
        let ids: Vec<i32> = episodes.iter().map(|r| r.key.episode_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_profiles_are_isolated() {
        let store = InMemoryProgressStore::default();
        store.upsert_progress(update(42, 1, 600.0, 1000.0)).await.unwrap();

        let other = store.list_progress_for_content("user-1", 2, 42).await.unwrap();
        assert!(other.is_empty());
        let other = store.list_recent_progress("user-2", 1, 10).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_updated_since_filters_by_time() {
        let store = InMemoryProgressStore::default();
        let now = Utc::now();
        store
            .insert_record(record_at(
                ProgressKey::new("user-1", 1, 1, 1),
                300.0,
                now - Duration::minutes(10),
            ))
            .await;
        store
            .insert_record(record_at(ProgressKey::new("user-1", 1, 2, 1), 300.0, now))
            .await;

        let all = store.list_updated_since("user-1", 1, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key.content_id, 2);

        let recent = store
            .list_updated_since("user-1", 1, Some(now - Duration::minutes(1)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].key.content_id, 2);
    }

    #[tokio::test]
    async fn test_invalid_profile_rejected() {
        let store = InMemoryProgressStore::default();
        let err = store.list_recent_progress("user-1", 0, 10).await.unwrap_err();
        assert!(matches!(err, ProgressError::Validation(_)));
    }

    #[tokio::test]
    async fn test_statistics_cover_profile() {
        let store = InMemoryProgressStore::default();
        store.upsert_progress(update(1, 1, 3600.0, 3600.0)).await.unwrap();
        store.upsert_progress(update(1, 2, 0.0, 3600.0)).await.unwrap();

        let stats = store.watch_statistics("user-1", 1).await.unwrap();
        assert_eq!(stats.total_content_count, 1);
        assert_eq!(stats.completed_content_count, 1);
        assert_eq!(stats.total_watch_time_hours, 1.0);
        assert_eq!(stats.average_watch_percentage, 50.0);
    }
}

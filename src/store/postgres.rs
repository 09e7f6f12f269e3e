use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    error::{ProgressError, ProgressResult},
    models::{validate_profile, watch_percentage, ProgressKey, ProgressRecord, ProgressUpdate, WatchStatistics},
    store::{ProgressPolicy, ProgressStore},
};

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

const RECORD_COLUMNS: &str = "user_id, profile_id, content_id, episode_id, current_time_secs, \
     duration_secs, watch_percentage, completed, last_watched_at, device_info";

#[derive(Debug, sqlx::FromRow)]
struct ProgressRow {
    user_id: String,
    profile_id: i32,
    content_id: i64,
    episode_id: i32,
    current_time_secs: f64,
    duration_secs: f64,
    watch_percentage: i16,
    completed: bool,
    last_watched_at: DateTime<Utc>,
    device_info: String,
}

impl From<ProgressRow> for ProgressRecord {
    fn from(row: ProgressRow) -> Self {
        ProgressRecord {
            key: ProgressKey {
                identity: row.user_id,
                profile_id: row.profile_id,
                content_id: row.content_id,
                episode_id: row.episode_id,
            },
            current_time: row.current_time_secs,
            duration: row.duration_secs,
            watch_percentage: row.watch_percentage.clamp(0, 100) as u8,
            completed: row.completed,
            last_watched_at: row.last_watched_at,
            device_info: row.device_info,
        }
    }
}

/// Postgres-backed store over the `watch_progress` table
#[derive(Clone)]
pub struct PgProgressStore {
    pool: PgPool,
    policy: ProgressPolicy,
}

impl PgProgressStore {
    pub fn new(pool: PgPool, policy: ProgressPolicy) -> Self {
        Self { pool, policy }
    }

    /// Applies pending schema migrations
    pub async fn migrate(&self) -> ProgressResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProgressError::Internal(format!("Migration failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProgressStore for PgProgressStore {
    async fn find_progress(&self, key: &ProgressKey) -> ProgressResult<Option<ProgressRecord>> {
        key.validate()?;
        let row = sqlx::query_as::<_, ProgressRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM watch_progress \
             WHERE user_id = $1 AND profile_id = $2 AND content_id = $3 AND episode_id = $4"
        ))
        .bind(&key.identity)
        .bind(key.profile_id)
        .bind(key.content_id)
        .bind(key.episode_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProgressRecord::from))
    }

    async fn upsert_progress(&self, update: ProgressUpdate) -> ProgressResult<ProgressRecord> {
        update.validate()?;
        let percentage = watch_percentage(update.current_time, update.duration);
        let completed = percentage >= self.policy.completion_threshold;

        let row = sqlx::query_as::<_, ProgressRow>(&format!(
            r#"
            INSERT INTO watch_progress
                (user_id, profile_id, content_id, episode_id, current_time_secs, duration_secs,
                 watch_percentage, completed, last_watched_at, device_info)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, 'unknown'))
            ON CONFLICT (user_id, profile_id, content_id, episode_id) DO UPDATE SET
                current_time_secs = EXCLUDED.current_time_secs,
                duration_secs = EXCLUDED.duration_secs,
                watch_percentage = EXCLUDED.watch_percentage,
                completed = EXCLUDED.completed,
                last_watched_at = EXCLUDED.last_watched_at,
                device_info = COALESCE($10, watch_progress.device_info),
                updated_at = NOW()
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(&update.key.identity)
        .bind(update.key.profile_id)
        .bind(update.key.content_id)
        .bind(update.key.episode_id)
        .bind(update.current_time)
        .bind(update.duration)
        .bind(i16::from(percentage))
        .bind(completed)
        .bind(Utc::now())
        .bind(update.device_info.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn mark_completed(&self, key: &ProgressKey) -> ProgressResult<ProgressRecord> {
        key.validate()?;
        let row = sqlx::query_as::<_, ProgressRow>(&format!(
            r#"
            UPDATE watch_progress SET
                current_time_secs = duration_secs,
                watch_percentage = 100,
                completed = TRUE,
                last_watched_at = $5,
                updated_at = NOW()
            WHERE user_id = $1 AND profile_id = $2 AND content_id = $3 AND episode_id = $4
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(&key.identity)
        .bind(key.profile_id)
        .bind(key.content_id)
        .bind(key.episode_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProgressRecord::from)
            .ok_or_else(|| ProgressError::NotFound(format!("progress {}", key)))
    }

    async fn list_recent_progress(
        &self,
        identity: &str,
        profile_id: i32,
        limit: usize,
    ) -> ProgressResult<Vec<ProgressRecord>> {
        validate_profile(identity, profile_id)?;
        let rows = sqlx::query_as::<_, ProgressRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM watch_progress \
             WHERE user_id = $1 AND profile_id = $2 AND current_time_secs >= $3 \
             ORDER BY last_watched_at DESC LIMIT $4"
        ))
        .bind(identity)
        .bind(profile_id)
        .bind(self.policy.trivial_watch_secs)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProgressRecord::from).collect())
    }

    async fn list_progress_for_content(
        &self,
        identity: &str,
        profile_id: i32,
        content_id: i64,
    ) -> ProgressResult<Vec<ProgressRecord>> {
        validate_profile(identity, profile_id)?;
        let rows = sqlx::query_as::<_, ProgressRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM watch_progress \
             WHERE user_id = $1 AND profile_id = $2 AND content_id = $3 \
             ORDER BY episode_id ASC"
        ))
        .bind(identity)
        .bind(profile_id)
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProgressRecord::from).collect())
    }

    async fn list_updated_since(
        &self,
        identity: &str,
        profile_id: i32,
        since: Option<DateTime<Utc>>,
    ) -> ProgressResult<Vec<ProgressRecord>> {
        validate_profile(identity, profile_id)?;
        let rows = sqlx::query_as::<_, ProgressRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM watch_progress \
             WHERE user_id = $1 AND profile_id = $2 \
               AND ($3::TIMESTAMPTZ IS NULL OR last_watched_at > $3) \
             ORDER BY last_watched_at DESC"
        ))
        .bind(identity)
        .bind(profile_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProgressRecord::from).collect())
    }

    async fn watch_statistics(
        &self,
        identity: &str,
        profile_id: i32,
    ) -> ProgressResult<WatchStatistics> {
        validate_profile(identity, profile_id)?;
        let (total_seconds, content_count, completed_count, average): (
            Option<f64>,
            i64,
            i64,
            Option<f64>,
        ) = sqlx::query_as(
            r#"
            SELECT
                SUM(current_time_secs),
                COUNT(DISTINCT content_id),
                COUNT(*) FILTER (WHERE completed),
                AVG(watch_percentage)::DOUBLE PRECISION
            FROM watch_progress
            WHERE user_id = $1 AND profile_id = $2
            "#,
        )
        .bind(identity)
        .bind(profile_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(WatchStatistics {
            total_watch_time_hours: (total_seconds.unwrap_or(0.0) / 3600.0 * 100.0).round() / 100.0,
            total_content_count: content_count.max(0) as usize,
            completed_content_count: completed_count.max(0) as usize,
            average_watch_percentage: (average.unwrap_or(0.0) * 100.0).round() / 100.0,
        })
    }
}

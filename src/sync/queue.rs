use tokio::time::Instant;

use crate::models::{ProgressKey, ProgressUpdate};

/// What a pending task will write
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    /// Ordinary position write
    Progress(ProgressUpdate),
    /// End-of-playback completion write
    Completion {
        key: ProgressKey,
        duration: f64,
        device_info: Option<String>,
    },
}

impl TaskPayload {
    pub fn key(&self) -> &ProgressKey {
        match self {
            TaskPayload::Progress(update) => &update.key,
            TaskPayload::Completion { key, .. } => key,
        }
    }

    /// Equivalent ordinary upsert; a completion becomes position = duration
    pub fn as_update(&self) -> ProgressUpdate {
        match self {
            TaskPayload::Progress(update) => update.clone(),
            TaskPayload::Completion {
                key,
                duration,
                device_info,
            } => ProgressUpdate {
                key: key.clone(),
                current_time: *duration,
                duration: *duration,
                device_info: device_info.clone(),
            },
        }
    }
}

/// A pending outbound write
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub payload: TaskPayload,
    pub created_at: Instant,
    /// Attempts already made
    pub attempts: u32,
    /// Earliest time the next attempt may run
    pub not_before: Instant,
}

impl SyncTask {
    pub fn new(payload: TaskPayload, now: Instant) -> Self {
        Self {
            payload,
            created_at: now,
            attempts: 0,
            not_before: now,
        }
    }

    fn slot(&self) -> (i64, i32) {
        slot_of(self.payload.key())
    }
}

fn slot_of(key: &ProgressKey) -> (i64, i32) {
    (key.content_id, key.episode_id)
}

/// Outbound queue holding at most one task per (content, episode)
#[derive(Debug, Default)]
pub struct SyncQueue {
    tasks: Vec<SyncTask>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a fresh task, replacing any unsent task for the same episode
    ///
    /// Returns true when an older task was superseded.
    pub fn enqueue(&mut self, payload: TaskPayload, now: Instant) -> bool {
        let superseded = self.discard(payload.key());
        self.tasks.push(SyncTask::new(payload, now));
        superseded
    }

    /// Puts a failed task back for a later attempt
    ///
    /// A newer task for the same episode wins; the retry is dropped and
    /// false is returned.
    pub fn requeue(&mut self, mut task: SyncTask, not_before: Instant) -> bool {
        let slot = task.slot();
        if self.tasks.iter().any(|t| t.slot() == slot) {
            return false;
        }
        task.not_before = not_before;
        self.tasks.push(task);
        true
    }

    /// Removes the pending task for an episode, if any
    pub fn discard(&mut self, key: &ProgressKey) -> bool {
        let slot = slot_of(key);
        let before = self.tasks.len();
        self.tasks.retain(|t| t.slot() != slot);
        self.tasks.len() != before
    }

    /// Takes up to `max` tasks whose backoff has elapsed, oldest first
    pub fn take_ready(&mut self, max: usize, now: Instant) -> Vec<SyncTask> {
        let mut ready = Vec::new();
        let mut waiting = Vec::with_capacity(self.tasks.len());
        for task in self.tasks.drain(..) {
            if ready.len() < max && task.not_before <= now {
                ready.push(task);
            } else {
                waiting.push(task);
            }
        }
        self.tasks = waiting;
        ready
    }

    pub fn has_ready(&self, now: Instant) -> bool {
        self.tasks.iter().any(|t| t.not_before <= now)
    }

    /// When the earliest waiting task becomes ready
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.tasks.iter().map(|t| t.not_before).min()
    }

    /// Empties the queue regardless of backoff
    pub fn drain_all(&mut self) -> Vec<SyncTask> {
        std::mem::take(&mut self.tasks)
    }

    pub fn get(&self, content_id: i64, episode_id: i32) -> Option<&SyncTask> {
        self.tasks.iter().find(|t| t.slot() == (content_id, episode_id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn progress(episode_id: i32, current_time: f64) -> TaskPayload {
        TaskPayload::Progress(ProgressUpdate {
            key: ProgressKey::new("user-1", 1, 42, episode_id),
            current_time,
            duration: 1000.0,
            device_info: None,
        })
    }

    #[test]
    fn test_enqueue_supersedes_same_episode() {
        let mut queue = SyncQueue::new();
        let now = Instant::now();

        assert!(!queue.enqueue(progress(1, 10.0), now));
        assert!(queue.enqueue(progress(1, 20.0), now));

        assert_eq!(queue.len(), 1);
        let task = queue.get(42, 1).unwrap();
        assert_eq!(task.payload.as_update().current_time, 20.0);
    }

    #[test]
    fn test_enqueue_keeps_other_episodes() {
        let mut queue = SyncQueue::new();
        let now = Instant::now();
        queue.enqueue(progress(1, 10.0), now);
        queue.enqueue(progress(2, 10.0), now);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_completion_supersedes_progress() {
        let mut queue = SyncQueue::new();
        let now = Instant::now();
        queue.enqueue(progress(1, 10.0), now);
        queue.enqueue(
            TaskPayload::Completion {
                key: ProgressKey::new("user-1", 1, 42, 1),
                duration: 1000.0,
                device_info: None,
            },
            now,
        );

        assert_eq!(queue.len(), 1);
        let update = queue.get(42, 1).unwrap().payload.as_update();
        assert_eq!(update.current_time, 1000.0);
        assert_eq!(update.duration, 1000.0);
    }

    #[test]
    fn test_requeue_loses_to_newer_task() {
        let mut queue = SyncQueue::new();
        let now = Instant::now();
        queue.enqueue(progress(1, 10.0), now);
        let failed = queue.take_ready(5, now).pop().unwrap();

        queue.enqueue(progress(1, 30.0), now);
        assert!(!queue.requeue(failed, now + Duration::from_secs(1)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(42, 1).unwrap().payload.as_update().current_time, 30.0);
    }

    #[test]
    fn test_take_ready_respects_backoff_and_batch_size() {
        let mut queue = SyncQueue::new();
        let now = Instant::now();
        for episode in 1..=7 {
            queue.enqueue(progress(episode, 10.0), now);
        }
        let delayed = queue.take_ready(1, now).pop().unwrap();
        assert!(queue.requeue(delayed, now + Duration::from_secs(2)));

        let batch = queue.take_ready(5, now);
        assert_eq!(batch.len(), 5);
        assert_eq!(queue.len(), 2);

        let batch = queue.take_ready(5, now);
        assert_eq!(batch.len(), 1);
        assert!(!queue.has_ready(now));
        assert_eq!(queue.next_ready_at(), Some(now + Duration::from_secs(2)));
        assert_eq!(queue.take_ready(5, now + Duration::from_secs(2)).len(), 1);
    }

    #[test]
    fn test_drain_all_ignores_backoff() {
        let mut queue = SyncQueue::new();
        let now = Instant::now();
        queue.enqueue(progress(1, 10.0), now);
        let task = queue.take_ready(1, now).pop().unwrap();
        queue.requeue(task, now + Duration::from_secs(60));

        assert_eq!(queue.drain_all().len(), 1);
        assert!(queue.is_empty());
    }
}

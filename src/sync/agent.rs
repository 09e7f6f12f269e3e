use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::{
    client::Beacon,
    context::SessionContext,
    error::{ProgressError, ProgressResult},
    models::{PlaybackEvent, PlayerSignal, Playhead, ProgressRecord, ProgressUpdate},
    store::ProgressStore,
    sync::{
        queue::{SyncQueue, SyncTask, TaskPayload},
        retry::RetryPolicy,
        schedule::PeriodicTask,
        state::{transition, PlaybackState, SyncCommand, TransitionContext},
    },
};

/// Tunables for the sync agent
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Periodic tick cadence and minimum gap between periodic writes
    pub sync_interval: Duration,
    /// Position change between reports that counts as a manual scrub
    pub time_jump_threshold_secs: f64,
    /// Queue sends in flight at once
    pub batch_size: usize,
    /// Pause between queue batches
    pub batch_pause: Duration,
    pub retry: RetryPolicy,
    pub device_info: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(5),
            time_jump_threshold_secs: 5.0,
            batch_size: 5,
            batch_pause: Duration::from_millis(100),
            retry: RetryPolicy::default(),
            device_info: "unknown".to_string(),
        }
    }
}

/// Decides when the active session's position is written
///
/// Driven one event at a time from a single task. Every event goes through
/// the pure [`transition`] function; the agent only executes the commands it
/// returns.
pub struct ProgressSyncAgent {
    store: Arc<dyn ProgressStore>,
    beacon: Arc<dyn Beacon>,
    settings: SyncSettings,
    context: SessionContext,
    state: PlaybackState,
    queue: SyncQueue,
    playhead: Playhead,
    last_known_position: Option<f64>,
    last_sync: Option<Instant>,
    ticker: Option<PeriodicTask>,
}

impl ProgressSyncAgent {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        beacon: Arc<dyn Beacon>,
        context: SessionContext,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            beacon,
            settings,
            context,
            state: PlaybackState::Idle,
            queue: SyncQueue::new(),
            playhead: Playhead::default(),
            last_known_position: None,
            last_sync: None,
            ticker: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SessionContext {
        &mut self.context
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn playhead(&self) -> Playhead {
        self.playhead
    }

    /// Time of the last write the store acknowledged
    pub fn last_sync(&self) -> Option<Instant> {
        self.last_sync
    }

    pub fn is_periodic_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub async fn handle_signal(&mut self, signal: PlayerSignal) {
        self.handle(signal.event, signal.playhead).await;
    }

    /// Applies one playback event with the playhead it was reported at
    pub async fn handle(&mut self, event: PlaybackEvent, playhead: Playhead) {
        self.playhead = playhead;

        let position_jump = match self.last_known_position {
            Some(last) if last > 0.0 && playhead.is_loaded() => {
                Some((playhead.position - last).abs())
            }
            _ => None,
        };
        let ctx = TransitionContext {
            since_last_sync: self.last_sync.map(|at| at.elapsed()),
            sync_interval: self.settings.sync_interval,
            position_jump,
            time_jump_threshold_secs: self.settings.time_jump_threshold_secs,
        };

        let step = transition(self.state, event, &ctx);
        if step.state != self.state {
            tracing::debug!(
                from = ?self.state,
                to = ?step.state,
                event = ?event,
                "Playback state changed"
            );
        }
        self.state = step.state;

        if playhead.is_loaded() {
            self.last_known_position = Some(playhead.position);
        }

        for command in step.commands {
            self.execute(command).await;
        }
    }

    /// Periodic timer fired; reuses the last reported playhead
    pub async fn tick(&mut self) {
        self.handle(PlaybackEvent::Tick, self.playhead).await;
        self.process_queue().await;
    }

    /// Resolves on the next periodic tick; never resolves while stopped
    pub async fn next_periodic_tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                if ticker.tick().await.is_none() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// When the next backed-off task becomes sendable
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.queue.next_ready_at()
    }

    /// Moves the playhead without treating it as a scrub
    ///
    /// Used when the position is set programmatically (resume or adoption of
    /// a remote position).
    pub fn reposition(&mut self, position: f64) {
        self.playhead.position = position;
        self.last_known_position = Some(position);
    }

    /// Writes the old episode's position and resets for a new episode
    pub async fn switch_episode(&mut self, episode_id: i32) {
        if matches!(
            self.state,
            PlaybackState::Active | PlaybackState::Suspended | PlaybackState::Seeking { .. }
        ) {
            self.sync_now().await;
        }
        self.stop_periodic();

        tracing::info!(
            from = self.context.key().episode_id,
            to = episode_id,
            "Switching episode"
        );

        self.context.switch_episode(episode_id);
        self.state = PlaybackState::Idle;
        self.playhead = Playhead::default();
        self.last_known_position = None;
        self.last_sync = None;
    }

    /// Ends the session without waiting on the network
    ///
    /// Cancels the timer, then hands the current position and every queued
    /// task to the beacon.
    pub fn close(&mut self) {
        self.stop_periodic();
        if self.state != PlaybackState::Ended {
            self.flush_current();
        }
        self.flush_queue();
        self.state = PlaybackState::Ended;
    }

    /// Sends ready queue tasks in bounded batches
    pub async fn process_queue(&mut self) {
        loop {
            let batch = self.queue.take_ready(self.settings.batch_size, Instant::now());
            if batch.is_empty() {
                break;
            }

            tracing::debug!(batch_size = batch.len(), "Processing sync batch");

            let mut handles = Vec::with_capacity(batch.len());
            for task in batch {
                let store = self.store.clone();
                handles.push(tokio::spawn(async move {
                    let result = deliver(store.as_ref(), &task.payload).await;
                    (task, result)
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok((_, Ok(record))) => self.on_synced(record),
                    Ok((task, Err(e))) => self.on_task_failed(task, e),
                    Err(e) => tracing::error!(error = %e, "Sync task join error"),
                }
            }

            if !self.queue.has_ready(Instant::now()) {
                break;
            }
            tokio::time::sleep(self.settings.batch_pause).await;
        }
    }

    async fn execute(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::StartPeriodic => self.start_periodic(),
            SyncCommand::StopPeriodic => self.stop_periodic(),
            SyncCommand::SyncNow => self.sync_now().await,
            SyncCommand::EnqueueSync => {
                if let Some(update) = self.current_update() {
                    self.queue
                        .enqueue(TaskPayload::Progress(update), Instant::now());
                    self.process_queue().await;
                }
            }
            SyncCommand::Flush => self.flush_current(),
            SyncCommand::FlushQueue => self.flush_queue(),
            SyncCommand::MarkCompleted => self.mark_completed().await,
        }
    }

    fn start_periodic(&mut self) {
        // Replacing the old ticker drops it, so timers never stack.
        self.ticker = Some(PeriodicTask::start(self.settings.sync_interval));
    }

    fn stop_periodic(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
    }

    /// Current position as a write payload; `None` until metadata has loaded
    fn current_update(&self) -> Option<ProgressUpdate> {
        if !self.playhead.is_loaded() {
            return None;
        }
        let duration = self.playhead.duration.round();
        let current_time = self.playhead.position.max(0.0).round().min(duration);
        Some(ProgressUpdate {
            key: self.context.key().clone(),
            current_time,
            duration,
            device_info: Some(self.context.device_info().to_string()),
        })
    }

    async fn sync_now(&mut self) {
        let Some(update) = self.current_update() else {
            return;
        };
        // The fresh write supersedes anything still queued for this episode.
        self.queue.discard(&update.key);

        let payload = TaskPayload::Progress(update);
        match deliver(self.store.as_ref(), &payload).await {
            Ok(record) => self.on_synced(record),
            Err(e) => {
                let task = SyncTask::new(payload, Instant::now());
                self.on_task_failed(task, e);
            }
        }
    }

    async fn mark_completed(&mut self) {
        let payload = TaskPayload::Completion {
            key: self.context.key().clone(),
            duration: self.playhead.duration.max(0.0).round(),
            device_info: Some(self.context.device_info().to_string()),
        };
        self.queue.discard(payload.key());

        match deliver(self.store.as_ref(), &payload).await {
            Ok(record) => {
                tracing::info!(key = %record.key, "Episode marked as completed");
                self.on_synced(record);
            }
            Err(e) => {
                let task = SyncTask::new(payload, Instant::now());
                self.on_task_failed(task, e);
            }
        }
    }

    fn flush_current(&mut self) {
        if let Some(update) = self.current_update() {
            self.queue.discard(&update.key);
            self.beacon.send(update);
        }
    }

    fn flush_queue(&mut self) {
        let tasks = self.queue.drain_all();
        if !tasks.is_empty() {
            tracing::debug!(count = tasks.len(), "Flushing queued progress through beacon");
        }
        for task in tasks {
            self.beacon.send(task.payload.as_update());
        }
    }

    fn on_synced(&mut self, record: ProgressRecord) {
        self.last_sync = Some(Instant::now());
        self.context.remember(record);
    }

    fn on_task_failed(&mut self, mut task: SyncTask, error: ProgressError) {
        task.attempts += 1;
        let key = task.payload.key().clone();

        if !error.is_transient() {
            tracing::warn!(key = %key, error = %error, "Dropping progress write that cannot succeed");
            return;
        }

        match self.settings.retry.next_delay(task.attempts) {
            Some(delay) => {
                tracing::debug!(
                    key = %key,
                    attempts = task.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Progress write failed, retrying"
                );
                self.queue.requeue(task, Instant::now() + delay);
            }
            None => {
                tracing::warn!(
                    key = %key,
                    attempts = task.attempts,
                    error = %error,
                    "Progress write failed, giving up"
                );
            }
        }
    }
}

/// Sends one payload through the store
///
/// A completion for a tuple the store has never seen falls back to an upsert
/// at position = duration, which derives the same completed state.
async fn deliver(store: &dyn ProgressStore, payload: &TaskPayload) -> ProgressResult<ProgressRecord> {
    match payload {
        TaskPayload::Progress(update) => store.upsert_progress(update.clone()).await,
        TaskPayload::Completion { key, duration, .. } => match store.mark_completed(key).await {
            Err(ProgressError::NotFound(_)) if *duration > 0.0 => {
                store.upsert_progress(payload.as_update()).await
            }
            other => other,
        },
    }
}

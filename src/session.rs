use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::Instrument;

use crate::{
    client::Beacon,
    context::SessionContext,
    continuity::{ContinuityAction, ContinuityResolver, ContinuitySettings, ResumePrompt, SyncNotice},
    models::{PlaybackEvent, PlayerSignal, ProgressKey},
    store::ProgressStore,
    sync::{PlaybackState, ProgressSyncAgent, SyncSettings},
};

/// Inputs a player feeds into its session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Player(PlayerSignal),
    SwitchEpisode { episode_id: i32 },
    Close,
}

/// Position changes the player must apply
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Start (or restart) the episode at this position
    StartAt { episode_id: i32, position: f64 },
    /// Another device moved ahead or behind; seek without user action
    Reposition {
        position: f64,
        notice: Option<SyncNotice>,
    },
}

/// Handle to a running session task
pub struct SessionHandle {
    input_tx: mpsc::UnboundedSender<SessionInput>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Returns false once the session has ended
    pub fn send(&self, input: SessionInput) -> bool {
        self.input_tx.send(input).is_ok()
    }

    pub fn signal(&self, signal: PlayerSignal) -> bool {
        self.send(SessionInput::Player(signal))
    }

    /// Ends the session and waits for its final flush to be handed off
    pub async fn close(self) {
        let _ = self.input_tx.send(SessionInput::Close);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Player session task failed");
        }
    }
}

/// One player instance: sync agent plus continuity resolver on a single task
pub struct PlayerSession {
    agent: ProgressSyncAgent,
    resolver: ContinuityResolver,
    prompt: Arc<dyn ResumePrompt>,
    updates_tx: mpsc::UnboundedSender<SessionUpdate>,
}

impl PlayerSession {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        beacon: Arc<dyn Beacon>,
        key: ProgressKey,
        sync: SyncSettings,
        continuity: ContinuitySettings,
        prompt: Arc<dyn ResumePrompt>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let context = SessionContext::new(key, sync.device_info.clone());
        let session = Self {
            agent: ProgressSyncAgent::new(store.clone(), beacon, context, sync),
            resolver: ContinuityResolver::new(store, continuity),
            prompt,
            updates_tx,
        };
        (session, updates_rx)
    }

    /// Runs the session on its own task
    pub fn spawn(self) -> SessionHandle {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(input_rx));
        SessionHandle { input_tx, task }
    }

    pub fn agent(&self) -> &ProgressSyncAgent {
        &self.agent
    }

    /// Event loop: player inputs, the periodic tick, queue retries and the
    /// remote poll, until the input channel closes or the page unloads
    pub async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<SessionInput>) {
        let span = tracing::info_span!(
            "playback_session",
            session_id = %self.agent.context().session_id(),
            content_id = self.agent.context().key().content_id,
            episode_id = self.agent.context().key().episode_id,
        );

        async move {
            tracing::info!("Player session started");
            self.begin_episode().await;

            let poll_period = self.resolver.settings().poll_interval;
            let mut poll = interval_at(Instant::now() + poll_period, poll_period);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let retry_at = self.agent.next_retry_at();

                tokio::select! {
                    input = inputs.recv() => match input {
                        Some(SessionInput::Player(signal)) => {
                            self.agent.handle_signal(signal).await;
                            if signal.event == PlaybackEvent::PageUnloading {
                                break;
                            }
                        }
                        Some(SessionInput::SwitchEpisode { episode_id }) => {
                            self.agent.switch_episode(episode_id).await;
                            self.begin_episode().await;
                        }
                        Some(SessionInput::Close) | None => break,
                    },
                    _ = self.agent.next_periodic_tick() => self.agent.tick().await,
                    _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                        self.agent.process_queue().await;
                    }
                    _ = poll.tick() => self.poll_remote().await,
                }
            }

            self.agent.close();
            tracing::info!(queued = self.agent.queue().len(), "Player session closed");
        }
        .instrument(span)
        .await
    }

    /// Session-start decision for the episode now in the context
    pub async fn begin_episode(&mut self) -> f64 {
        let key = self.agent.context().key().clone();

        if let Err(e) = self
            .agent
            .context_mut()
            .load_episode_progress(self.resolver.store())
            .await
        {
            tracing::warn!(error = %e, "Failed to load episode progress");
        }

        let position = self.resolver.resolve_start(&key, self.prompt.as_ref()).await;
        self.agent.reposition(position);
        self.emit(SessionUpdate::StartAt {
            episode_id: key.episode_id,
            position,
        });
        position
    }

    /// Checks for a newer position written by another device
    pub async fn poll_remote(&mut self) {
        if !matches!(
            self.agent.state(),
            PlaybackState::Active | PlaybackState::Suspended
        ) {
            return;
        }

        let local_time = self.agent.playhead().position;
        let Some(decision) = self
            .resolver
            .check_remote(self.agent.context_mut(), local_time)
            .await
        else {
            return;
        };

        if decision.action == ContinuityAction::SilentAdopt {
            self.agent.reposition(decision.resolved_time);
            self.emit(SessionUpdate::Reposition {
                position: decision.resolved_time,
                notice: decision.notice,
            });
        }
    }

    fn emit(&self, update: SessionUpdate) {
        if self.updates_tx.send(update).is_err() {
            tracing::debug!("Session update receiver dropped");
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    context::SessionContext,
    models::{ProgressKey, ProgressRecord},
    store::ProgressStore,
};

/// Thresholds for resume prompts and cross-device adoption
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuitySettings {
    /// Stored positions at or below this start from zero without a prompt
    pub resume_prompt_threshold_secs: f64,
    /// Remote position must differ from local by more than this
    pub adopt_min_delta_secs: f64,
    /// Remote record must have been written within this window
    pub adopt_recency: chrono::Duration,
    /// Cadence of the remote update poll
    pub poll_interval: Duration,
}

impl Default for ContinuitySettings {
    fn default() -> Self {
        Self {
            resume_prompt_threshold_secs: 30.0,
            adopt_min_delta_secs: 10.0,
            adopt_recency: chrono::Duration::seconds(30),
            poll_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuityAction {
    /// Ask the viewer whether to resume or restart
    ResumePrompt,
    /// Reposition to the remote time and show a notice
    SilentAdopt,
    /// Keep the current position
    Ignore,
}

/// Transient message shown after a silent adoption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncNotice {
    pub message: String,
    pub resumed_at: String,
}

impl SyncNotice {
    fn synced_from_another_device(position: f64) -> Self {
        Self {
            message: "Synced from another device".to_string(),
            resumed_at: format!("Resumed at {}", format_timestamp(position)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContinuityDecision {
    pub action: ContinuityAction,
    /// Position to present: the stored time for a prompt, the remote time for
    /// an adoption, otherwise the position that was already in effect
    pub resolved_time: f64,
    pub notice: Option<SyncNotice>,
}

impl ContinuityDecision {
    fn ignore(resolved_time: f64) -> Self {
        Self {
            action: ContinuityAction::Ignore,
            resolved_time,
            notice: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeChoice {
    Resume,
    Restart,
}

/// UI hook asked to settle a resume prompt
#[async_trait::async_trait]
pub trait ResumePrompt: Send + Sync {
    async fn choose(&self, record: &ProgressRecord) -> ResumeChoice;
}

/// Session start: prompt only when the stored position is past the threshold
pub fn start_decision(
    record: Option<&ProgressRecord>,
    settings: &ContinuitySettings,
) -> ContinuityDecision {
    match record {
        Some(record) if record.current_time > settings.resume_prompt_threshold_secs => {
            ContinuityDecision {
                action: ContinuityAction::ResumePrompt,
                resolved_time: record.current_time,
                notice: None,
            }
        }
        _ => ContinuityDecision::ignore(0.0),
    }
}

/// Compares a remote record for the playing tuple against the local position
///
/// Adopts only a remote time that is both far from local and freshly written;
/// anything else is treated as a stale read.
pub fn reconcile(
    local_time: f64,
    remote: &ProgressRecord,
    now: DateTime<Utc>,
    settings: &ContinuitySettings,
) -> ContinuityDecision {
    let delta = (remote.current_time - local_time).abs();
    let recent = remote.last_watched_at > now - settings.adopt_recency;

    if delta > settings.adopt_min_delta_secs && recent {
        ContinuityDecision {
            action: ContinuityAction::SilentAdopt,
            resolved_time: remote.current_time,
            notice: Some(SyncNotice::synced_from_another_device(remote.current_time)),
        }
    } else {
        ContinuityDecision::ignore(local_time)
    }
}

/// `m:ss` below an hour, `h:mm:ss` above
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

fn is_same_write(a: &ProgressRecord, b: &ProgressRecord) -> bool {
    a.last_watched_at == b.last_watched_at && a.current_time == b.current_time
}

/// Decides which position to present at session start and on remote updates
///
/// Store failures never surface here: a failed read degrades to "no decision".
pub struct ContinuityResolver {
    store: Arc<dyn ProgressStore>,
    settings: ContinuitySettings,
    last_check: Option<DateTime<Utc>>,
}

impl ContinuityResolver {
    pub fn new(store: Arc<dyn ProgressStore>, settings: ContinuitySettings) -> Self {
        Self {
            store,
            settings,
            last_check: None,
        }
    }

    pub fn store(&self) -> &dyn ProgressStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &ContinuitySettings {
        &self.settings
    }

    /// Start of the window the next remote poll asks for
    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.last_check
    }

    /// Loads the stored record for the tuple and decides whether to prompt
    pub async fn on_session_start(&self, key: &ProgressKey) -> ContinuityDecision {
        self.load_start(key).await.0
    }

    /// Session start including the viewer's answer to a resume prompt
    ///
    /// Returns the position playback should start at. The prompt sees the
    /// same record the decision was made on.
    pub async fn resolve_start(&self, key: &ProgressKey, prompt: &dyn ResumePrompt) -> f64 {
        let (decision, record) = self.load_start(key).await;
        let record = match (decision.action, record) {
            (ContinuityAction::ResumePrompt, Some(record)) => record,
            _ => return decision.resolved_time,
        };

        match prompt.choose(&record).await {
            ResumeChoice::Resume => {
                tracing::info!(key = %key, position = decision.resolved_time, "Resuming playback");
                decision.resolved_time
            }
            ResumeChoice::Restart => 0.0,
        }
    }

    async fn load_start(&self, key: &ProgressKey) -> (ContinuityDecision, Option<ProgressRecord>) {
        match self.store.find_progress(key).await {
            Ok(record) => (start_decision(record.as_ref(), &self.settings), record),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to load saved progress, starting from 0");
                (ContinuityDecision::ignore(0.0), None)
            }
        }
    }

    /// Polls the store for records written since the last check
    ///
    /// Remote records refresh the session's episode cache. Returns a decision
    /// only when the playing tuple itself was updated; a failed poll returns
    /// `None` and keeps the previous check time. A record identical to the
    /// session's last acknowledged write is this session's own and is ignored.
    pub async fn check_remote(
        &mut self,
        context: &mut SessionContext,
        local_time: f64,
    ) -> Option<ContinuityDecision> {
        let checked_at = Utc::now();
        let key = context.key().clone();

        let updates = match self
            .store
            .list_updated_since(&key.identity, key.profile_id, self.last_check)
            .await
        {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to check for remote progress updates");
                return None;
            }
        };
        self.last_check = Some(checked_at);

        let own_write = context.cached_record(key.episode_id).cloned();
        let current = updates.iter().find(|r| r.key == key).cloned();
        for record in updates {
            context.remember(record);
        }

        let remote = current?;
        if own_write.is_some_and(|own| is_same_write(&own, &remote)) {
            tracing::debug!(key = %key, "Remote update is this session's own write");
            return Some(ContinuityDecision::ignore(local_time));
        }

        let decision = reconcile(local_time, &remote, checked_at, &self.settings);
        if decision.action == ContinuityAction::SilentAdopt {
            tracing::info!(
                key = %key,
                local = local_time,
                remote = remote.current_time,
                device = %remote.device_info,
                "Adopting position from another device"
            );
        }
        Some(decision)
    }
}

use std::time::Duration;

use crate::models::PlaybackEvent;

/// Lifecycle of one playback session as seen by the sync agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Active,
    /// Scrubbing; `was_playing` decides where seekEnded lands
    Seeking { was_playing: bool },
    Suspended,
    Ended,
}

/// Side effects requested by a transition, executed in order by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Always follows the immediate send of the same transition
    StartPeriodic,
    StopPeriodic,
    /// Send the current position now; queue it for retry if that fails
    SyncNow,
    /// Queue the current position and drain the queue
    EnqueueSync,
    /// Fire-and-forget the current position through the beacon
    Flush,
    /// Fire-and-forget every queued task through the beacon
    FlushQueue,
    MarkCompleted,
}

/// Facts about the session the transition function needs besides the event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionContext {
    /// Time since the last successful write; `None` before the first one
    pub since_last_sync: Option<Duration>,
    pub sync_interval: Duration,
    /// Distance from the previous reported position, when there is one
    pub position_jump: Option<f64>,
    pub time_jump_threshold_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: PlaybackState,
    pub commands: Vec<SyncCommand>,
}

impl Transition {
    fn to(state: PlaybackState, commands: Vec<SyncCommand>) -> Self {
        Self { state, commands }
    }

    fn stay(state: PlaybackState) -> Self {
        Self::to(state, Vec::new())
    }
}

/// Pure state machine step: (state, event, context) -> (state, commands)
pub fn transition(
    state: PlaybackState,
    event: PlaybackEvent,
    ctx: &TransitionContext,
) -> Transition {
    use PlaybackEvent as E;
    use PlaybackState as S;
    use SyncCommand as C;

    let playing = matches!(state, S::Active | S::Suspended | S::Seeking { .. });

    match (state, event) {
        (S::Idle | S::Suspended | S::Ended, E::Started) => {
            Transition::to(S::Active, vec![C::SyncNow, C::StartPeriodic])
        }
        (S::Seeking { .. }, E::Started) => Transition::stay(S::Seeking { was_playing: true }),

        (S::Active, E::Paused) => Transition::to(S::Suspended, vec![C::StopPeriodic, C::SyncNow]),
        (S::Seeking { .. }, E::Paused) => Transition::stay(S::Seeking { was_playing: false }),

        (S::Active, E::SeekBegun) => {
            Transition::to(S::Seeking { was_playing: true }, vec![C::StopPeriodic])
        }
        (S::Suspended, E::SeekBegun) => Transition::stay(S::Seeking { was_playing: false }),

        (S::Seeking { was_playing: true }, E::SeekEnded) => {
            Transition::to(S::Active, vec![C::SyncNow, C::StartPeriodic])
        }
        (S::Seeking { was_playing: false }, E::SeekEnded) => {
            Transition::to(S::Suspended, vec![C::SyncNow])
        }

        (S::Active, E::Tick) => {
            let due = ctx
                .since_last_sync
                .map_or(true, |elapsed| elapsed >= ctx.sync_interval);
            if due {
                Transition::to(S::Active, vec![C::EnqueueSync])
            } else {
                Transition::stay(S::Active)
            }
        }

        (S::Active, E::TimeUpdate) => {
            let jumped = ctx
                .position_jump
                .is_some_and(|jump| jump > ctx.time_jump_threshold_secs);
            if jumped {
                Transition::to(S::Active, vec![C::SyncNow])
            } else {
                Transition::stay(S::Active)
            }
        }

        (_, E::PageHidden) if playing => {
            Transition::to(S::Suspended, vec![C::StopPeriodic, C::Flush])
        }
        (_, E::PageUnloading) if playing => Transition::to(
            S::Ended,
            vec![C::StopPeriodic, C::Flush, C::FlushQueue],
        ),
        (_, E::PageUnloading) => Transition::to(S::Ended, vec![C::FlushQueue]),

        (_, E::Ended) if playing => {
            Transition::to(S::Ended, vec![C::StopPeriodic, C::MarkCompleted])
        }

        (state, _) => Transition::stay(state),
    }
}

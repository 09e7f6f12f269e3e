use serde::{Deserialize, Serialize};

/// Snapshot of the media element's clock
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Playhead {
    /// Current position in seconds
    pub position: f64,
    /// Media duration in seconds; zero or NaN until metadata has loaded
    pub duration: f64,
}

impl Playhead {
    pub fn new(position: f64, duration: f64) -> Self {
        Self { position, duration }
    }

    /// Whether the media has a usable duration
    pub fn is_loaded(&self) -> bool {
        self.duration.is_finite() && self.duration > 0.0
    }
}

/// Playback events reported by the player and the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEvent {
    Started,
    Paused,
    SeekBegun,
    SeekEnded,
    /// Ordinary position report from the player
    TimeUpdate,
    /// Periodic sync timer fired
    Tick,
    PageHidden,
    PageUnloading,
    Ended,
}

/// One event together with the playhead at the time it fired
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerSignal {
    pub event: PlaybackEvent,
    #[serde(flatten)]
    pub playhead: Playhead,
    /// Replay only: wait this long before delivering the signal
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delay_ms: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl PlayerSignal {
    pub fn new(event: PlaybackEvent, position: f64, duration: f64) -> Self {
        Self {
            event,
            playhead: Playhead::new(position, duration),
            delay_ms: 0,
        }
    }
}

/// Episode metadata supplied by the content catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeInfo {
    pub episode_id: i32,
    pub title: String,
    #[serde(default)]
    pub duration: f64,
}

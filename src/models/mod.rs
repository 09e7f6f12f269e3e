pub mod playback;
pub mod progress;

pub use playback::{EpisodeInfo, PlaybackEvent, PlayerSignal, Playhead};
pub use progress::{
    validate_profile, watch_percentage, ProgressKey, ProgressRecord, ProgressUpdate,
    WatchStatistics, MAX_PROFILE_ID,
};

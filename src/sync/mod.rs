pub mod agent;
pub mod queue;
pub mod retry;
pub mod schedule;
pub mod state;

pub use agent::{ProgressSyncAgent, SyncSettings};
pub use queue::{SyncQueue, SyncTask, TaskPayload};
pub use retry::RetryPolicy;
pub use schedule::PeriodicTask;
pub use state::{transition, PlaybackState, SyncCommand, Transition, TransitionContext};

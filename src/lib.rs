//! Watch-progress core: durable playback positions, the agent that decides
//! when to write them, and the resolver that decides which position a player
//! presents.

pub mod client;
pub mod config;
pub mod context;
pub mod continuity;
pub mod error;
pub mod models;
pub mod session;
pub mod store;
pub mod sync;

pub use client::{Beacon, HttpBeacon, HttpProgressClient, StoreBeacon};
pub use config::{Config, StoreBackend};
pub use context::{EpisodeProgress, SessionContext};
pub use continuity::{
    ContinuityAction, ContinuityDecision, ContinuityResolver, ContinuitySettings, ResumeChoice,
    ResumePrompt, SyncNotice,
};
pub use error::{ProgressError, ProgressResult};
pub use session::{PlayerSession, SessionHandle, SessionInput, SessionUpdate};
pub use store::{InMemoryProgressStore, PgProgressStore, ProgressPolicy, ProgressStore};
pub use sync::{ProgressSyncAgent, SyncSettings};

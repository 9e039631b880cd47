//! Resumption state - position tracking, replay caching, tokens.
//!
//! A resumable session numbers resumable frames per direction and keeps
//! sent-but-unacknowledged frames in a bounded replay cache. After a
//! transport loss the peers exchange positions, reconcile, and replay the
//! tail the other side never received.
//!
//! # Workflow
//!
//! 1. Each resumable send is appended to the [`ReplayCache`] at the position
//!    assigned by the [`PositionTracker`]
//! 2. Peer acknowledgments advance the tracker and evict the cache prefix
//! 3. On resume, the peer's reported receive position selects the replay
//!    tail via [`ReplayCache::replay_from`]

mod cache;
mod token;
mod tracker;

pub use cache::{ReplayCache, ReplayCacheEntry, ReplayIter};
pub use token::{ResumeToken, TOKEN_LEN};
pub use tracker::{PositionTracker, ResumePosition};

//! Session configuration.
//!
//! Controls the replay-cache bounds, the resume-timeout window, and the
//! policy applied when the replay cache is full.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use resumux::{OverflowPolicy, SessionConfig};
//!
//! let config = SessionConfig::default()
//!     .with_max_replay_entries(256)
//!     .with_resume_timeout(Duration::from_secs(60))
//!     .with_overflow_policy(OverflowPolicy::Terminate);
//! assert_eq!(config.max_replay_entries, 256);
//! ```

use std::time::Duration;

/// Default maximum bytes retained in the replay cache.
pub const DEFAULT_MAX_REPLAY_BYTES: usize = 4 * 1024 * 1024;

/// Default maximum entries retained in the replay cache.
pub const DEFAULT_MAX_REPLAY_ENTRIES: usize = 1024;

/// Default window for a disconnected session to resume before termination.
pub const DEFAULT_RESUME_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout when a blocked sender waits for replay-cache capacity.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Policy applied when a resumable send would exceed the replay-cache bounds.
///
/// Entries are never dropped silently: the cache only shrinks when the peer
/// acknowledges receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the send with `ReplayBufferExhausted` so the caller can wait
    /// for peer acknowledgments to free capacity.
    Block,
    /// Terminate the session with a `BufferExhausted` terminal event.
    Terminate,
}

/// Configuration for a session and its replay subsystem.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum bytes of frame payload retained in the replay cache.
    pub max_replay_bytes: usize,
    /// Maximum number of entries retained in the replay cache.
    pub max_replay_entries: usize,
    /// How long a disconnected session waits for resumption before it is
    /// terminated.
    pub resume_timeout: Duration,
    /// What to do when an append would exceed the replay-cache bounds.
    pub on_buffer_exhausted: OverflowPolicy,
    /// Timeout when waiting for replay-cache capacity under the `Block`
    /// policy.
    pub backpressure_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_replay_bytes: DEFAULT_MAX_REPLAY_BYTES,
            max_replay_entries: DEFAULT_MAX_REPLAY_ENTRIES,
            resume_timeout: DEFAULT_RESUME_TIMEOUT,
            on_buffer_exhausted: OverflowPolicy::Block,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum bytes retained in the replay cache.
    pub fn with_max_replay_bytes(mut self, bytes: usize) -> Self {
        self.max_replay_bytes = bytes;
        self
    }

    /// Set the maximum entries retained in the replay cache.
    pub fn with_max_replay_entries(mut self, entries: usize) -> Self {
        self.max_replay_entries = entries;
        self
    }

    /// Set the resume-timeout window.
    pub fn with_resume_timeout(mut self, timeout: Duration) -> Self {
        self.resume_timeout = timeout;
        self
    }

    /// Set the overflow policy for resumable sends.
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.on_buffer_exhausted = policy;
        self
    }

    /// Set the timeout for blocked senders waiting on cache capacity.
    pub fn with_backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.backpressure_timeout = timeout;
        self
    }
}

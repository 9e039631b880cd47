//! Error types for resumux.

use thiserror::Error;

use crate::protocol::{Position, StreamId};
use crate::session::TerminationReason;

/// Main error type for all session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A stream id was registered while a live stream already owns it.
    #[error("Duplicate stream id: {0}")]
    DuplicateStream(StreamId),

    /// A non-initiating frame referenced a stream that is not registered.
    /// Stream-scoped: the connection survives.
    #[error("Unknown stream id: {0}")]
    UnknownStream(StreamId),

    /// The peer's acknowledged position moved backwards.
    #[error("Ack regression: peer previously acked {acked}, now claims {claimed}")]
    AckRegression { acked: Position, claimed: Position },

    /// The peer acknowledged a position beyond what was ever sent.
    #[error("Ack overrun: peer claims {claimed} but last sent is {sent}")]
    AckOverrun { sent: Position, claimed: Position },

    /// Replay was requested from a position older than the earliest
    /// replayable point, meaning needed frames were already evicted.
    #[error("Position {requested} unavailable: earliest replayable is {earliest}")]
    PositionUnavailable { requested: Position, earliest: Position },

    /// Resumption cannot proceed because the replay window no longer covers
    /// the peer's claimed position. The session terminates.
    #[error("Resumption failed: peer at {requested}, earliest replayable is {earliest}")]
    ResumptionFailed { requested: Position, earliest: Position },

    /// The replay cache is full and the peer has not acknowledged enough
    /// to evict. Handled per the configured overflow policy.
    #[error("Replay buffer exhausted: {entries} entries, {bytes} bytes retained")]
    ReplayBufferExhausted { entries: usize, bytes: usize },

    /// Protocol error (malformed control frame, wrong kind, bad stream id).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Control-frame payload encoding error.
    #[error("Control frame encode error: {0}")]
    ControlEncode(#[from] rmp_serde::encode::Error),

    /// Control-frame payload decoding error.
    #[error("Control frame decode error: {0}")]
    ControlDecode(#[from] rmp_serde::decode::Error),

    /// An outbound frame was submitted while no transport is attached.
    #[error("Transport detached")]
    TransportDetached,

    /// The transport side of the outbound channel hung up.
    #[error("Transport channel closed")]
    ChannelClosed,

    /// Waiting for replay-cache capacity exceeded the configured timeout.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// The session has already terminated.
    #[error("Session terminated: {0}")]
    Terminated(TerminationReason),

    /// No session is registered under the presented resumption token.
    #[error("Unknown resumption token")]
    UnknownToken,
}

impl SessionError {
    /// True for errors that are scoped to a single stream and leave the
    /// connection usable.
    pub fn is_stream_scoped(&self) -> bool {
        matches!(
            self,
            SessionError::DuplicateStream(_) | SessionError::UnknownStream(_)
        )
    }
}

/// Result type alias using SessionError.
pub type Result<T> = std::result::Result<T, SessionError>;

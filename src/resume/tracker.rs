//! Position tracking for the resumable sequence.
//!
//! One tracker per session maintains three counters: the local sent
//! position, the local received position, and the highest position the peer
//! has acknowledged. All operations are synchronous arithmetic on the
//! connection's processing path.

use crate::error::{Result, SessionError};
use crate::protocol::Position;

/// The position pair presented during a resume handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePosition {
    /// Last resumable position sent locally.
    pub last_sent: Position,
    /// Last resumable position received from the peer.
    pub last_received: Position,
}

/// Monotonic position counters for one session.
///
/// Positions start at 0 ("nothing yet"); the first resumable frame in a
/// direction gets position 1.
#[derive(Debug, Default)]
pub struct PositionTracker {
    /// Position of the newest resumable frame sent locally.
    sent: Position,
    /// Position of the newest resumable frame received from the peer.
    received: Position,
    /// Highest position the peer has confirmed receiving.
    peer_ack: Position,
}

impl PositionTracker {
    /// Create a tracker with all positions at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resumable send and return the newly assigned position.
    ///
    /// The returned position belongs to the frame about to be cached and
    /// forwarded.
    #[inline]
    pub fn on_resumable_send(&mut self) -> Position {
        self.sent += 1;
        self.sent
    }

    /// Record a resumable receive and return the new received position.
    #[inline]
    pub fn on_resumable_receive(&mut self) -> Position {
        self.received += 1;
        self.received
    }

    /// Record the peer's acknowledgment of everything up through `position`.
    ///
    /// Acks must be monotonic: an equal re-ack is a no-op, a lower one fails
    /// with `AckRegression`. Acks past the sent position fail with
    /// `AckOverrun`. Failed calls leave the tracker unchanged.
    pub fn on_peer_ack(&mut self, position: Position) -> Result<()> {
        if position < self.peer_ack {
            return Err(SessionError::AckRegression {
                acked: self.peer_ack,
                claimed: position,
            });
        }

        if position > self.sent {
            return Err(SessionError::AckOverrun {
                sent: self.sent,
                claimed: position,
            });
        }

        self.peer_ack = position;
        Ok(())
    }

    /// The position pair to present during a resume handshake.
    #[inline]
    pub fn resume_position(&self) -> ResumePosition {
        ResumePosition {
            last_sent: self.sent,
            last_received: self.received,
        }
    }

    /// Last resumable position sent locally.
    #[inline]
    pub fn last_sent(&self) -> Position {
        self.sent
    }

    /// Last resumable position received from the peer.
    #[inline]
    pub fn last_received(&self) -> Position {
        self.received
    }

    /// Highest position the peer has acknowledged.
    #[inline]
    pub fn peer_ack(&self) -> Position {
        self.peer_ack
    }
}

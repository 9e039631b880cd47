//! Bounded replay cache for sent-but-unacknowledged frames.
//!
//! The cache holds resumable outbound frames in strictly increasing,
//! contiguous position order. Entries leave the cache only when the peer
//! acknowledges them; on resume, `replay_from` yields the tail the peer has
//! not seen. Payloads are `bytes::Bytes`, so retaining and replaying a frame
//! never copies payload data.
//!
//! Retained byte/entry counts are mirrored into shared atomic gauges so an
//! async waiter can observe capacity without touching the single-writer core.

use std::collections::VecDeque;

use crate::backpressure::ReplayGauge;
use crate::error::{Result, SessionError};
use crate::protocol::{FrameRecord, Position};

/// A cached outbound frame with its assigned position.
#[derive(Debug, Clone)]
pub struct ReplayCacheEntry {
    /// Resumable-sequence position assigned at send time.
    pub position: Position,
    /// The frame as it was sent.
    pub frame: FrameRecord,
}

/// Bounded, position-ordered buffer of unacknowledged resumable frames.
#[derive(Debug)]
pub struct ReplayCache {
    /// Entries in strictly increasing, contiguous position order.
    entries: VecDeque<ReplayCacheEntry>,
    /// Position of the newest entry ever appended (0 = none yet).
    last_appended: Position,
    /// Sum of retained payload bytes.
    retained_bytes: usize,
    /// Maximum retained payload bytes.
    max_bytes: usize,
    /// Maximum retained entries.
    max_entries: usize,
    /// Shared mirror of the retained counts.
    gauge: ReplayGauge,
}

impl ReplayCache {
    /// Create an empty cache with the given bounds.
    pub fn new(max_bytes: usize, max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            last_appended: 0,
            retained_bytes: 0,
            max_bytes,
            max_entries,
            gauge: ReplayGauge::new(),
        }
    }

    /// A clone of the shared capacity gauge, for the backpressure waiter.
    pub fn gauge(&self) -> ReplayGauge {
        self.gauge.clone()
    }

    /// Check whether appending a frame of `payload_len` bytes would exceed
    /// the bounds.
    #[inline]
    pub fn would_overflow(&self, payload_len: usize) -> bool {
        self.entries.len() >= self.max_entries
            || self.retained_bytes + payload_len > self.max_bytes
    }

    /// Append a frame at the next position.
    ///
    /// The cache is contiguous: `position` must be exactly one past the last
    /// appended position. The bounds are checked first; a failed append
    /// leaves the cache untouched so the caller can retry after the peer
    /// acknowledges.
    ///
    /// # Errors
    ///
    /// Returns `ReplayBufferExhausted` when the append would exceed the
    /// configured byte or entry bound.
    ///
    /// # Panics
    ///
    /// Panics if `position` is out of sequence. That is a core bug, not a
    /// peer-caused failure, and processing must not continue on a cache
    /// whose positions can no longer be trusted.
    pub fn append(&mut self, position: Position, frame: FrameRecord) -> Result<()> {
        let expected = self.last_appended + 1;
        if position != expected {
            panic!(
                "replay cache append out of sequence: expected position {}, got {}",
                expected, position
            );
        }

        if self.would_overflow(frame.payload_len()) {
            return Err(SessionError::ReplayBufferExhausted {
                entries: self.entries.len(),
                bytes: self.retained_bytes,
            });
        }

        self.retained_bytes += frame.payload_len();
        self.last_appended = position;
        self.entries.push_back(ReplayCacheEntry { position, frame });
        self.sync_gauge();
        Ok(())
    }

    /// Evict all entries with position ≤ `position`.
    ///
    /// Driven by peer acknowledgments only. A position before the earliest
    /// retained entry is a no-op. Returns the number of entries evicted.
    pub fn evict_up_to(&mut self, position: Position) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.entries.front() {
            if front.position > position {
                break;
            }
            self.retained_bytes -= front.frame.payload_len();
            self.entries.pop_front();
            evicted += 1;
        }

        if evicted > 0 {
            self.sync_gauge();
        }
        evicted
    }

    /// Iterate the retained frames with position strictly greater than
    /// `position`, in ascending order.
    ///
    /// The iterator is lazy and restartable: calling `replay_from` again
    /// with the same position yields the same sequence if nothing was
    /// appended or evicted in between.
    ///
    /// # Errors
    ///
    /// Returns `PositionUnavailable` if `position` is older than the
    /// earliest replayable point, meaning frames past it were already
    /// evicted and the gap cannot be reconstructed.
    pub fn replay_from(&self, position: Position) -> Result<ReplayIter<'_>> {
        let earliest = self.earliest_replayable();
        if position < earliest {
            return Err(SessionError::PositionUnavailable {
                requested: position,
                earliest,
            });
        }

        // Contiguity makes the start index pure arithmetic.
        let skip = (position - earliest) as usize;
        let start = skip.min(self.entries.len());
        Ok(ReplayIter {
            inner: self.entries.range(start..),
        })
    }

    /// The oldest position replay can start from.
    ///
    /// With entries retained this is one before the earliest entry; with an
    /// empty cache it is the last appended position (nothing to replay, but
    /// the position is still coherent).
    #[inline]
    pub fn earliest_replayable(&self) -> Position {
        match self.entries.front() {
            Some(front) => front.position - 1,
            None => self.last_appended,
        }
    }

    /// Position of the newest entry ever appended (0 = none yet).
    #[inline]
    pub fn last_position(&self) -> Position {
        self.last_appended
    }

    /// Number of retained entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no entries are retained.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of retained payload bytes.
    #[inline]
    pub fn retained_bytes(&self) -> usize {
        self.retained_bytes
    }

    /// Drop every entry. The position sequence does not rewind.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.retained_bytes = 0;
        self.sync_gauge();
    }

    fn sync_gauge(&self) {
        self.gauge.record(self.retained_bytes, self.entries.len());
    }
}

/// Lazy, ordered iterator over retained entries, produced by
/// [`ReplayCache::replay_from`].
pub struct ReplayIter<'a> {
    inner: std::collections::vec_deque::Iter<'a, ReplayCacheEntry>,
}

impl<'a> Iterator for ReplayIter<'a> {
    type Item = &'a ReplayCacheEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ReplayIter<'_> {}

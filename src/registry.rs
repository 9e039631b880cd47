//! Stream registry for routing frames to per-stream automatons.
//!
//! The registry maps live stream ids to the automaton that owns each
//! stream's application-level state machine. It is the sole owner of an
//! automaton for as long as the stream is active: entries appear on
//! `register` or on the first stream-initiating frame for a fresh id, and
//! disappear when the automaton reports terminal state or the session tears
//! the connection down.
//!
//! Connection-control frames (stream id 0) never reach the registry; the
//! session consumes them first.
//!
//! # Example
//!
//! ```ignore
//! use resumux::registry::{AutomatonFactory, StreamRegistry};
//!
//! let mut registry = StreamRegistry::new();
//! let mut factory = |frame: &FrameRecord| -> Box<dyn StreamAutomaton> {
//!     Box::new(MyRequestHandler::new(frame.stream_id))
//! };
//!
//! registry.dispatch(frame, &mut factory)?;
//! ```

use std::collections::HashMap;

use crate::error::{Result, SessionError};
use crate::protocol::{FrameRecord, StreamId};

/// Per-stream state machine owned by the registry.
///
/// Frames for one stream are delivered in arrival order. The registry
/// checks `is_terminal` after every delivery and drops the automaton once
/// it reports true.
pub trait StreamAutomaton: Send {
    /// Deliver an inbound frame for this stream.
    fn accept_frame(&mut self, frame: FrameRecord) -> Result<()>;

    /// The session is tearing down; the stream will receive no more frames.
    fn on_cancelled(&mut self);

    /// True once the stream has completed, errored, or been cancelled.
    fn is_terminal(&self) -> bool;
}

/// Factory invoked when a stream-initiating frame arrives for an
/// unregistered stream id.
///
/// Implemented for any `FnMut(&FrameRecord) -> Box<dyn StreamAutomaton>`
/// closure, so most callers never implement it by hand.
pub trait AutomatonFactory: Send {
    /// Build the automaton that will own the new stream. The initiating
    /// frame is delivered to it right after registration.
    fn create(&mut self, frame: &FrameRecord) -> Box<dyn StreamAutomaton>;
}

impl<F> AutomatonFactory for F
where
    F: FnMut(&FrameRecord) -> Box<dyn StreamAutomaton> + Send,
{
    fn create(&mut self, frame: &FrameRecord) -> Box<dyn StreamAutomaton> {
        (self)(frame)
    }
}

/// Registry mapping live stream ids to their automatons.
#[derive(Default)]
pub struct StreamRegistry {
    streams: HashMap<StreamId, Box<dyn StreamAutomaton>>,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
        }
    }

    /// Register an automaton under a stream id.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateStream` if a live stream already owns the id. Ids
    /// are never reused while their stream is registered.
    pub fn register(
        &mut self,
        stream_id: StreamId,
        automaton: Box<dyn StreamAutomaton>,
    ) -> Result<()> {
        if self.streams.contains_key(&stream_id) {
            return Err(SessionError::DuplicateStream(stream_id));
        }
        self.streams.insert(stream_id, automaton);
        tracing::debug!(stream_id, "stream registered");
        Ok(())
    }

    /// Route a frame to the automaton owning its stream id.
    ///
    /// A stream-initiating frame for an unregistered id creates the
    /// automaton through `factory` first, then delivers the frame to it.
    /// After delivery the entry is removed if the automaton reports
    /// terminal state.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStream` for a non-initiating frame whose stream id
    /// is not registered. That error is stream-scoped: the connection
    /// stays usable and the registry is unchanged. Errors from the
    /// automaton itself are passed through.
    pub fn dispatch(
        &mut self,
        frame: FrameRecord,
        factory: &mut dyn AutomatonFactory,
    ) -> Result<()> {
        let stream_id = frame.stream_id;

        if !self.streams.contains_key(&stream_id) {
            if !frame.kind.is_stream_initiating() {
                return Err(SessionError::UnknownStream(stream_id));
            }
            let automaton = factory.create(&frame);
            self.streams.insert(stream_id, automaton);
            tracing::debug!(stream_id, kind = ?frame.kind, "stream created on first frame");
        }

        let result = match self.streams.get_mut(&stream_id) {
            Some(automaton) => automaton.accept_frame(frame),
            None => return Err(SessionError::UnknownStream(stream_id)),
        };

        // Reap even when delivery errored: a terminal automaton receives
        // nothing further either way.
        if self
            .streams
            .get(&stream_id)
            .is_some_and(|automaton| automaton.is_terminal())
        {
            self.streams.remove(&stream_id);
            tracing::debug!(stream_id, "stream reached terminal state, removed");
        }

        result
    }

    /// Remove a stream entry. Removing an absent id is a no-op.
    ///
    /// Returns true if an entry was removed.
    pub fn remove(&mut self, stream_id: StreamId) -> bool {
        let removed = self.streams.remove(&stream_id).is_some();
        if removed {
            tracing::debug!(stream_id, "stream removed");
        }
        removed
    }

    /// Check whether a stream id is currently registered.
    #[inline]
    pub fn contains(&self, stream_id: StreamId) -> bool {
        self.streams.contains_key(&stream_id)
    }

    /// Number of live streams.
    #[inline]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Check if no streams are registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Read-only visit of every live stream.
    ///
    /// Iteration order is unspecified; per-stream frame order is the only
    /// ordering the registry guarantees.
    pub fn for_each(&self, mut f: impl FnMut(StreamId, &dyn StreamAutomaton)) {
        for (stream_id, automaton) in &self.streams {
            f(*stream_id, automaton.as_ref());
        }
    }

    /// Notify every automaton of cancellation, then clear the map.
    ///
    /// Returns the number of streams that were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.streams.len();
        for automaton in self.streams.values_mut() {
            automaton.on_cancelled();
        }
        self.streams.clear();
        if count > 0 {
            tracing::debug!(count, "cancelled all live streams");
        }
        count
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("streams", &self.streams.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameKind;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    struct TestAutomaton {
        seen: Arc<Mutex<Vec<FrameKind>>>,
        cancelled: Arc<AtomicBool>,
        terminal: bool,
    }

    impl TestAutomaton {
        fn new(seen: Arc<Mutex<Vec<FrameKind>>>, cancelled: Arc<AtomicBool>) -> Self {
            Self {
                seen,
                cancelled,
                terminal: false,
            }
        }
    }

    impl StreamAutomaton for TestAutomaton {
        fn accept_frame(&mut self, frame: FrameRecord) -> Result<()> {
            if frame.kind == FrameKind::Cancel {
                self.terminal = true;
            }
            self.seen.lock().unwrap().push(frame.kind);
            Ok(())
        }

        fn on_cancelled(&mut self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        fn is_terminal(&self) -> bool {
            self.terminal
        }
    }

    fn frame(stream_id: StreamId, kind: FrameKind) -> FrameRecord {
        FrameRecord::new(stream_id, kind, Bytes::from_static(b"payload"))
    }

    fn test_factory(
        seen: Arc<Mutex<Vec<FrameKind>>>,
        cancelled: Arc<AtomicBool>,
    ) -> impl AutomatonFactory {
        move |_frame: &FrameRecord| -> Box<dyn StreamAutomaton> {
            Box::new(TestAutomaton::new(seen.clone(), cancelled.clone()))
        }
    }

    #[test]
    fn test_register_and_contains() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = StreamRegistry::new();

        registry
            .register(1, Box::new(TestAutomaton::new(seen, cancelled)))
            .unwrap();

        assert!(registry.contains(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = StreamRegistry::new();

        registry
            .register(
                1,
                Box::new(TestAutomaton::new(seen.clone(), cancelled.clone())),
            )
            .unwrap();
        let result = registry.register(1, Box::new(TestAutomaton::new(seen, cancelled)));

        assert!(matches!(result, Err(SessionError::DuplicateStream(1))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dispatch_delivers_in_arrival_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = StreamRegistry::new();
        let mut factory = test_factory(seen.clone(), cancelled);

        registry
            .dispatch(frame(1, FrameKind::RequestStream), &mut factory)
            .unwrap();
        registry
            .dispatch(frame(1, FrameKind::RequestN), &mut factory)
            .unwrap();
        registry
            .dispatch(frame(1, FrameKind::Payload), &mut factory)
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                FrameKind::RequestStream,
                FrameKind::RequestN,
                FrameKind::Payload
            ]
        );
    }

    #[test]
    fn test_dispatch_initiating_frame_creates_stream() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = StreamRegistry::new();
        let mut factory = test_factory(seen.clone(), cancelled);

        assert!(!registry.contains(3));
        registry
            .dispatch(frame(3, FrameKind::RequestResponse), &mut factory)
            .unwrap();

        assert!(registry.contains(3));
        assert_eq!(*seen.lock().unwrap(), vec![FrameKind::RequestResponse]);
    }

    #[test]
    fn test_dispatch_unknown_stream_is_survivable() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = StreamRegistry::new();
        let mut factory = test_factory(seen.clone(), cancelled);

        let result = registry.dispatch(frame(5, FrameKind::Payload), &mut factory);

        let err = result.unwrap_err();
        assert!(matches!(err, SessionError::UnknownStream(5)));
        assert!(err.is_stream_scoped());
        // Registry untouched; later streams still work
        assert!(registry.is_empty());
        registry
            .dispatch(frame(5, FrameKind::RequestStream), &mut factory)
            .unwrap();
        assert!(registry.contains(5));
    }

    #[test]
    fn test_terminal_automaton_reaped_after_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = StreamRegistry::new();
        let mut factory = test_factory(seen.clone(), cancelled);

        registry
            .dispatch(frame(1, FrameKind::RequestChannel), &mut factory)
            .unwrap();
        assert!(registry.contains(1));

        registry
            .dispatch(frame(1, FrameKind::Cancel), &mut factory)
            .unwrap();
        assert!(!registry.contains(1));

        // The id is free again once the stream is gone
        registry
            .dispatch(frame(1, FrameKind::RequestChannel), &mut factory)
            .unwrap();
        assert!(registry.contains(1));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = StreamRegistry::new();

        registry
            .register(7, Box::new(TestAutomaton::new(seen, cancelled)))
            .unwrap();

        assert!(registry.remove(7));
        assert!(!registry.remove(7));
        assert!(!registry.remove(99));
    }

    #[test]
    fn test_cancel_all_notifies_and_clears() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancelled_a = Arc::new(AtomicBool::new(false));
        let cancelled_b = Arc::new(AtomicBool::new(false));
        let mut registry = StreamRegistry::new();

        registry
            .register(
                1,
                Box::new(TestAutomaton::new(seen.clone(), cancelled_a.clone())),
            )
            .unwrap();
        registry
            .register(
                2,
                Box::new(TestAutomaton::new(seen, cancelled_b.clone())),
            )
            .unwrap();

        assert_eq!(registry.cancel_all(), 2);
        assert!(registry.is_empty());
        assert!(cancelled_a.load(Ordering::SeqCst));
        assert!(cancelled_b.load(Ordering::SeqCst));

        // Cancelling an empty registry is a no-op
        assert_eq!(registry.cancel_all(), 0);
    }

    #[test]
    fn test_for_each_visits_all_streams() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = StreamRegistry::new();
        let mut factory = test_factory(seen, cancelled);

        for id in [1u32, 3, 5] {
            registry
                .dispatch(frame(id, FrameKind::RequestFnf), &mut factory)
                .unwrap();
        }

        let mut visited = Vec::new();
        registry.for_each(|stream_id, _| visited.push(stream_id));
        visited.sort_unstable();
        assert_eq!(visited, vec![1, 3, 5]);
    }
}

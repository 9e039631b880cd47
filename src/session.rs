//! Connection state aggregate and the resumption state machine.
//!
//! A [`Session`] owns one stream registry, one position tracker, and one
//! replay cache. It is the unit that survives a transport loss: on
//! disconnect the aggregate is retained under its resumption token, and a
//! later RESUME handshake reattaches it to a fresh transport, replays the
//! unacknowledged tail, and returns to normal flow.
//!
//! All operations are synchronous in-memory transitions. The async shell
//! (see [`crate::manager`]) serializes calls per session and drives the
//! resume-timeout timer.
//!
//! # Example
//!
//! ```ignore
//! use resumux::{Session, SessionConfig};
//!
//! let mut session = Session::builder()
//!     .config(SessionConfig::default())
//!     .sink(transport_sink)
//!     .build();
//!
//! let position = session.send(frame)?;
//! session.handle_frame(inbound, &mut factory)?;
//! ```

use std::fmt;

use crate::backpressure::ReplayGauge;
use crate::config::{OverflowPolicy, SessionConfig};
use crate::error::{Result, SessionError};
use crate::protocol::{
    error_codes, ErrorFrame, FrameKind, FrameRecord, KeepAliveFrame, Position, ResumeFrame,
    ResumeOkFrame,
};
use crate::registry::{AutomatonFactory, StreamAutomaton, StreamRegistry};
use crate::resume::{PositionTracker, ReplayCache, ResumePosition, ResumeToken};
use crate::sink::FrameSink;

/// Why a session reached `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Explicit graceful close.
    Closed,
    /// No resumption arrived within the configured timeout window.
    ResumeTimeout,
    /// Positions could not be reconciled on resume; data was lost.
    ResumptionGap,
    /// The peer's acknowledged position regressed or overran.
    AckViolation,
    /// The replay cache filled up under the `Terminate` overflow policy.
    BufferExhausted,
    /// The peer sent a connection-scoped ERROR frame.
    PeerError(u32),
    /// The peer violated the framing rules.
    ProtocolViolation,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Closed => write!(f, "closed"),
            TerminationReason::ResumeTimeout => write!(f, "resume timeout expired"),
            TerminationReason::ResumptionGap => write!(f, "unrecoverable resumption gap"),
            TerminationReason::AckViolation => write!(f, "peer acknowledgment violation"),
            TerminationReason::BufferExhausted => write!(f, "replay buffer exhausted"),
            TerminationReason::PeerError(code) => {
                write!(f, "peer error {:#x} ({})", code, error_codes::name(*code))
            }
            TerminationReason::ProtocolViolation => write!(f, "protocol violation"),
        }
    }
}

/// Session lifecycle states.
///
/// `Terminated` is terminal; every other state can still reach `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport attached, frames flowing.
    Connected,
    /// Transport lost; aggregate retained, waiting for resumption.
    Disconnected,
    /// New transport attached, RESUME handshake in flight.
    Resuming,
    /// Aggregate released; all streams cancelled.
    Terminated(TerminationReason),
}

/// Builder for a [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    token: Option<ResumeToken>,
    sink: Option<Box<dyn FrameSink>>,
}

impl SessionBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            token: None,
            sink: None,
        }
    }

    /// Set the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a specific resumption token instead of generating one.
    pub fn token(mut self, token: ResumeToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Attach the initial transport sink. A session built with a sink
    /// starts `Connected`; without one it starts `Disconnected`.
    pub fn sink(mut self, sink: impl FrameSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Build the session.
    pub fn build(self) -> Session {
        let token = self.token.unwrap_or_else(ResumeToken::generate);
        let state = if self.sink.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        };
        let cache = ReplayCache::new(
            self.config.max_replay_bytes,
            self.config.max_replay_entries,
        );

        tracing::debug!(token = %token, ?state, "session created");

        Session {
            token,
            state,
            config: self.config,
            registry: StreamRegistry::new(),
            tracker: PositionTracker::default(),
            cache,
            sink: self.sink,
        }
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-connection state aggregate.
pub struct Session {
    token: ResumeToken,
    state: SessionState,
    config: SessionConfig,
    registry: StreamRegistry,
    tracker: PositionTracker,
    cache: ReplayCache,
    sink: Option<Box<dyn FrameSink>>,
}

impl Session {
    /// Create a session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Create a detached session with the given configuration and a
    /// generated token.
    pub fn new(config: SessionConfig) -> Self {
        SessionBuilder::new().config(config).build()
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The session's resumption token.
    #[inline]
    pub fn token(&self) -> &ResumeToken {
        &self.token
    }

    /// The session configuration.
    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Check whether the session is in `Connected` state.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Check whether the session has terminated.
    #[inline]
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, SessionState::Terminated(_))
    }

    /// Number of live streams.
    #[inline]
    pub fn stream_count(&self) -> usize {
        self.registry.len()
    }

    /// The position pair presented during a resume handshake.
    #[inline]
    pub fn resume_position(&self) -> ResumePosition {
        self.tracker.resume_position()
    }

    /// Shared gauge over the replay cache's retained counts, for the
    /// `Block`-policy capacity waiter.
    pub fn replay_gauge(&self) -> ReplayGauge {
        self.cache.gauge()
    }

    /// Register an automaton for a locally-initiated stream.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateStream` if the id is live, or `Terminated` if the
    /// session is dead.
    pub fn register_stream(
        &mut self,
        stream_id: u32,
        automaton: Box<dyn StreamAutomaton>,
    ) -> Result<()> {
        self.check_live()?;
        self.registry.register(stream_id, automaton)
    }

    /// Remove a stream entry. Removing an absent id is a no-op.
    pub fn remove_stream(&mut self, stream_id: u32) -> bool {
        self.registry.remove(stream_id)
    }

    /// Submit an outbound frame.
    ///
    /// A resumable frame is assigned the next sent position, appended to
    /// the replay cache, and forwarded when the session is `Connected`.
    /// While `Disconnected` or `Resuming` it is cached only; delivery
    /// happens through replay. A transport failure during forwarding
    /// detaches the sink and leaves the frame cached, so the send itself
    /// still succeeds.
    ///
    /// Non-resumable frames are forwarded immediately and are lost if no
    /// transport is attached.
    ///
    /// Returns the assigned position for resumable frames, `None`
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns `ReplayBufferExhausted` when the cache is full under the
    /// `Block` policy (the caller waits for capacity and retries), and
    /// terminates the session first under the `Terminate` policy. Returns
    /// `TransportDetached` for a non-resumable frame with no transport.
    pub fn send(&mut self, frame: FrameRecord) -> Result<Option<Position>> {
        self.check_live()?;
        frame.validate()?;

        if !frame.resumable {
            if self.state != SessionState::Connected {
                return Err(SessionError::TransportDetached);
            }
            self.forward(frame)?;
            return Ok(None);
        }

        if self.cache.would_overflow(frame.payload_len()) {
            let exhausted = SessionError::ReplayBufferExhausted {
                entries: self.cache.len(),
                bytes: self.cache.retained_bytes(),
            };
            match self.config.on_buffer_exhausted {
                OverflowPolicy::Block => {
                    tracing::debug!(
                        stream_id = frame.stream_id,
                        "replay cache full, send rejected for retry"
                    );
                    return Err(exhausted);
                }
                OverflowPolicy::Terminate => {
                    self.terminate(TerminationReason::BufferExhausted);
                    return Err(exhausted);
                }
            }
        }

        let position = self.tracker.on_resumable_send();
        self.cache.append(position, frame.clone())?;

        if self.state == SessionState::Connected {
            // Frame is cached; a sink failure only detaches the transport.
            if self.forward(frame).is_err() {
                tracing::debug!(position, "send retained for replay after sink failure");
            }
        }

        Ok(Some(position))
    }

    /// Process one inbound frame, in transport arrival order.
    ///
    /// Connection-control frames (keep-alive, RESUME_OK, connection
    /// errors) are consumed here; everything else advances the received
    /// position when resumable and is routed to the owning automaton.
    /// Reception counts even when delivery fails: `UnknownStream` from the
    /// registry is stream-scoped and leaves the connection usable.
    ///
    /// # Errors
    ///
    /// Stream-scoped errors pass through. A frame that violates the
    /// framing rules terminates the session with `ProtocolViolation`. A
    /// RESUME frame is rejected here: resumption enters through
    /// [`Session::accept_resume`] on a fresh transport.
    pub fn handle_frame(
        &mut self,
        frame: FrameRecord,
        factory: &mut dyn AutomatonFactory,
    ) -> Result<()> {
        self.check_live()?;

        if let Err(err) = frame.validate() {
            tracing::error!(error = %err, "malformed inbound frame");
            self.terminate(TerminationReason::ProtocolViolation);
            return Err(err);
        }

        match frame.kind {
            FrameKind::KeepAlive => return self.handle_keepalive(&frame),
            FrameKind::ResumeOk => return self.handle_resume_ok(&frame),
            FrameKind::Resume => {
                return Err(SessionError::Protocol(
                    "RESUME must be presented through accept_resume on a new transport".into(),
                ));
            }
            _ => {}
        }

        if frame.is_connection_error() {
            let err = ErrorFrame::from_record(&frame)?;
            tracing::error!(
                code = format_args!("{:#x}", err.code),
                message = %err.message,
                "peer closed the connection with an error"
            );
            self.terminate(TerminationReason::PeerError(err.code));
            return Ok(());
        }

        if frame.resumable {
            self.tracker.on_resumable_receive();
        }

        self.registry.dispatch(frame, factory)
    }

    /// Record a peer acknowledgment and evict the acknowledged prefix.
    ///
    /// # Errors
    ///
    /// `AckRegression` and `AckOverrun` are connection-fatal: the session
    /// terminates with `AckViolation` before the error is returned.
    pub fn on_peer_ack(&mut self, position: Position) -> Result<()> {
        self.check_live()?;
        match self.tracker.on_peer_ack(position) {
            Ok(()) => {
                self.cache.evict_up_to(position);
                Ok(())
            }
            Err(err) => {
                tracing::error!(position, error = %err, "peer acknowledgment rejected");
                self.terminate(TerminationReason::AckViolation);
                Err(err)
            }
        }
    }

    /// React to transport loss.
    ///
    /// The aggregate is retained in full: registry, tracker, and cache are
    /// untouched. Only the sink is released. No-op unless `Connected` or
    /// `Resuming`.
    pub fn on_transport_lost(&mut self) {
        match self.state {
            SessionState::Connected | SessionState::Resuming => {
                self.sink = None;
                self.state = SessionState::Disconnected;
                tracing::info!(
                    token = %self.token,
                    streams = self.registry.len(),
                    retained = self.cache.len(),
                    "transport lost, session disconnected"
                );
            }
            SessionState::Disconnected | SessionState::Terminated(_) => {}
        }
    }

    /// The resume-timeout window expired with no resumption.
    ///
    /// Terminates a `Disconnected` session and reports true; in any other
    /// state this is a no-op reporting false (the timer may race a
    /// successful resume or another terminal transition).
    pub fn on_resume_timeout(&mut self) -> bool {
        if self.state == SessionState::Disconnected {
            self.terminate(TerminationReason::ResumeTimeout);
            return true;
        }
        false
    }

    /// Start the resumption handshake from the initiating side.
    ///
    /// Attaches the new transport, sends a RESUME frame carrying this
    /// session's positions, and enters `Resuming`. The handshake completes
    /// when the RESUME_OK answer goes through [`Session::handle_frame`].
    ///
    /// # Errors
    ///
    /// Rejected with a `Protocol` error unless the session is
    /// `Disconnected`. A sink failure detaches again and returns
    /// `ChannelClosed`.
    pub fn initiate_resume(&mut self, sink: Box<dyn FrameSink>) -> Result<()> {
        self.check_live()?;
        if self.state != SessionState::Disconnected {
            return Err(SessionError::Protocol(format!(
                "cannot initiate resume from {:?} state",
                self.state
            )));
        }

        let positions = self.tracker.resume_position();
        let resume = ResumeFrame::new(
            &self.token,
            positions.last_received,
            positions.last_sent,
        );
        let record = resume.to_record()?;

        self.sink = Some(sink);
        self.state = SessionState::Resuming;
        tracing::info!(
            token = %self.token,
            last_sent = positions.last_sent,
            last_received = positions.last_received,
            "initiating resume on new transport"
        );

        self.forward(record)
    }

    /// Accept a RESUME handshake from a reconnecting peer.
    ///
    /// Validates the token and positions, treats the peer's claimed
    /// received position as an acknowledgment, replies RESUME_OK with the
    /// local received position, replays the unacknowledged tail, and
    /// returns to `Connected`. Returns the number of replayed frames.
    ///
    /// # Errors
    ///
    /// A token mismatch or a resume in any state but `Disconnected` is
    /// rejected with a `Protocol` error, without mutating positions. An
    /// unrecoverable gap (the peer rewound, or needed frames were already
    /// evicted) terminates the session and returns `ResumptionFailed`.
    pub fn accept_resume(
        &mut self,
        resume: &ResumeFrame,
        sink: Box<dyn FrameSink>,
    ) -> Result<usize> {
        self.check_live()?;
        if self.state != SessionState::Disconnected {
            return Err(SessionError::Protocol(format!(
                "RESUME rejected in {:?} state",
                self.state
            )));
        }
        if resume.token() != self.token {
            return Err(SessionError::Protocol(
                "RESUME token does not match this session".into(),
            ));
        }

        // The peer cannot have sent less than we already received.
        let received = self.tracker.last_received();
        if resume.last_sent_position < received {
            tracing::error!(
                peer_sent = resume.last_sent_position,
                local_received = received,
                "peer rewound its sent position"
            );
            self.terminate(TerminationReason::ResumptionGap);
            return Err(SessionError::ResumptionFailed {
                requested: resume.last_sent_position,
                earliest: received,
            });
        }

        // Check the replay window before mutating anything.
        let earliest = self.cache.earliest_replayable();
        if resume.last_received_position < earliest {
            tracing::error!(
                peer_received = resume.last_received_position,
                earliest,
                "replay window no longer covers the peer's position"
            );
            self.terminate(TerminationReason::ResumptionGap);
            return Err(SessionError::ResumptionFailed {
                requested: resume.last_received_position,
                earliest,
            });
        }

        self.sink = Some(sink);
        self.state = SessionState::Resuming;

        self.on_peer_ack(resume.last_received_position)?;

        let ok = ResumeOkFrame::new(self.tracker.last_received());
        let record = ok.to_record()?;
        self.forward(record)?;

        let replayed = self.replay_unacked(resume.last_received_position)?;
        self.state = SessionState::Connected;
        tracing::info!(token = %self.token, replayed, "resume accepted, session connected");
        Ok(replayed)
    }

    /// Gracefully close the session.
    ///
    /// Idempotent: closing a terminated session is a no-op.
    pub fn close(&mut self) {
        self.terminate(TerminationReason::Closed);
    }

    /// Force the session into `Terminated`.
    ///
    /// Automatons are notified of cancellation before the registry is
    /// cleared, and the transport is released last. Repeated calls keep
    /// the first reason.
    pub fn terminate(&mut self, reason: TerminationReason) {
        if self.is_terminated() {
            return;
        }

        match reason {
            TerminationReason::Closed => {
                tracing::info!(token = %self.token, "session closed");
            }
            _ => {
                tracing::error!(token = %self.token, reason = %reason, "session terminated");
            }
        }

        self.registry.cancel_all();
        self.cache.clear();
        self.state = SessionState::Terminated(reason);
        self.sink = None;
    }

    /// Send a keep-alive carrying the cumulative received position.
    ///
    /// # Errors
    ///
    /// Returns `TransportDetached` unless the session is `Connected`.
    pub fn send_keepalive(&mut self, respond: bool) -> Result<()> {
        self.check_live()?;
        if self.state != SessionState::Connected {
            return Err(SessionError::TransportDetached);
        }
        let keepalive = KeepAliveFrame::new(respond, self.tracker.last_received());
        self.forward(keepalive.to_record()?)
    }

    fn handle_keepalive(&mut self, frame: &FrameRecord) -> Result<()> {
        let keepalive = KeepAliveFrame::from_record(frame)?;
        self.on_peer_ack(keepalive.last_received_position)?;

        if keepalive.respond && self.state == SessionState::Connected {
            let reply = KeepAliveFrame::new(false, self.tracker.last_received());
            let record = reply.to_record()?;
            // A failed reply already detached the transport; the keep-alive
            // itself was processed.
            if self.forward(record).is_err() {
                tracing::debug!("keep-alive reply dropped with the transport");
            }
        }
        Ok(())
    }

    fn handle_resume_ok(&mut self, frame: &FrameRecord) -> Result<()> {
        if self.state != SessionState::Resuming {
            return Err(SessionError::Protocol(format!(
                "RESUME_OK rejected in {:?} state",
                self.state
            )));
        }

        let ok = ResumeOkFrame::from_record(frame)?;
        self.on_peer_ack(ok.last_received_position)?;

        let replayed = self.replay_unacked(ok.last_received_position)?;
        self.state = SessionState::Connected;
        tracing::info!(token = %self.token, replayed, "resume completed, session connected");
        Ok(())
    }

    /// Resend every cached frame past `from`, in position order.
    fn replay_unacked(&mut self, from: Position) -> Result<usize> {
        let frames: Vec<FrameRecord> = match self.cache.replay_from(from) {
            Ok(iter) => iter.map(|entry| entry.frame.clone()).collect(),
            Err(SessionError::PositionUnavailable { requested, earliest }) => {
                self.terminate(TerminationReason::ResumptionGap);
                return Err(SessionError::ResumptionFailed { requested, earliest });
            }
            Err(other) => return Err(other),
        };

        let count = frames.len();
        for frame in frames {
            self.forward(frame)?;
        }
        if count > 0 {
            tracing::debug!(from, count, "replayed unacknowledged tail");
        }
        Ok(count)
    }

    /// Hand a frame to the sink. A failure detaches the transport and
    /// moves the session to `Disconnected`.
    fn forward(&mut self, frame: FrameRecord) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => match sink.send_frame(frame) {
                Ok(()) => Ok(()),
                Err(err) => {
                    tracing::warn!(error = %err, "transport sink failed, detaching");
                    self.on_transport_lost();
                    Err(SessionError::ChannelClosed)
                }
            },
            None => Err(SessionError::TransportDetached),
        }
    }

    fn check_live(&self) -> Result<()> {
        if let SessionState::Terminated(reason) = self.state {
            return Err(SessionError::Terminated(reason));
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token)
            .field("state", &self.state)
            .field("streams", &self.registry.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StreamAutomaton;
    use crate::sink::CollectorSink;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct NullAutomaton {
        cancelled: Arc<AtomicBool>,
    }

    impl StreamAutomaton for NullAutomaton {
        fn accept_frame(&mut self, _frame: FrameRecord) -> Result<()> {
            Ok(())
        }

        fn on_cancelled(&mut self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        fn is_terminal(&self) -> bool {
            false
        }
    }

    fn null_factory() -> impl AutomatonFactory {
        |_frame: &FrameRecord| -> Box<dyn StreamAutomaton> {
            Box::new(NullAutomaton {
                cancelled: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    fn connected_session(config: SessionConfig) -> (Session, CollectorSink) {
        let sink = CollectorSink::new();
        let session = Session::builder().config(config).sink(sink.clone()).build();
        (session, sink)
    }

    fn payload(stream_id: u32, tag: &'static [u8]) -> FrameRecord {
        FrameRecord::new(stream_id, FrameKind::Payload, Bytes::from_static(tag))
    }

    #[test]
    fn test_send_assigns_positions_and_forwards() {
        let (mut session, sink) = connected_session(SessionConfig::default());

        assert_eq!(session.send(payload(1, b"a")).unwrap(), Some(1));
        assert_eq!(session.send(payload(1, b"b")).unwrap(), Some(2));
        assert_eq!(session.send(payload(3, b"c")).unwrap(), Some(3));

        assert_eq!(sink.len(), 3);
        let gauge = session.replay_gauge();
        assert_eq!(gauge.entries(), 3);
        assert_eq!(gauge.bytes(), 3);
    }

    #[test]
    fn test_send_non_resumable_not_cached() {
        let (mut session, sink) = connected_session(SessionConfig::default());

        session.send_keepalive(true).unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.collected()[0].kind, FrameKind::KeepAlive);
        assert_eq!(session.replay_gauge().entries(), 0);
    }

    #[test]
    fn test_send_while_disconnected_caches_only() {
        let (mut session, sink) = connected_session(SessionConfig::default());
        session.on_transport_lost();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.send(payload(1, b"queued")).unwrap(), Some(1));

        assert!(sink.is_empty());
        assert_eq!(session.replay_gauge().entries(), 1);

        // Non-resumable frames need a live transport
        let result = session.send_keepalive(false);
        assert!(matches!(result, Err(SessionError::TransportDetached)));
    }

    #[test]
    fn test_peer_ack_evicts_cache() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        for tag in [b"a", b"b", b"c", b"d", b"e"] {
            session.send(payload(1, tag)).unwrap();
        }

        session.on_peer_ack(3).unwrap();

        assert_eq!(session.replay_gauge().entries(), 2);
        assert_eq!(session.resume_position().last_sent, 5);
    }

    #[test]
    fn test_ack_regression_terminates() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        for tag in [b"a", b"b", b"c"] {
            session.send(payload(1, tag)).unwrap();
        }
        session.on_peer_ack(3).unwrap();

        let result = session.on_peer_ack(1);
        assert!(matches!(
            result,
            Err(SessionError::AckRegression {
                acked: 3,
                claimed: 1
            })
        ));
        assert_eq!(
            session.state(),
            SessionState::Terminated(TerminationReason::AckViolation)
        );

        // Everything afterwards reports the terminal state
        let result = session.send(payload(1, b"late"));
        assert!(matches!(result, Err(SessionError::Terminated(_))));
    }

    #[test]
    fn test_ack_overrun_terminates() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        session.send(payload(1, b"only")).unwrap();

        let result = session.on_peer_ack(5);
        assert!(matches!(
            result,
            Err(SessionError::AckOverrun {
                sent: 1,
                claimed: 5
            })
        ));
        assert!(session.is_terminated());
    }

    #[test]
    fn test_transport_loss_preserves_aggregate() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        let mut factory = null_factory();

        session.send(payload(1, b"sent")).unwrap();
        session
            .handle_frame(payload(2, b"ignored"), &mut factory)
            .unwrap_err(); // UnknownStream, still counts as received
        session
            .handle_frame(
                FrameRecord::new(2, FrameKind::RequestStream, Bytes::new()),
                &mut factory,
            )
            .unwrap();

        let before = session.resume_position();
        session.on_transport_lost();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.resume_position(), before);
        assert_eq!(session.stream_count(), 1);
        assert_eq!(session.replay_gauge().entries(), 1);

        // Redundant loss notifications are no-ops
        session.on_transport_lost();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_inbound_resumable_advances_received_position() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        let mut factory = null_factory();

        for _ in 0..3 {
            session
                .handle_frame(
                    FrameRecord::new(2, FrameKind::RequestStream, Bytes::new()),
                    &mut factory,
                )
                .ok();
        }

        // First frame creates the stream; re-initiation frames still count
        assert_eq!(session.resume_position().last_received, 3);
    }

    #[test]
    fn test_unknown_stream_is_survivable() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        let mut factory = null_factory();

        let result = session.handle_frame(payload(9, b"stray"), &mut factory);
        assert!(matches!(result, Err(SessionError::UnknownStream(9))));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_malformed_frame_terminates() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        let mut factory = null_factory();

        // Keep-alive on a non-zero stream violates framing rules
        let bad = FrameRecord::new(5, FrameKind::KeepAlive, Bytes::new());
        let result = session.handle_frame(bad, &mut factory);

        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert_eq!(
            session.state(),
            SessionState::Terminated(TerminationReason::ProtocolViolation)
        );
    }

    #[test]
    fn test_keepalive_acks_and_replies() {
        let (mut session, sink) = connected_session(SessionConfig::default());
        let mut factory = null_factory();
        for tag in [b"a", b"b", b"c"] {
            session.send(payload(1, tag)).unwrap();
        }
        sink.take_collected();

        let keepalive = KeepAliveFrame::new(true, 2).to_record().unwrap();
        session.handle_frame(keepalive, &mut factory).unwrap();

        // Ack evicted positions 1..=2
        assert_eq!(session.replay_gauge().entries(), 1);

        // respond=true triggered a reply without the respond flag
        let replies = sink.collected();
        assert_eq!(replies.len(), 1);
        let reply = KeepAliveFrame::from_record(&replies[0]).unwrap();
        assert!(!reply.respond);
    }

    #[test]
    fn test_peer_connection_error_terminates() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        let mut factory = null_factory();

        let record = ErrorFrame::connection_error("going away")
            .to_record()
            .unwrap();
        session.handle_frame(record, &mut factory).unwrap();

        assert_eq!(
            session.state(),
            SessionState::Terminated(TerminationReason::PeerError(
                error_codes::CONNECTION_ERROR
            ))
        );
    }

    #[test]
    fn test_initiate_resume_sends_positions() {
        let (mut session, _old_sink) = connected_session(SessionConfig::default());
        let mut factory = null_factory();
        session.send(payload(1, b"a")).unwrap();
        session.send(payload(1, b"b")).unwrap();
        session
            .handle_frame(
                FrameRecord::new(2, FrameKind::RequestFnf, Bytes::new()),
                &mut factory,
            )
            .unwrap();
        session.on_transport_lost();

        let new_sink = CollectorSink::new();
        session
            .initiate_resume(Box::new(new_sink.clone()))
            .unwrap();

        assert_eq!(session.state(), SessionState::Resuming);
        let sent = new_sink.collected();
        assert_eq!(sent.len(), 1);
        let resume = ResumeFrame::from_record(&sent[0]).unwrap();
        assert_eq!(resume.token(), *session.token());
        assert_eq!(resume.last_sent_position, 2);
        assert_eq!(resume.last_received_position, 1);
    }

    #[test]
    fn test_initiate_resume_requires_disconnected() {
        let (mut session, _sink) = connected_session(SessionConfig::default());

        let result = session.initiate_resume(Box::new(CollectorSink::new()));
        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_resume_ok_replays_tail_and_reconnects() {
        let (mut session, _old_sink) = connected_session(SessionConfig::default());
        let mut factory = null_factory();
        for tag in [b"a", b"b", b"c", b"d"] {
            session.send(payload(1, tag)).unwrap();
        }
        session.on_transport_lost();

        let new_sink = CollectorSink::new();
        session
            .initiate_resume(Box::new(new_sink.clone()))
            .unwrap();
        new_sink.take_collected();

        // Peer confirms it received up through position 2
        let ok = ResumeOkFrame::new(2).to_record().unwrap();
        session.handle_frame(ok, &mut factory).unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        let replayed = new_sink.collected();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].payload(), b"c");
        assert_eq!(replayed[1].payload(), b"d");
        // Acked prefix was evicted
        assert_eq!(session.replay_gauge().entries(), 2);
    }

    #[test]
    fn test_resume_ok_outside_handshake_rejected() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        let mut factory = null_factory();

        let ok = ResumeOkFrame::new(0).to_record().unwrap();
        let result = session.handle_frame(ok, &mut factory);

        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_accept_resume_happy_path() {
        let (mut session, _old_sink) = connected_session(SessionConfig::default());
        let mut factory = null_factory();
        for tag in [b"a", b"b", b"c"] {
            session.send(payload(1, tag)).unwrap();
        }
        session
            .handle_frame(
                FrameRecord::new(2, FrameKind::RequestFnf, Bytes::new()),
                &mut factory,
            )
            .unwrap();
        session.on_transport_lost();

        // Peer received 1 of our 3 frames and sent us 1 frame
        let resume = ResumeFrame::new(session.token(), 1, 1);
        let new_sink = CollectorSink::new();
        let replayed = session
            .accept_resume(&resume, Box::new(new_sink.clone()))
            .unwrap();

        assert_eq!(replayed, 2);
        assert_eq!(session.state(), SessionState::Connected);

        let sent = new_sink.collected();
        // RESUME_OK first, then the replayed tail in order
        let ok = ResumeOkFrame::from_record(&sent[0]).unwrap();
        assert_eq!(ok.last_received_position, 1);
        assert_eq!(sent[1].payload(), b"b");
        assert_eq!(sent[2].payload(), b"c");
    }

    #[test]
    fn test_accept_resume_with_matching_positions_replays_nothing() {
        let (mut session, _old_sink) = connected_session(SessionConfig::default());
        for tag in [b"a", b"b"] {
            session.send(payload(1, tag)).unwrap();
        }
        session.on_transport_lost();

        let resume = ResumeFrame::new(session.token(), 2, 0);
        let new_sink = CollectorSink::new();
        let replayed = session
            .accept_resume(&resume, Box::new(new_sink.clone()))
            .unwrap();

        assert_eq!(replayed, 0);
        assert_eq!(session.state(), SessionState::Connected);
        // Only the RESUME_OK went out
        assert_eq!(new_sink.len(), 1);
    }

    #[test]
    fn test_accept_resume_token_mismatch_rejected_without_mutation() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        session.send(payload(1, b"a")).unwrap();
        session.on_transport_lost();
        let before = session.resume_position();

        let resume = ResumeFrame::new(&ResumeToken::generate(), 1, 0);
        let result = session.accept_resume(&resume, Box::new(CollectorSink::new()));

        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.resume_position(), before);
    }

    #[test]
    fn test_accept_resume_while_connected_rejected() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        let token = session.token().clone();

        let resume = ResumeFrame::new(&token, 0, 0);
        let result = session.accept_resume(&resume, Box::new(CollectorSink::new()));

        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_accept_resume_gap_terminates() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        for tag in [b"a", b"b", b"c", b"d", b"e"] {
            session.send(payload(1, tag)).unwrap();
        }
        // Peer previously acked through 4; positions 1..=4 are gone
        session.on_peer_ack(4).unwrap();
        session.on_transport_lost();

        // Peer now claims it only received 2: frames 3 and 4 were evicted
        let resume = ResumeFrame::new(session.token(), 2, 0);
        let result = session.accept_resume(&resume, Box::new(CollectorSink::new()));

        assert!(matches!(
            result,
            Err(SessionError::ResumptionFailed {
                requested: 2,
                earliest: 4
            })
        ));
        assert_eq!(
            session.state(),
            SessionState::Terminated(TerminationReason::ResumptionGap)
        );
        assert_eq!(session.stream_count(), 0);
    }

    #[test]
    fn test_accept_resume_peer_rewound_terminates() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        let mut factory = null_factory();
        // We received 2 resumable frames from the peer
        for _ in 0..2 {
            session
                .handle_frame(
                    FrameRecord::new(2, FrameKind::RequestFnf, Bytes::new()),
                    &mut factory,
                )
                .unwrap();
        }
        session.on_transport_lost();

        // Peer now claims it only ever sent 1
        let resume = ResumeFrame::new(session.token(), 0, 1);
        let result = session.accept_resume(&resume, Box::new(CollectorSink::new()));

        assert!(matches!(
            result,
            Err(SessionError::ResumptionFailed {
                requested: 1,
                earliest: 2
            })
        ));
        assert_eq!(
            session.state(),
            SessionState::Terminated(TerminationReason::ResumptionGap)
        );
    }

    #[test]
    fn test_close_cancels_streams_and_clears_cache() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        let cancelled = Arc::new(AtomicBool::new(false));
        session
            .register_stream(
                1,
                Box::new(NullAutomaton {
                    cancelled: cancelled.clone(),
                }),
            )
            .unwrap();
        session.send(payload(1, b"pending")).unwrap();

        session.close();

        assert_eq!(
            session.state(),
            SessionState::Terminated(TerminationReason::Closed)
        );
        assert!(cancelled.load(Ordering::SeqCst));
        assert_eq!(session.stream_count(), 0);
        assert_eq!(session.replay_gauge().entries(), 0);

        // Idempotent: the first reason sticks
        session.terminate(TerminationReason::ProtocolViolation);
        assert_eq!(
            session.state(),
            SessionState::Terminated(TerminationReason::Closed)
        );
    }

    #[test]
    fn test_resume_timeout_only_fires_while_disconnected() {
        let (mut session, _sink) = connected_session(SessionConfig::default());

        assert!(!session.on_resume_timeout());
        assert_eq!(session.state(), SessionState::Connected);

        session.on_transport_lost();
        assert!(session.on_resume_timeout());
        assert_eq!(
            session.state(),
            SessionState::Terminated(TerminationReason::ResumeTimeout)
        );
    }

    #[test]
    fn test_overflow_block_policy_rejects_without_terminating() {
        let config = SessionConfig::default()
            .with_max_replay_entries(2)
            .with_overflow_policy(OverflowPolicy::Block);
        let (mut session, _sink) = connected_session(config);

        session.send(payload(1, b"a")).unwrap();
        session.send(payload(1, b"b")).unwrap();

        let result = session.send(payload(1, b"c"));
        assert!(matches!(
            result,
            Err(SessionError::ReplayBufferExhausted { entries: 2, .. })
        ));
        assert_eq!(session.state(), SessionState::Connected);

        // An ack frees capacity and the same send succeeds
        session.on_peer_ack(1).unwrap();
        assert_eq!(session.send(payload(1, b"c")).unwrap(), Some(3));
    }

    #[test]
    fn test_overflow_terminate_policy_kills_session() {
        let config = SessionConfig::default()
            .with_max_replay_entries(1)
            .with_overflow_policy(OverflowPolicy::Terminate);
        let (mut session, _sink) = connected_session(config);

        session.send(payload(1, b"a")).unwrap();
        let result = session.send(payload(1, b"b"));

        assert!(matches!(
            result,
            Err(SessionError::ReplayBufferExhausted { .. })
        ));
        assert_eq!(
            session.state(),
            SessionState::Terminated(TerminationReason::BufferExhausted)
        );
    }

    #[test]
    fn test_sink_failure_on_send_detaches_but_caches() {
        let (sink, rx) = crate::sink::ChannelSink::channel();
        let mut session = Session::builder().sink(sink).build();
        drop(rx);

        // The frame is cached even though the transport is gone
        assert_eq!(session.send(payload(1, b"kept")).unwrap(), Some(1));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.replay_gauge().entries(), 1);
    }

    #[test]
    fn test_resume_is_idempotent_for_same_peer_position() {
        let (mut session, _sink) = connected_session(SessionConfig::default());
        for tag in [b"a", b"b", b"c", b"d"] {
            session.send(payload(1, tag)).unwrap();
        }
        session.on_transport_lost();

        let token = session.token().clone();
        let first_sink = CollectorSink::new();
        session
            .accept_resume(&ResumeFrame::new(&token, 2, 0), Box::new(first_sink.clone()))
            .unwrap();
        let first: Vec<_> = first_sink.collected()[1..]
            .iter()
            .map(|f| f.payload_bytes())
            .collect();

        // Drop the transport again and resume with the same position
        session.on_transport_lost();
        let second_sink = CollectorSink::new();
        session
            .accept_resume(&ResumeFrame::new(&token, 2, 0), Box::new(second_sink.clone()))
            .unwrap();
        let second: Vec<_> = second_sink.collected()[1..]
            .iter()
            .map(|f| f.payload_bytes())
            .collect();

        assert_eq!(first, second);
        assert_eq!(first, vec![Bytes::from_static(b"c"), Bytes::from_static(b"d")]);
    }
}

//! Process-level session manager.
//!
//! The manager owns the resumption token → session table and the
//! resume-timeout timers. Sessions stay synchronous; the manager wraps each
//! one in a `tokio::sync::Mutex` so all mutating operations on a single
//! aggregate are serialized, and different sessions proceed in parallel.
//!
//! Terminal outcomes surface on the manager's event channel as
//! [`SessionEvent`]s; the owning application consumes the receiver returned
//! by [`SessionManager::new`].
//!
//! # Workflow
//!
//! 1. `create_session` registers a new aggregate under a fresh token
//! 2. `on_transport_lost` detaches the session and arms the resume timer
//! 3. `resume` looks the token up, cancels the timer, and runs the
//!    handshake on the new transport
//! 4. If the timer fires first, the session terminates and leaves the table

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::protocol::{FrameRecord, ResumeFrame};
use crate::resume::ResumeToken;
use crate::session::{Session, SessionState, TerminationReason};
use crate::sink::FrameSink;

/// Shared handle to one session, serialized by the manager.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Terminal and lifecycle notifications emitted by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session completed a resume handshake.
    Resumed {
        /// The session's token.
        token: ResumeToken,
        /// Number of frames replayed to the peer.
        replayed: usize,
    },
    /// A session reached `Terminated` and left the table.
    Terminated {
        /// The session's token.
        token: ResumeToken,
        /// Why it terminated.
        reason: TerminationReason,
    },
}

struct SessionSlot {
    session: SessionHandle,
    /// Dropping the sender cancels the pending resume timer.
    timer_cancel: Option<oneshot::Sender<()>>,
    /// Bumped on every arm; a lapsed timer whose epoch no longer matches
    /// has been superseded and must not touch the session.
    timer_epoch: u64,
}

/// The token → session table plus resume timers.
///
/// Clones share the same table and event channel.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<ResumeToken, SessionSlot>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionManager {
    /// Create a manager and the receiving half of its event channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                sessions: Arc::new(Mutex::new(HashMap::new())),
                events,
            },
            events_rx,
        )
    }

    /// Create a session attached to `sink` and register it under a fresh
    /// token.
    pub async fn create_session(
        &self,
        config: SessionConfig,
        sink: impl FrameSink + 'static,
    ) -> (ResumeToken, SessionHandle) {
        let session = Session::builder().config(config).sink(sink).build();
        self.register_session(session).await
    }

    /// Register an externally built session under its own token.
    ///
    /// Used when the token is dictated from outside, typically the one a
    /// connecting peer presented at session establishment.
    pub async fn register_session(&self, session: Session) -> (ResumeToken, SessionHandle) {
        let token = session.token().clone();
        let handle: SessionHandle = Arc::new(Mutex::new(session));

        self.sessions.lock().await.insert(
            token.clone(),
            SessionSlot {
                session: handle.clone(),
                timer_cancel: None,
                timer_epoch: 0,
            },
        );
        tracing::debug!(token = %token, "session registered");

        (token, handle)
    }

    /// Look up a session by token.
    pub async fn session(&self, token: &ResumeToken) -> Option<SessionHandle> {
        self.sessions
            .lock()
            .await
            .get(token)
            .map(|slot| slot.session.clone())
    }

    /// Number of sessions currently in the table.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Notify a session that its transport is gone and arm the resume
    /// timer.
    ///
    /// Arming keys off the session being `Disconnected` after the call,
    /// not off the transition observed here, so a session that already
    /// detached itself on a sink failure still gets its window. A pending
    /// timer keeps its original deadline; repeating the notification does
    /// not reset the window. If no resume arrives within the session's
    /// configured `resume_timeout`, the session terminates, leaves the
    /// table, and a `Terminated` event is emitted.
    ///
    /// # Errors
    ///
    /// Returns `UnknownToken` if the token is not in the table.
    pub async fn on_transport_lost(&self, token: &ResumeToken) -> Result<()> {
        let session = self
            .session(token)
            .await
            .ok_or(SessionError::UnknownToken)?;

        let timeout = {
            let mut guard = session.lock().await;
            guard.on_transport_lost();
            if guard.state() != SessionState::Disconnected {
                return Ok(());
            }
            guard.config().resume_timeout
        };

        self.arm_resume_timer(token, session, timeout).await;
        Ok(())
    }

    /// Arm the resume-timeout timer for a `Disconnected` session.
    ///
    /// No-op when the slot is gone or a timer is already pending, so the
    /// window is never extended by repeated arming.
    async fn arm_resume_timer(
        &self,
        token: &ResumeToken,
        session: SessionHandle,
        timeout: Duration,
    ) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let epoch = {
            let mut table = self.sessions.lock().await;
            match table.get_mut(token) {
                Some(slot) if slot.timer_cancel.is_none() => {
                    slot.timer_epoch += 1;
                    slot.timer_cancel = Some(cancel_tx);
                    slot.timer_epoch
                }
                _ => return,
            }
        };

        let sessions = self.sessions.clone();
        let events = self.events.clone();
        let token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    // Claim the slot before touching the session: a missing
                    // slot or a bumped epoch means another actor (close, gap
                    // termination, a re-arm) owns the outcome now.
                    {
                        let mut table = sessions.lock().await;
                        match table.get_mut(&token) {
                            Some(slot) if slot.timer_epoch == epoch => {
                                slot.timer_cancel = None;
                            }
                            _ => return,
                        }
                    }
                    let timed_out = {
                        let mut guard = session.lock().await;
                        guard.on_resume_timeout()
                    };
                    if timed_out {
                        sessions.lock().await.remove(&token);
                        let _ = events.send(SessionEvent::Terminated {
                            token,
                            reason: TerminationReason::ResumeTimeout,
                        });
                    }
                }
                _ = cancel_rx => {
                    tracing::debug!(token = %token, "resume timer cancelled");
                }
            }
        });
    }

    /// Run the accepting side of a resume handshake on a new transport.
    ///
    /// Cancels the pending resume timer, validates positions, replays the
    /// unacknowledged tail, and emits a `Resumed` event. Returns the
    /// number of replayed frames.
    ///
    /// # Errors
    ///
    /// Returns `UnknownToken` for a token absent from the table (expired
    /// or never issued). Handshake failures pass through from
    /// [`Session::accept_resume`]; if the failure terminated the session
    /// it also leaves the table with a `Terminated` event, and a
    /// non-terminal failure that leaves the session `Disconnected`
    /// restarts the resume window.
    pub async fn resume(
        &self,
        resume: &ResumeFrame,
        sink: Box<dyn FrameSink>,
    ) -> Result<usize> {
        let token = resume.token();

        let (session, timer_cancel) = {
            let mut table = self.sessions.lock().await;
            let slot = table.get_mut(&token).ok_or(SessionError::UnknownToken)?;
            (slot.session.clone(), slot.timer_cancel.take())
        };
        // Dropping the sender releases the timer task.
        drop(timer_cancel);

        let (result, terminal) = {
            let mut guard = session.lock().await;
            let result = guard.accept_resume(resume, sink);
            let terminal = match guard.state() {
                SessionState::Terminated(reason) => Some(reason),
                _ => None,
            };
            (result, terminal)
        };

        match result {
            Ok(replayed) => {
                let _ = self.events.send(SessionEvent::Resumed {
                    token: token.clone(),
                    replayed,
                });
                Ok(replayed)
            }
            Err(err) => {
                if let Some(reason) = terminal {
                    self.sessions.lock().await.remove(&token);
                    let _ = self.events.send(SessionEvent::Terminated { token, reason });
                } else {
                    // The handshake failed without terminating (for example
                    // the replacement transport died mid-handshake). The
                    // session is still waiting, so it gets its window back.
                    let timeout = {
                        let guard = session.lock().await;
                        if guard.state() == SessionState::Disconnected {
                            Some(guard.config().resume_timeout)
                        } else {
                            None
                        }
                    };
                    if let Some(timeout) = timeout {
                        self.arm_resume_timer(&token, session, timeout).await;
                    }
                }
                Err(err)
            }
        }
    }

    /// Decode a RESUME record and run the handshake.
    ///
    /// Convenience for transports handing over the first frame of a new
    /// connection.
    pub async fn resume_from_record(
        &self,
        record: &FrameRecord,
        sink: Box<dyn FrameSink>,
    ) -> Result<usize> {
        let resume = ResumeFrame::from_record(record)?;
        self.resume(&resume, sink).await
    }

    /// Gracefully close a session and remove it from the table.
    ///
    /// # Errors
    ///
    /// Returns `UnknownToken` if the token is not in the table.
    pub async fn close(&self, token: &ResumeToken) -> Result<()> {
        self.finish(token, TerminationReason::Closed).await
    }

    /// Force-terminate a session and remove it from the table.
    ///
    /// # Errors
    ///
    /// Returns `UnknownToken` if the token is not in the table.
    pub async fn terminate(
        &self,
        token: &ResumeToken,
        reason: TerminationReason,
    ) -> Result<()> {
        self.finish(token, reason).await
    }

    async fn finish(&self, token: &ResumeToken, reason: TerminationReason) -> Result<()> {
        let slot = self
            .sessions
            .lock()
            .await
            .remove(token)
            .ok_or(SessionError::UnknownToken)?;

        {
            let mut guard = slot.session.lock().await;
            guard.terminate(reason);
        }

        let _ = self.events.send(SessionEvent::Terminated {
            token: token.clone(),
            reason,
        });
        Ok(())
    }
}

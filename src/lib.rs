//! # resumux
//!
//! Per-connection state core for multiplexed, resumable streaming sessions.
//!
//! Many logical streams share one connection; this crate keeps the state
//! that lets a session survive the connection dying underneath it. On
//! transport loss the per-session aggregate is retained under an opaque
//! resumption token, and a RESUME handshake on a fresh transport replays
//! exactly the frames the peer never received.
//!
//! ## Architecture
//!
//! - **Core** (synchronous): [`Session`] owns the stream registry, the
//!   position tracker, and the bounded replay cache; all transitions are
//!   in-memory and bounded-time
//! - **Shell** (tokio): [`SessionManager`] owns the token → session table,
//!   the resume-timeout timers, and the terminal event channel
//!
//! ## Example
//!
//! ```ignore
//! use resumux::{SessionConfig, SessionManager};
//! use resumux::sink::ChannelSink;
//!
//! #[tokio::main]
//! async fn main() -> resumux::Result<()> {
//!     let (manager, mut events) = SessionManager::new();
//!
//!     let (sink, transport_rx) = ChannelSink::channel();
//!     let (token, session) = manager
//!         .create_session(SessionConfig::default(), sink)
//!         .await;
//!
//!     session.lock().await.send(frame)?;
//!
//!     // The transport drops; the aggregate is retained under the token.
//!     manager.on_transport_lost(&token).await?;
//!
//!     // The peer reconnects and presents the token.
//!     let (new_sink, new_transport_rx) = ChannelSink::channel();
//!     let replayed = manager.resume(&resume_frame, Box::new(new_sink)).await?;
//!     Ok(())
//! }
//! ```

pub mod backpressure;
pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod resume;
pub mod sink;

mod session;

pub use config::{OverflowPolicy, SessionConfig};
pub use error::{Result, SessionError};
pub use manager::{SessionEvent, SessionHandle, SessionManager};
pub use protocol::{FrameKind, FrameRecord, Position, StreamId};
pub use registry::{AutomatonFactory, StreamAutomaton, StreamRegistry};
pub use resume::ResumeToken;
pub use session::{Session, SessionBuilder, SessionState, TerminationReason};
pub use sink::{ChannelSink, CollectorSink, FrameSink};

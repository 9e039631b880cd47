//! Connection-control frame payloads.
//!
//! RESUME, RESUME_OK, ERROR, and KEEPALIVE frames carry a small set of typed
//! fields MessagePack-encoded in the record payload. Application payloads stay
//! opaque to the core; only these control payloads are interpreted here.
//!
//! Encoding always uses `to_vec_named` so fields travel as maps keyed by name,
//! which keeps the control plane decodable by other protocol implementations.
//!
//! # Example
//!
//! ```
//! use resumux::protocol::{KeepAliveFrame, FrameKind};
//!
//! let ka = KeepAliveFrame::new(true, 42);
//! let record = ka.to_record().unwrap();
//! assert_eq!(record.kind, FrameKind::KeepAlive);
//!
//! let parsed = KeepAliveFrame::from_record(&record).unwrap();
//! assert_eq!(parsed.last_received_position, 42);
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::resume::ResumeToken;

use super::record::{FrameKind, FrameRecord, Position};

/// Error codes carried by ERROR frames.
///
/// Codes below `APPLICATION_ERROR` are connection-scoped.
pub mod error_codes {
    /// Resumption rejected: the claimed position is no longer replayable
    /// or the token is unknown.
    pub const REJECTED_RESUME: u32 = 0x0000_0004;
    /// Connection-level protocol violation.
    pub const CONNECTION_ERROR: u32 = 0x0000_0101;
    /// Orderly connection close.
    pub const CONNECTION_CLOSE: u32 = 0x0000_0102;
    /// Application-level error on a stream.
    pub const APPLICATION_ERROR: u32 = 0x0000_0201;
    /// Request rejected by the responder.
    pub const REJECTED: u32 = 0x0000_0202;
    /// Stream cancelled.
    pub const CANCELED: u32 = 0x0000_0203;
    /// Malformed request.
    pub const INVALID: u32 = 0x0000_0204;

    /// Check if a code terminates the whole connection rather than one stream.
    #[inline]
    pub fn is_connection_scoped(code: u32) -> bool {
        code < APPLICATION_ERROR
    }

    /// Human-readable name for logging.
    pub fn name(code: u32) -> &'static str {
        match code {
            REJECTED_RESUME => "REJECTED_RESUME",
            CONNECTION_ERROR => "CONNECTION_ERROR",
            CONNECTION_CLOSE => "CONNECTION_CLOSE",
            APPLICATION_ERROR => "APPLICATION_ERROR",
            REJECTED => "REJECTED",
            CANCELED => "CANCELED",
            INVALID => "INVALID",
            _ => "UNKNOWN",
        }
    }
}

fn encode_control<T: Serialize>(kind: FrameKind, value: &T) -> Result<FrameRecord> {
    let payload = rmp_serde::to_vec_named(value)?;
    Ok(FrameRecord::control(kind, Bytes::from(payload)))
}

fn decode_control<'a, T: Deserialize<'a>>(record: &'a FrameRecord, kind: FrameKind) -> Result<T> {
    if record.kind != kind {
        return Err(SessionError::Protocol(format!(
            "Expected {:?} frame, got {:?}",
            kind, record.kind
        )));
    }
    Ok(rmp_serde::from_slice(record.payload())?)
}

/// RESUME handshake request, presented by a reconnecting peer on a new
/// transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeFrame {
    /// Resumption token identifying the session (opaque bytes).
    #[serde(with = "serde_bytes")]
    pub token: Vec<u8>,
    /// Last resumable position the sender received from us.
    pub last_received_position: Position,
    /// Last resumable position the sender sent to us.
    pub last_sent_position: Position,
}

impl ResumeFrame {
    /// Build a RESUME request for the given session token and positions.
    pub fn new(
        token: &ResumeToken,
        last_received_position: Position,
        last_sent_position: Position,
    ) -> Self {
        Self {
            token: token.as_bytes().to_vec(),
            last_received_position,
            last_sent_position,
        }
    }

    /// The token as an opaque lookup key.
    pub fn token(&self) -> ResumeToken {
        ResumeToken::from_bytes(self.token.clone())
    }

    /// Encode into a connection-control frame record.
    pub fn to_record(&self) -> Result<FrameRecord> {
        encode_control(FrameKind::Resume, self)
    }

    /// Decode from a frame record, checking the kind.
    pub fn from_record(record: &FrameRecord) -> Result<Self> {
        decode_control(record, FrameKind::Resume)
    }
}

/// RESUME_OK handshake acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeOkFrame {
    /// Last resumable position the acceptor received from the resuming peer.
    pub last_received_position: Position,
}

impl ResumeOkFrame {
    /// Build a RESUME_OK carrying the local received position.
    pub fn new(last_received_position: Position) -> Self {
        Self {
            last_received_position,
        }
    }

    /// Encode into a connection-control frame record.
    pub fn to_record(&self) -> Result<FrameRecord> {
        encode_control(FrameKind::ResumeOk, self)
    }

    /// Decode from a frame record, checking the kind.
    pub fn from_record(record: &FrameRecord) -> Result<Self> {
        decode_control(record, FrameKind::ResumeOk)
    }
}

/// ERROR frame payload.
///
/// Dual-use: connection-scoped on stream 0, stream-scoped otherwise.
/// The typed payload is the same in both cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Error code (see [`error_codes`]).
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

impl ErrorFrame {
    /// Build an error payload.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Build a REJECTED_RESUME error.
    pub fn rejected_resume(message: impl Into<String>) -> Self {
        Self::new(error_codes::REJECTED_RESUME, message)
    }

    /// Build a CONNECTION_ERROR error.
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::CONNECTION_ERROR, message)
    }

    /// Encode into a connection-scoped ERROR record (stream 0).
    pub fn to_record(&self) -> Result<FrameRecord> {
        encode_control(FrameKind::Error, self)
    }

    /// Encode into a stream-scoped ERROR record.
    pub fn to_stream_record(&self, stream_id: u32) -> Result<FrameRecord> {
        let payload = rmp_serde::to_vec_named(self)?;
        Ok(FrameRecord::new(
            stream_id,
            FrameKind::Error,
            Bytes::from(payload),
        ))
    }

    /// Decode from a frame record, checking the kind.
    pub fn from_record(record: &FrameRecord) -> Result<Self> {
        decode_control(record, FrameKind::Error)
    }
}

/// KEEPALIVE frame payload.
///
/// Keep-alives double as the acknowledgment vehicle: the sender reports its
/// cumulative received position so the peer can evict replayed-out entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveFrame {
    /// Whether the receiver should answer with its own keep-alive.
    pub respond: bool,
    /// The sender's cumulative resumable received position.
    pub last_received_position: Position,
}

impl KeepAliveFrame {
    /// Build a keep-alive payload.
    pub fn new(respond: bool, last_received_position: Position) -> Self {
        Self {
            respond,
            last_received_position,
        }
    }

    /// Encode into a connection-control frame record.
    pub fn to_record(&self) -> Result<FrameRecord> {
        encode_control(FrameKind::KeepAlive, self)
    }

    /// Decode from a frame record, checking the kind.
    pub fn from_record(record: &FrameRecord) -> Result<Self> {
        decode_control(record, FrameKind::KeepAlive)
    }
}

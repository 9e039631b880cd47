//! Frame records - the decoded protocol unit consumed and produced by the core.
//!
//! A [`FrameRecord`] is a stream identifier, a frame kind, and an opaque
//! payload. Wire encoding and decoding happen outside the core; payloads use
//! `bytes::Bytes` so caching and replay never copy payload data.
//!
//! # Example
//!
//! ```
//! use resumux::protocol::{FrameKind, FrameRecord};
//! use bytes::Bytes;
//!
//! let frame = FrameRecord::new(1, FrameKind::RequestStream, Bytes::from_static(b"query"));
//! assert!(frame.is_stream_initiating());
//! assert!(frame.resumable);
//! ```

use bytes::Bytes;

use crate::error::{Result, SessionError};

/// Logical stream identifier (32-bit unsigned).
///
/// Odd ids are client-initiated, even ids are server-initiated,
/// 0 is reserved for connection-control frames.
pub type StreamId = u32;

/// Resumable-sequence position (64-bit unsigned, monotonically increasing).
///
/// 0 means "nothing sent/received yet"; the first resumable frame in a
/// direction gets position 1.
pub type Position = u64;

/// Stream id reserved for connection-control frames.
pub const CONNECTION_STREAM_ID: StreamId = 0;

/// Check if a stream id follows the client-initiated parity convention.
#[inline]
pub fn is_client_initiated(stream_id: StreamId) -> bool {
    stream_id % 2 == 1
}

/// Check if a stream id follows the server-initiated parity convention.
#[inline]
pub fn is_server_initiated(stream_id: StreamId) -> bool {
    stream_id != CONNECTION_STREAM_ID && stream_id % 2 == 0
}

/// Closed set of protocol frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Open a stream expecting a single response.
    RequestResponse,
    /// Open a stream expecting a sequence of payloads.
    RequestStream,
    /// Open a bidirectional stream.
    RequestChannel,
    /// Fire-and-forget request, no response expected.
    RequestFnf,
    /// Payload on an established stream.
    Payload,
    /// Cancel an established stream.
    Cancel,
    /// Request more items on an established stream.
    RequestN,
    /// Error frame: stream-scoped on a non-zero stream id,
    /// connection-scoped on stream 0.
    Error,
    /// Connection liveness probe, carries the sender's cumulative
    /// received position.
    KeepAlive,
    /// Resume handshake request presented on a new transport.
    Resume,
    /// Resume handshake acceptance.
    ResumeOk,
}

impl FrameKind {
    /// Check if a frame of this kind may open a new stream.
    #[inline]
    pub fn is_stream_initiating(&self) -> bool {
        matches!(
            self,
            FrameKind::RequestResponse
                | FrameKind::RequestStream
                | FrameKind::RequestChannel
                | FrameKind::RequestFnf
        )
    }

    /// Check if this kind is connection control (never routed to a stream).
    #[inline]
    pub fn is_connection_control(&self) -> bool {
        matches!(
            self,
            FrameKind::KeepAlive | FrameKind::Resume | FrameKind::ResumeOk
        )
    }

    /// Default resumability for this kind.
    ///
    /// Keep-alive and resume-control frames never count toward the
    /// resumable sequence; everything else does.
    #[inline]
    pub fn default_resumable(&self) -> bool {
        !self.is_connection_control()
    }
}

/// A decoded protocol frame.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Stream this frame belongs to (0 = connection control).
    pub stream_id: StreamId,
    /// Frame kind.
    pub kind: FrameKind,
    /// Opaque payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
    /// Whether this frame counts toward the resumable sequence.
    pub resumable: bool,
}

impl FrameRecord {
    /// Create a new frame record with the kind's default resumability.
    pub fn new(stream_id: StreamId, kind: FrameKind, payload: Bytes) -> Self {
        Self {
            stream_id,
            kind,
            payload,
            resumable: kind.default_resumable(),
        }
    }

    /// Create a frame record from raw bytes (copies data).
    pub fn from_parts(stream_id: StreamId, kind: FrameKind, payload: &[u8]) -> Self {
        Self::new(stream_id, kind, Bytes::copy_from_slice(payload))
    }

    /// Create a connection-control frame (stream id 0).
    pub fn control(kind: FrameKind, payload: Bytes) -> Self {
        Self::new(CONNECTION_STREAM_ID, kind, payload)
    }

    /// Override the resumable flag.
    pub fn with_resumable(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Get the payload length in bytes.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Check if this frame may open a new stream.
    #[inline]
    pub fn is_stream_initiating(&self) -> bool {
        self.kind.is_stream_initiating()
    }

    /// Check if this is a connection-control frame.
    #[inline]
    pub fn is_connection_control(&self) -> bool {
        self.kind.is_connection_control()
    }

    /// Check if this is a connection-scoped error (ERROR on stream 0).
    #[inline]
    pub fn is_connection_error(&self) -> bool {
        self.kind == FrameKind::Error && self.stream_id == CONNECTION_STREAM_ID
    }

    /// Validate the stream id against the frame kind.
    ///
    /// Connection-control kinds must use stream 0; stream kinds must not.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` error on a mismatch.
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_connection_control() && self.stream_id != CONNECTION_STREAM_ID {
            return Err(SessionError::Protocol(format!(
                "{:?} frame must use stream 0, got {}",
                self.kind, self.stream_id
            )));
        }

        if !self.kind.is_connection_control()
            && self.kind != FrameKind::Error
            && self.stream_id == CONNECTION_STREAM_ID
        {
            return Err(SessionError::Protocol(format!(
                "{:?} frame not allowed on stream 0",
                self.kind
            )));
        }

        Ok(())
    }
}

//! Protocol module - frame records and connection-control payloads.
//!
//! The core consumes already-decoded [`FrameRecord`]s and produces them to
//! send; wire framing lives outside this crate. Control frames (RESUME,
//! RESUME_OK, ERROR, KEEPALIVE) carry typed MessagePack payloads defined here.

mod control;
mod record;

pub use control::{error_codes, ErrorFrame, KeepAliveFrame, ResumeFrame, ResumeOkFrame};
pub use record::{
    is_client_initiated, is_server_initiated, FrameKind, FrameRecord, Position, StreamId,
    CONNECTION_STREAM_ID,
};

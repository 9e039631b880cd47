//! Outbound frame sinks.
//!
//! The session core hands every outbound frame to a [`FrameSink`] after
//! position assignment and replay caching. The sink is the transport
//! collaborator: framing and socket I/O live behind it, outside this crate.
//!
//! Two implementations ship here: [`ChannelSink`] feeds a transport task
//! through a tokio channel, and [`CollectorSink`] records frames in memory
//! for tests and demos.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::error::{Result, SessionError};
use crate::protocol::FrameRecord;

/// Ordered consumer of outbound frames.
///
/// `send_frame` is synchronous and must preserve submission order; a frame
/// accepted by the sink is considered handed to the transport. Failure
/// means the transport is gone, not that the frame was malformed.
pub trait FrameSink: Send {
    /// Hand one frame to the transport.
    fn send_frame(&mut self, frame: FrameRecord) -> Result<()>;
}

/// Sink that forwards frames into a tokio channel.
///
/// The receiving half belongs to the transport task that does the actual
/// writing. The channel is unbounded: outbound volume is already bounded
/// upstream by the replay-cache capacity policy.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<FrameRecord>,
}

impl ChannelSink {
    /// Wrap an existing sender.
    pub fn new(tx: mpsc::UnboundedSender<FrameRecord>) -> Self {
        Self { tx }
    }

    /// Create a connected sink/receiver pair.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FrameRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Check whether the transport side is still listening.
    pub fn is_attached(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl FrameSink for ChannelSink {
    fn send_frame(&mut self, frame: FrameRecord) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| SessionError::ChannelClosed)
    }
}

/// Sink that collects frames in shared memory.
///
/// Clones share the same storage, so a test can keep one handle for
/// assertions while the session owns another.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    frames: Arc<Mutex<Vec<FrameRecord>>>,
}

impl CollectorSink {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far, in order.
    pub fn collected(&self) -> Vec<FrameRecord> {
        self.lock().clone()
    }

    /// Drain and return everything sent so far, in order.
    pub fn take_collected(&self) -> Vec<FrameRecord> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of frames collected.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<FrameRecord>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSink for CollectorSink {
    fn send_frame(&mut self, frame: FrameRecord) -> Result<()> {
        self.lock().push(frame);
        Ok(())
    }
}

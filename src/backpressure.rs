//! Backpressure handling for replay-cache capacity.
//!
//! A resumable send must enter the replay cache, so a full cache stalls the
//! sender. Under the `Block` overflow policy the async caller waits here
//! until peer acknowledgments evict enough of the cache prefix to admit the
//! frame, or until the configured timeout elapses.
//!
//! The cache itself stays single-writer and synchronous. It mirrors its
//! retained byte/entry counts into a [`ReplayGauge`], and the waiter only
//! observes the gauge. The session task is the sole appender, so capacity
//! seen by the waiter cannot be stolen by a competing producer.
//!
//! # Configuration
//!
//! - `max_bytes` / `max_entries`: replay-cache bounds (shared with the cache)
//! - Timeout: how long to wait for capacity (default: 5s)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{SessionConfig, DEFAULT_BACKPRESSURE_TIMEOUT};
use crate::error::{Result, SessionError};

/// Interval between capacity checks while waiting.
const CHECK_INTERVAL: Duration = Duration::from_micros(100);

/// Shared, lock-free mirror of the replay cache's retained counts.
///
/// The cache records into the gauge after every mutation; readers load
/// without touching the cache. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct ReplayGauge {
    bytes: Arc<AtomicUsize>,
    entries: Arc<AtomicUsize>,
}

impl ReplayGauge {
    /// Create a gauge reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the current retained counts.
    #[inline]
    pub fn record(&self, bytes: usize, entries: usize) {
        self.bytes.store(bytes, Ordering::Release);
        self.entries.store(entries, Ordering::Release);
    }

    /// Retained payload bytes at the last `record`.
    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    /// Retained entries at the last `record`.
    #[inline]
    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::Acquire)
    }
}

/// Async waiter over a [`ReplayGauge`] against the replay-cache bounds.
#[derive(Debug, Clone)]
pub struct ReplayBackpressure {
    gauge: ReplayGauge,
    max_bytes: usize,
    max_entries: usize,
    timeout: Duration,
}

impl ReplayBackpressure {
    /// Create a waiter over `gauge` with the given bounds and the default
    /// timeout.
    pub fn new(gauge: ReplayGauge, max_bytes: usize, max_entries: usize) -> Self {
        Self {
            gauge,
            max_bytes,
            max_entries,
            timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }

    /// Create a waiter with a custom timeout.
    pub fn with_timeout(
        gauge: ReplayGauge,
        max_bytes: usize,
        max_entries: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            gauge,
            max_bytes,
            max_entries,
            timeout,
        }
    }

    /// Create a waiter whose bounds and timeout come from the session
    /// configuration.
    pub fn from_config(gauge: ReplayGauge, config: &SessionConfig) -> Self {
        Self::with_timeout(
            gauge,
            config.max_replay_bytes,
            config.max_replay_entries,
            config.backpressure_timeout,
        )
    }

    /// Check whether a frame of `payload_len` bytes fits right now.
    ///
    /// The predicate matches the cache's own overflow check, so a `true`
    /// here means the very next append by the session task will succeed.
    #[inline]
    pub fn has_capacity(&self, payload_len: usize) -> bool {
        self.gauge.entries() < self.max_entries
            && self.gauge.bytes() + payload_len <= self.max_bytes
    }

    /// Entry slots left before the cache is full.
    #[inline]
    pub fn available_entries(&self) -> usize {
        self.max_entries.saturating_sub(self.gauge.entries())
    }

    /// Payload bytes left before the cache is full.
    #[inline]
    pub fn available_bytes(&self) -> usize {
        self.max_bytes.saturating_sub(self.gauge.bytes())
    }

    /// Wait until a frame of `payload_len` bytes fits.
    ///
    /// Returns `Err(BackpressureTimeout)` if the timeout elapses first. A
    /// frame too large to ever fit the byte bound also times out here; the
    /// caller terminates the session in that case.
    pub async fn wait_for_capacity(&self, payload_len: usize) -> Result<()> {
        // Fast path: no wait needed
        if self.has_capacity(payload_len) {
            return Ok(());
        }

        tracing::debug!(
            payload_len,
            retained_bytes = self.gauge.bytes(),
            retained_entries = self.gauge.entries(),
            "replay cache full, waiting for peer acknowledgment"
        );

        let start = Instant::now();
        loop {
            if self.has_capacity(payload_len) {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                tracing::warn!(
                    payload_len,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "timed out waiting for replay cache capacity"
                );
                return Err(SessionError::BackpressureTimeout);
            }

            tokio::time::sleep(CHECK_INTERVAL).await;
        }
    }
}

//! Resumption tokens.
//!
//! A token is an opaque byte string generated at session establishment and
//! presented by a reconnecting transport. The core never interprets it; it is
//! only a lookup key into the session table.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// Generated token length in bytes.
pub const TOKEN_LEN: usize = 16;

/// Opaque session resumption token.
///
/// Cheap to clone and hashable, so it can key the session table directly.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ResumeToken(Bytes);

impl ResumeToken {
    /// Generate a fresh 16-byte token.
    ///
    /// Entropy comes from wall-clock nanos, the process id, and a
    /// process-wide counter, so tokens generated in the same nanosecond
    /// still differ.
    pub fn generate() -> Self {
        let a = rand_u64();
        let b = rand_u64() ^ NEXT_SEED.fetch_add(0x9e37_79b9_7f4a_7c15, Ordering::Relaxed);

        let mut buf = [0u8; TOKEN_LEN];
        buf[..8].copy_from_slice(&a.to_be_bytes());
        buf[8..].copy_from_slice(&b.to_be_bytes());
        Self(Bytes::copy_from_slice(&buf))
    }

    /// Wrap externally supplied token bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The raw token bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Token length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the token is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResumeToken({})", self)
    }
}

static NEXT_SEED: AtomicU64 = AtomicU64::new(0x243f_6a88_85a3_08d3);

/// Simple random u64 using system time, process ID, and a counter.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let pid = std::process::id() as u64;
    let seq = NEXT_SEED.fetch_add(1, Ordering::Relaxed);

    nanos
        .wrapping_mul(0x517c_c1b7_2722_0a95)
        .rotate_left(17)
        .wrapping_add(seq)
        ^ pid
}

use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::codec::{xor_all, FRAME_OVERHEAD, HEADER_WITHOUT_CHECKSUM_LEN, PREAMBLE};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// A buffer is rotten once no new bytes arrived for longer than this...
pub const ROT_IDLE_BYTES: Duration = Duration::from_secs(2);

/// ...and no frame was popped for longer than this.
pub const ROT_IDLE_POP: Duration = Duration::from_secs(4);

/// A frame extracted from a [`LinkBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoppedFrame {
    /// The packet bytes (header + payload) with the preamble stripped.
    pub packet: Bytes,
    /// Bytes skipped before the preamble and discarded.
    pub garbage: usize,
}

/// Per-link receive buffer that recovers frames from a noisy byte stream.
///
/// Bytes are appended as they arrive. [`pop_frame`](Self::pop_frame) scans
/// for a preamble followed by a header with a valid checksum, so corrupted
/// or partial input is skipped rather than reported. A buffer that stops
/// making progress becomes rotten and is expected to be flushed by its owner.
#[derive(Debug)]
pub struct LinkBuffer {
    buf: BytesMut,
    last_new_bytes: Option<Instant>,
    last_successful_pop: Option<Instant>,
    rot_idle_bytes: Duration,
    rot_idle_pop: Duration,
}

impl LinkBuffer {
    /// Create an empty buffer with the default rot thresholds.
    pub fn new() -> Self {
        Self::with_rot_thresholds(ROT_IDLE_BYTES, ROT_IDLE_POP)
    }

    /// Create an empty buffer with explicit rot thresholds.
    pub fn with_rot_thresholds(idle_bytes: Duration, idle_pop: Duration) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            last_new_bytes: None,
            last_successful_pop: None,
            rot_idle_bytes: idle_bytes,
            rot_idle_pop: idle_pop,
        }
    }

    /// Append freshly received bytes.
    pub fn append(&mut self, bytes: &[u8], now: Instant) {
        if bytes.is_empty() {
            return;
        }
        self.buf.extend_from_slice(bytes);
        self.last_new_bytes = Some(now);
    }

    /// Extract the first complete, checksum-valid frame.
    ///
    /// Bytes in front of the frame are discarded and reported as garbage.
    /// Returns `None` and leaves the buffer untouched when no complete frame
    /// is present yet.
    pub fn pop_frame(&mut self, now: Instant) -> Option<PoppedFrame> {
        let (start, total) = find_frame(&self.buf)?;

        self.buf.advance(start);
        let mut frame = self.buf.split_to(total);
        frame.advance(1);
        self.last_successful_pop = Some(now);

        if start > 0 {
            trace!(garbage = start, "skipped bytes before frame");
        }

        Some(PoppedFrame {
            packet: frame.freeze(),
            garbage: start,
        })
    }

    /// True when the buffer holds data but has stalled.
    ///
    /// Timestamps that were never set count as infinitely old.
    pub fn is_rotten(&self, now: Instant) -> bool {
        if self.buf.is_empty() {
            return false;
        }
        let stale = |at: Option<Instant>, limit: Duration| match at {
            Some(at) => now.saturating_duration_since(at) > limit,
            None => true,
        };
        stale(self.last_new_bytes, self.rot_idle_bytes)
            && stale(self.last_successful_pop, self.rot_idle_pop)
    }

    /// Drop every buffered byte, returning how many were discarded.
    pub fn flush(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        dropped
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// When bytes were last appended.
    pub fn last_new_bytes(&self) -> Option<Instant> {
        self.last_new_bytes
    }

    /// When a frame was last extracted.
    pub fn last_successful_pop(&self) -> Option<Instant> {
        self.last_successful_pop
    }
}

impl Default for LinkBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate the first complete frame, returning `(start, total_len)`.
///
/// A candidate with a valid header whose payload has not fully arrived does
/// not stop the scan; a later candidate may still complete.
fn find_frame(buf: &[u8]) -> Option<(usize, usize)> {
    if buf.len() < FRAME_OVERHEAD {
        return None;
    }

    for start in 0..=(buf.len() - FRAME_OVERHEAD) {
        if buf[start] != PREAMBLE {
            continue;
        }

        let header = &buf[start + 1..start + 1 + HEADER_WITHOUT_CHECKSUM_LEN];
        if xor_all(header) != buf[start + FRAME_OVERHEAD - 1] {
            continue;
        }

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let total = FRAME_OVERHEAD + length;
        if buf.len() - start >= total {
            return Some((start, total));
        }
    }

    None
}

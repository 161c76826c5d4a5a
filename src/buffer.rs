//! Bounded FIFO buffering of client data during backend outages.
//!
//! While no backend connection is live, client-originated chunks accumulate
//! here. The buffer enforces a byte ceiling by shedding whole chunks from the
//! front (oldest first), trading completeness of replayed input for a hard
//! memory bound.

use bytes::Bytes;
use std::collections::VecDeque;

/// Default buffer ceiling (1MB).
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1024 * 1024;

/// A bounded, oldest-drop FIFO byte buffer.
///
/// Chunks are kept whole: when admitting a chunk would leave the total above
/// the ceiling, whole chunks are dropped from the front until the total is
/// back under it. A single chunk larger than the ceiling empties the buffer
/// entirely, itself included.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Maximum bytes to hold.
    max_bytes: usize,
    /// Running total, always equal to the sum of chunk lengths.
    total_bytes: usize,
    /// Chunks in arrival order, oldest at the front.
    chunks: VecDeque<Bytes>,
    /// Lifetime count of chunks shed to uphold the ceiling.
    dropped_chunks: u64,
}

impl FrameBuffer {
    /// Creates a buffer with the given byte ceiling.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            total_bytes: 0,
            chunks: VecDeque::new(),
            dropped_chunks: 0,
        }
    }

    /// Appends one chunk, shedding oldest chunks while over the ceiling.
    pub fn push(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }

        self.total_bytes += data.len();
        self.chunks.push_back(data);

        while self.total_bytes > self.max_bytes {
            // Non-empty by construction: total > 0 implies at least one chunk.
            if let Some(dropped) = self.chunks.pop_front() {
                self.total_bytes -= dropped.len();
                self.dropped_chunks += 1;
                tracing::debug!(
                    dropped_len = dropped.len(),
                    buffered_bytes = self.total_bytes,
                    "dropping oldest buffered client chunk"
                );
            }
        }
    }

    /// Removes and returns the oldest chunk.
    pub fn pop_front(&mut self) -> Option<Bytes> {
        let chunk = self.chunks.pop_front()?;
        self.total_bytes -= chunk.len();
        Some(chunk)
    }

    /// Puts a chunk back at the front after a failed write, preserving order
    /// for a later drain.
    pub fn push_front(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.total_bytes += data.len();
        self.chunks.push_front(data);
    }

    /// Returns true when no chunks are held.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Current buffered byte total.
    pub fn byte_count(&self) -> usize {
        self.total_bytes
    }

    /// Number of buffered chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Lifetime count of chunks shed by the ceiling.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks
    }
}

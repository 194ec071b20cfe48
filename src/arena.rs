//! Decode arena
//!
//! A bulk allocation scope for variable-length cell data. Bytes are staged
//! into one growable buffer and frozen into an immutable chunk when a decode
//! batch completes; values borrow from that chunk. Nothing is freed on its
//! own: `reset()` (or dropping the arena) releases every chunk at once, and
//! the borrow checker refuses either while decoded values are still alive.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::LogConfig;
use crate::error::{LogError, Result};

/// Bulk allocator backing decoded row operations
#[derive(Debug)]
pub struct Arena {
    /// Bytes of the batch being decoded
    staging: BytesMut,
    /// Frozen batches, released together
    chunks: Vec<Bytes>,
    /// Total bytes handed out since the last reset
    allocated: usize,
    max_bytes: usize,
}

impl Arena {
    /// Create an arena that starts with `initial_bytes` of capacity and
    /// refuses to grow past `max_bytes`.
    pub fn new(initial_bytes: usize, max_bytes: usize) -> Self {
        Self {
            staging: BytesMut::with_capacity(initial_bytes),
            chunks: Vec::new(),
            allocated: 0,
            max_bytes: max_bytes.max(initial_bytes),
        }
    }

    /// Arena sized from the decoder settings of `config`
    pub fn from_config(config: &LogConfig) -> Self {
        Self::new(config.arena_initial_bytes, config.arena_max_bytes)
    }

    /// Bytes handed out since the last reset
    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Number of frozen batches currently held
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Release everything allocated so far
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.staging.clear();
        self.allocated = 0;
    }

    // =========================================================================
    // Batch Protocol (decoder only)
    // =========================================================================

    /// Start a batch, discarding bytes staged by an abandoned one
    pub(crate) fn begin(&mut self, expected_bytes: usize) {
        self.allocated -= self.staging.len();
        self.staging.clear();
        let room = expected_bytes.min(self.max_bytes.saturating_sub(self.allocated));
        self.staging.reserve(room);
    }

    /// Copy `data` into the current batch; returns its offset within the batch
    pub(crate) fn copy_in(&mut self, data: &[u8]) -> Result<usize> {
        if self.allocated + data.len() > self.max_bytes {
            return Err(LogError::InvalidArgument(format!(
                "arena exhausted: {} + {} bytes exceeds limit of {}",
                self.allocated,
                data.len(),
                self.max_bytes
            )));
        }
        let start = self.staging.len();
        self.staging.put_slice(data);
        self.allocated += data.len();
        Ok(start)
    }

    /// Freeze the current batch and return its bytes
    pub(crate) fn seal(&mut self) -> &[u8] {
        if self.staging.is_empty() {
            return &[];
        }
        let chunk = self.staging.split().freeze();
        self.chunks.push(chunk);
        match self.chunks.last() {
            Some(chunk) => &chunk[..],
            None => &[],
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::from_config(&LogConfig::default())
    }
}

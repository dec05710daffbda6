//! ByteBuf - Growable Byte Buffer
//!
//! ## Responsibilities
//!
//! - Accumulate not-yet-sent bytes for buffered client writes
//! - Replace-or-append semantics with amortized growth
//!
//! The buffer grows in fixed-size blocks and keeps a terminating nul byte
//! after the payload for callers that hand the contents to C-string-ish
//! sinks. Length is tracked explicitly; the payload may contain nul bytes.

use crate::error::{Error, Result};

/// Growth increment, in bytes
const GROW_BLOCK: usize = 512;

/// Growable byte buffer with a trailing nul terminator
///
/// Invariant: the byte at index `len()` is always zero. Not thread-safe on
/// its own; callers serialize access.
#[derive(Debug, Default)]
pub struct ByteBuf {
    /// Payload plus the terminating nul; `data.len() == self.len() + 1`
    /// whenever the buffer is non-empty
    data: Vec<u8>,
}

impl ByteBuf {
    /// Create an empty buffer with no allocation
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Payload length, excluding the terminator
    pub fn len(&self) -> usize {
        self.data.len().saturating_sub(1)
    }

    /// True if no payload bytes are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the payload bytes
    pub fn as_slice(&self) -> &[u8] {
        if self.data.is_empty() {
            &[]
        } else {
            &self.data[..self.data.len() - 1]
        }
    }

    /// Replace the contents wholesale
    pub fn set(&mut self, bytes: &[u8]) -> Result<()> {
        self.data.clear();
        self.reserve_blocks(bytes.len() + 1)?;
        self.data.extend_from_slice(bytes);
        self.data.push(0x00);
        Ok(())
    }

    /// Append to the end; a zero-length append is a no-op
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let len = self.len();
        self.reserve_blocks(len + bytes.len() + 1)?;
        self.data.truncate(len);
        self.data.extend_from_slice(bytes);
        self.data.push(0x00);
        Ok(())
    }

    /// Drop `n` bytes from the front, keeping the unsent remainder
    ///
    /// Used after a partial flush. `n` larger than the payload empties the
    /// buffer.
    pub fn consume(&mut self, n: usize) {
        let len = self.len();
        if n >= len {
            self.data.clear();
        } else {
            self.data.drain(..n);
        }
    }

    /// Discard all payload bytes, keeping the allocation
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Grow the backing store to hold `needed` bytes, rounded up to the
    /// next block boundary. Allocation failure is fatal, not retried.
    fn reserve_blocks(&mut self, needed: usize) -> Result<()> {
        if needed <= self.data.capacity() {
            return Ok(());
        }

        let target = needed.div_ceil(GROW_BLOCK) * GROW_BLOCK;
        self.data
            .try_reserve_exact(target - self.data.len())
            .map_err(|e| Error::OutOfMemory(format!("buffer grow to {} failed: {}", target, e)))
    }
}

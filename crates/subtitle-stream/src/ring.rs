//! Fixed-capacity circular byte buffer.
//!
//! Every transfer is clamped to the space (or data) currently available and
//! reports how many bytes actually moved. Short transfers are normal and never
//! an error; callers loop or keep the remainder themselves.
//!
//! The buffer has no locking of its own. Each transport connection owns one
//! and touches it from a single thread.

use crate::error::{StreamError, StreamResult};

/// Circular byte buffer with separate read and write cursors.
///
/// Invariant: `read_avail + write_avail == capacity` after every operation.
pub struct RingBuffer {
    storage: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    read_avail: usize,
    write_avail: usize,
}

impl RingBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> StreamResult<Self> {
        if capacity == 0 {
            return Err(StreamError::InvalidCapacity(capacity));
        }

        Ok(Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            read_avail: 0,
            write_avail: capacity,
        })
    }

    /// Total number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes waiting to be read.
    pub fn read_avail(&self) -> usize {
        self.read_avail
    }

    /// Free space left for writing.
    pub fn write_avail(&self) -> usize {
        self.write_avail
    }

    pub fn is_empty(&self) -> bool {
        self.read_avail == 0
    }

    pub fn is_full(&self) -> bool {
        self.write_avail == 0
    }

    /// Append as much of `src` as fits. Returns the number of bytes stored.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let count = src.len().min(self.write_avail);
        if count == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let first = count.min(capacity - self.write_pos);
        self.storage[self.write_pos..self.write_pos + first].copy_from_slice(&src[..first]);
        if first < count {
            // Wrapped past the end of storage
            self.storage[..count - first].copy_from_slice(&src[first..count]);
        }

        self.write_pos = (self.write_pos + count) % capacity;
        self.read_avail += count;
        self.write_avail -= count;
        count
    }

    /// Copy up to `dst.len()` bytes out and consume them.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let count = self.peek(dst);
        self.consume(count);
        count
    }

    /// Copy up to `dst.len()` bytes out without consuming them.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        let count = dst.len().min(self.read_avail);
        if count == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let first = count.min(capacity - self.read_pos);
        dst[..first].copy_from_slice(&self.storage[self.read_pos..self.read_pos + first]);
        if first < count {
            dst[first..count].copy_from_slice(&self.storage[..count - first]);
        }
        count
    }

    /// Drop up to `count` unread bytes. Returns the number discarded.
    pub fn skip(&mut self, count: usize) -> usize {
        let count = count.min(self.read_avail);
        self.consume(count);
        count
    }

    /// Discard all buffered data.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.read_avail = 0;
        self.write_avail = self.capacity();
    }

    fn consume(&mut self, count: usize) {
        self.read_pos = (self.read_pos + count) % self.capacity();
        self.read_avail -= count;
        self.write_avail += count;
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .field("read_avail", &self.read_avail)
            .field("write_avail", &self.write_avail)
            .finish()
    }
}

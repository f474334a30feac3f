//! Shared-memory byte queue (the "fast message queue" transport).
//!
//! The subtitle service creates the queue and reads from it; a producer in
//! another process opens it by name and writes raw frame bytes into it.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ QueueHeader (64 bytes, cache-line aligned)                   │
//! │  ├─ magic: u32        ("SUBQ")                               │
//! │  ├─ version: u32                                             │
//! │  ├─ capacity: u32     (data area size in bytes)              │
//! │  ├─ flags: u32        (SHUTDOWN)                             │
//! │  ├─ write_pos: u64    (bytes ever written, atomic)           │
//! │  ├─ read_pos: u64     (bytes ever read, atomic)              │
//! │  └─ reserved[32]                                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Data area: capacity bytes, index = pos % capacity            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Single producer, single consumer. Positions only grow; the difference is
//! the number of unread bytes. Both positions live in memory the peer can
//! write, so a difference larger than the capacity is treated as corruption:
//! the reader drops the unread bytes and continues from the write position.

use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::{debug, error, info, warn};

use crate::error::{StreamError, StreamResult};

use super::{close_shm, create_shm, open_shm, shm_name, unlink_shm};

/// Magic number for validating a queue region: "SUBQ"
pub const QUEUE_MAGIC: u32 = u32::from_be_bytes(*b"SUBQ");

/// Current queue layout version.
pub const QUEUE_VERSION: u32 = 1;

/// Size of the queue header.
pub const QUEUE_HEADER_SIZE: usize = 64;

/// Shutdown requested by the owner; writers must stop.
const FLAG_SHUTDOWN: u32 = 1 << 0;

#[repr(C, align(64))]
struct QueueHeader {
    magic: u32,
    version: u32,
    capacity: u32,
    flags: AtomicU32,
    write_pos: AtomicU64,
    read_pos: AtomicU64,
    _reserved: [u8; 32],
}

impl QueueHeader {
    fn validate(&self) -> bool {
        self.magic == QUEUE_MAGIC && self.version == QUEUE_VERSION && self.capacity > 0
    }

    fn is_shutdown(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_SHUTDOWN != 0
    }

    /// Unread byte count, or `None` when the positions are inconsistent
    /// with `capacity`.
    fn unread(&self, capacity: usize) -> Option<usize> {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        let unread = write.wrapping_sub(read);
        (unread <= capacity as u64).then_some(unread as usize)
    }
}

/// What a producer needs to attach to a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescriptor {
    /// Shared memory object name
    pub name: String,
    /// Data area size in bytes
    pub capacity: usize,
}

/// Owning (reading) side of a shared queue. Unlinks the object on drop.
pub struct SharedQueueReader {
    ptr: *mut u8,
    fd: libc::c_int,
    size: usize,
    name: String,
    capacity: usize,
}

// SAFETY: the reader owns its mapping. Cross-process coordination goes through
// the atomic positions in the header; only one thread reads at a time.
unsafe impl Send for SharedQueueReader {}

impl SharedQueueReader {
    /// Create a new queue with a data area of `capacity` bytes.
    pub fn create(capacity: usize) -> StreamResult<Self> {
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(StreamError::InvalidCapacity(capacity));
        }

        let name = shm_name("q");
        let size = QUEUE_HEADER_SIZE + capacity;

        info!(name = %name, capacity, "Creating shared queue");

        let (ptr, fd) = create_shm(&name, size)?;

        unsafe {
            ptr::write(
                ptr as *mut QueueHeader,
                QueueHeader {
                    magic: QUEUE_MAGIC,
                    version: QUEUE_VERSION,
                    capacity: capacity as u32,
                    flags: AtomicU32::new(0),
                    write_pos: AtomicU64::new(0),
                    read_pos: AtomicU64::new(0),
                    _reserved: [0u8; 32],
                },
            );
        }

        Ok(Self {
            ptr,
            fd,
            size,
            name,
            capacity,
        })
    }

    pub fn descriptor(&self) -> QueueDescriptor {
        QueueDescriptor {
            name: self.name.clone(),
            capacity: self.capacity,
        }
    }

    /// Bytes written by the producer and not yet read.
    pub fn available_size(&self) -> usize {
        self.checked_unread()
    }

    /// Copy up to `dst.len()` unread bytes out of the queue.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let count = dst.len().min(self.checked_unread());
        let header = self.header();
        let read = header.read_pos.load(Ordering::Acquire);
        if count == 0 {
            return 0;
        }

        let start = (read % self.capacity as u64) as usize;
        let first = count.min(self.capacity - start);
        unsafe {
            let data = self.ptr.add(QUEUE_HEADER_SIZE);
            ptr::copy_nonoverlapping(data.add(start), dst.as_mut_ptr(), first);
            if first < count {
                ptr::copy_nonoverlapping(data, dst.as_mut_ptr().add(first), count - first);
            }
        }

        header
            .read_pos
            .store(read.wrapping_add(count as u64), Ordering::Release);
        count
    }

    fn checked_unread(&self) -> usize {
        let header = self.header();
        match header.unread(self.capacity) {
            Some(unread) => unread,
            None => {
                let write = header.write_pos.load(Ordering::Acquire);
                let read = header.read_pos.load(Ordering::Acquire);
                warn!(
                    name = %self.name,
                    write,
                    read,
                    capacity = self.capacity,
                    "Shared queue positions corrupt, discarding unread bytes"
                );
                header.read_pos.store(write, Ordering::Release);
                0
            }
        }
    }

    /// Tell writers to stop.
    pub fn shutdown(&self) {
        self.header().flags.fetch_or(FLAG_SHUTDOWN, Ordering::Release);
    }

    fn header(&self) -> &QueueHeader {
        unsafe { &*(self.ptr as *const QueueHeader) }
    }
}

impl Drop for SharedQueueReader {
    fn drop(&mut self) {
        debug!(name = %self.name, "Releasing shared queue");
        self.shutdown();

        unsafe {
            close_shm(self.ptr, self.size, self.fd);
        }

        if let Err(e) = unlink_shm(&self.name) {
            error!(name = %self.name, error = %e, "Failed to unlink shared queue");
        }
    }
}

/// Producer side of a shared queue, attached by name.
pub struct SharedQueueWriter {
    ptr: *mut u8,
    fd: libc::c_int,
    size: usize,
    capacity: usize,
}

// SAFETY: see SharedQueueReader; one writer thread at a time.
unsafe impl Send for SharedQueueWriter {}

impl SharedQueueWriter {
    /// Attach to an existing queue.
    pub fn open(descriptor: &QueueDescriptor) -> StreamResult<Self> {
        // Map just the header first to learn the real size
        let (header_ptr, header_fd) = open_shm(&descriptor.name, QUEUE_HEADER_SIZE, false)?;
        let (valid, capacity) = {
            let header = unsafe { &*(header_ptr as *const QueueHeader) };
            (header.validate(), header.capacity as usize)
        };
        unsafe {
            close_shm(header_ptr, QUEUE_HEADER_SIZE, header_fd);
        }

        if !valid {
            return Err(StreamError::InvalidHeader(format!(
                "queue '{}' has wrong magic or version",
                descriptor.name
            )));
        }
        if capacity != descriptor.capacity {
            return Err(StreamError::InvalidHeader(format!(
                "queue '{}' capacity {} does not match descriptor {}",
                descriptor.name, capacity, descriptor.capacity
            )));
        }

        let size = QUEUE_HEADER_SIZE + capacity;
        let (ptr, fd) = open_shm(&descriptor.name, size, true)?;

        debug!(name = %descriptor.name, capacity, "Attached shared queue writer");

        Ok(Self {
            ptr,
            fd,
            size,
            capacity,
        })
    }

    /// Free space in the data area.
    /// Zero while the positions are corrupt; the reader resets them.
    pub fn free_space(&self) -> usize {
        self.header()
            .unread(self.capacity)
            .map_or(0, |unread| self.capacity - unread)
    }

    /// Append as much of `src` as fits. Returns the number of bytes written.
    pub fn write(&mut self, src: &[u8]) -> StreamResult<usize> {
        let header = self.header();
        if header.is_shutdown() {
            return Err(StreamError::Shutdown);
        }

        let write = header.write_pos.load(Ordering::Acquire);
        let count = src.len().min(self.free_space());
        if count == 0 {
            return Ok(0);
        }

        let start = (write % self.capacity as u64) as usize;
        let first = count.min(self.capacity - start);
        unsafe {
            let data = self.ptr.add(QUEUE_HEADER_SIZE);
            ptr::copy_nonoverlapping(src.as_ptr(), data.add(start), first);
            if first < count {
                ptr::copy_nonoverlapping(src.as_ptr().add(first), data, count - first);
            }
        }

        header
            .write_pos
            .store(write.wrapping_add(count as u64), Ordering::Release);
        Ok(count)
    }

    /// Write all of `src`, failing if the queue lacks room for it.
    pub fn write_all(&mut self, src: &[u8]) -> StreamResult<()> {
        if src.len() > self.free_space() {
            return Err(StreamError::PayloadTooLarge {
                size: src.len(),
                max: self.free_space(),
            });
        }
        self.write(src).map(|_| ())
    }

    fn header(&self) -> &QueueHeader {
        unsafe { &*(self.ptr as *const QueueHeader) }
    }
}

impl Drop for SharedQueueWriter {
    fn drop(&mut self) {
        unsafe {
            close_shm(self.ptr, self.size, self.fd);
        }
    }
}

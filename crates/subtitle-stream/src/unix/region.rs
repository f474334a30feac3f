//! Write-once shared memory buffer for display payloads.
//!
//! The producer allocates a region sized to the payload plus some slack,
//! copies the bitmap in, and from then on the region is read-only for
//! everyone. Remote clients attach by name (or receive the fd) and map it
//! read-only.

use std::os::fd::RawFd;
use std::ptr;

use tracing::{error, trace};

use crate::error::{StreamError, StreamResult};

use super::{close_shm, create_shm, open_shm, shm_name, unlink_shm};

/// A mapped shared memory buffer holding one payload.
pub struct SharedRegion {
    ptr: *mut u8,
    fd: libc::c_int,
    size: usize,
    len: usize,
    name: String,
    owner: bool,
}

// SAFETY: the contents are written once, before the region is shared, and
// never mutated afterwards.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Allocate a region of `bytes.len() + slack` bytes and copy `bytes` in.
    pub fn with_contents(bytes: &[u8], slack: usize) -> StreamResult<Self> {
        let size = (bytes.len() + slack).max(1);
        let name = shm_name("d");
        let (ptr, fd) = create_shm(&name, size)?;

        if !bytes.is_empty() {
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
            }
        }

        trace!(name = %name, len = bytes.len(), size, "Allocated display region");

        Ok(Self {
            ptr,
            fd,
            size,
            len: bytes.len(),
            name,
            owner: true,
        })
    }

    /// Map an existing region read-only. `len` is the payload length and
    /// `size` the mapped size announced by the producer.
    pub fn open(name: &str, size: usize, len: usize) -> StreamResult<Self> {
        if len > size || size == 0 {
            return Err(StreamError::PayloadTooLarge { size: len, max: size });
        }
        let (ptr, fd) = open_shm(name, size, false)?;
        Ok(Self {
            ptr,
            fd,
            size,
            len,
            name: name.to_string(),
            owner: false,
        })
    }

    /// The payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mapped size, including slack.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor of the shared memory object, for passing to another process.
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            close_shm(self.ptr, self.size, self.fd);
        }

        if self.owner {
            if let Err(e) = unlink_shm(&self.name) {
                error!(name = %self.name, error = %e, "Failed to unlink display region");
            }
        }
    }
}

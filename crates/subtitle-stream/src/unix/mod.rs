//! Unix (macOS/Linux) shared memory implementation.
//!
//! Uses POSIX shared memory (`shm_open`) and `mmap`.
//!
//! # Shared Memory Lifecycle
//!
//! 1. Owner creates shm with `shm_open(O_CREAT | O_EXCL)` and sizes it
//! 2. Owner maps memory with `mmap(PROT_READ | PROT_WRITE)` and initializes it
//! 3. Peer opens the existing object by name and maps it the same way
//! 4. On drop, the owner unmaps and calls `shm_unlink`
//!
//! # Naming Convention
//!
//! Objects are named `/sub{kind}_{id}` where `id` is the first 8 characters
//! of a fresh UUID. macOS limits names to 31 characters including the `/`.

pub mod queue;
pub mod region;

pub use queue::{QueueDescriptor, SharedQueueReader, SharedQueueWriter};
pub use region::SharedRegion;

use std::ffi::CString;
use std::ptr;

use libc::{
    c_int, c_uint, c_void, close, ftruncate, mmap, munmap, off_t, shm_open, shm_unlink,
    MAP_FAILED, MAP_SHARED, O_CREAT, O_EXCL, O_RDWR, PROT_READ, PROT_WRITE, S_IRUSR, S_IWUSR,
};

use crate::error::{StreamError, StreamResult};

/// Generate a fresh shared memory name for the given object kind.
pub fn shm_name(kind: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("/sub{}_{}", kind, &id[..8])
}

/// Create and map a new shared memory region of `size` bytes.
///
/// # Safety
///
/// Returns a raw pointer to mapped memory. Caller must ensure:
/// - Pointer is not used after `munmap`
/// - Concurrent access follows the owning type's protocol
pub(crate) fn create_shm(name: &str, size: usize) -> StreamResult<(*mut u8, c_int)> {
    let c_name = CString::new(name).map_err(|e| StreamError::SharedMemory(e.to_string()))?;

    unsafe {
        let fd = shm_open(
            c_name.as_ptr(),
            O_CREAT | O_EXCL | O_RDWR,
            (S_IRUSR | S_IWUSR) as c_uint,
        );

        if fd == -1 {
            let err = std::io::Error::last_os_error();
            return Err(StreamError::SharedMemory(format!(
                "shm_open failed for '{}': {}",
                name, err
            )));
        }

        if ftruncate(fd, size as off_t) == -1 {
            let err = std::io::Error::last_os_error();
            close(fd);
            shm_unlink(c_name.as_ptr());
            return Err(StreamError::SharedMemory(format!(
                "ftruncate failed: {}",
                err
            )));
        }

        let ptr = mmap(
            ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_SHARED,
            fd,
            0,
        );

        if ptr == MAP_FAILED {
            let err = std::io::Error::last_os_error();
            close(fd);
            shm_unlink(c_name.as_ptr());
            return Err(StreamError::Mmap(format!("mmap failed: {}", err)));
        }

        Ok((ptr as *mut u8, fd))
    }
}

/// Open an existing shared memory object and map `size` bytes of it.
pub(crate) fn open_shm(name: &str, size: usize, writable: bool) -> StreamResult<(*mut u8, c_int)> {
    let c_name = CString::new(name).map_err(|e| StreamError::SharedMemory(e.to_string()))?;
    let prot = if writable {
        PROT_READ | PROT_WRITE
    } else {
        PROT_READ
    };
    let oflag = if writable { O_RDWR } else { libc::O_RDONLY };

    unsafe {
        let fd = shm_open(c_name.as_ptr(), oflag, 0);

        if fd == -1 {
            let err = std::io::Error::last_os_error();
            return Err(StreamError::SharedMemory(format!(
                "shm_open failed for '{}': {}",
                name, err
            )));
        }

        let ptr = mmap(ptr::null_mut(), size, prot, MAP_SHARED, fd, 0);

        if ptr == MAP_FAILED {
            let err = std::io::Error::last_os_error();
            close(fd);
            return Err(StreamError::Mmap(format!("mmap failed: {}", err)));
        }

        Ok((ptr as *mut u8, fd))
    }
}

/// Unmap and close shared memory
///
/// # Safety
///
/// Must only be called once per mapping
pub(crate) unsafe fn close_shm(ptr: *mut u8, size: usize, fd: c_int) {
    if !ptr.is_null() {
        munmap(ptr as *mut c_void, size);
    }
    if fd >= 0 {
        close(fd);
    }
}

/// Remove the shared memory object (owner only, on drop)
pub(crate) fn unlink_shm(name: &str) -> StreamResult<()> {
    let c_name = CString::new(name).map_err(|e| StreamError::SharedMemory(e.to_string()))?;

    unsafe {
        if shm_unlink(c_name.as_ptr()) == -1 {
            let err = std::io::Error::last_os_error();
            // ENOENT is ok - already unlinked
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(StreamError::SharedMemory(format!(
                    "shm_unlink failed: {}",
                    err
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shm_name_fits_macos_limit() {
        let name = shm_name("q");
        assert!(name.starts_with("/subq_"));
        assert!(name.len() <= 31);
        assert_ne!(name, shm_name("q"));
    }
}

//! Remote client interface.

use std::sync::Arc;

use crate::error::CallbackError;
use crate::record::{DisplayRecord, EventRecord, UiCommand};

/// A client observing subtitle output, usually living in another process.
///
/// Calls are made from the dispatch thread, never while a registry lock is
/// held, so an implementation may block on IPC.
pub trait RemoteCallback: Send + Sync {
    /// A display payload is ready in shared memory.
    fn notify_data(&self, session_id: u32, record: &DisplayRecord) -> Result<(), CallbackError>;

    /// A scalar event (availability, dimension, language...).
    fn event_notify(&self, session_id: u32, event: &EventRecord) -> Result<(), CallbackError>;

    /// A rendering command. Only the fallback handle receives these.
    fn ui_command(&self, session_id: u32, command: &UiCommand) -> Result<(), CallbackError>;

    /// Whether the client is still reachable.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Shared handle to a registered client.
pub type CallbackHandle = Arc<dyn RemoteCallback>;

/// Identity comparison on the data pointer, ignoring vtables.
pub fn same_callback(a: &CallbackHandle, b: &CallbackHandle) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

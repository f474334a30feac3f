//! Consumer registration for transports.
//!
//! A transport hands every assembled frame to exactly one consumer. Consumers
//! register in order; the oldest still-registered one is active and the rest
//! wait. When the active consumer unregisters, the next in line is promoted.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use subtitle_stream::Frame;
use tracing::debug;

/// Receives assembled frames from a transport.
pub trait DataListener: Send + Sync {
    /// Handle one frame. `Break` tells the transport to drop the connection.
    fn on_data(&self, frame: &Frame) -> ControlFlow<()>;
}

/// Shared handle to a registered listener.
pub type ListenerHandle = Arc<dyn DataListener>;

/// Identifies one registration in a [`ListenerSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    listener: ListenerHandle,
}

#[derive(Default)]
struct SlotState {
    active: Option<Registration>,
    waiting: VecDeque<Registration>,
}

/// Active consumer plus an ordered waiting list.
pub struct ListenerSlot {
    state: Mutex<SlotState>,
    changed: Condvar,
    next_id: AtomicU64,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            changed: Condvar::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a listener. It becomes active if nothing else is registered.
    pub fn register(&self, listener: ListenerHandle) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Registration { id, listener };

        let mut state = self.state.lock();
        if state.active.is_none() {
            state.active = Some(registration);
            debug!(listener = id.0, "Listener active");
        } else {
            state.waiting.push_back(registration);
            debug!(listener = id.0, waiting = state.waiting.len(), "Listener queued");
        }
        drop(state);

        self.changed.notify_all();
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock();

        if state.active.as_ref().map(|r| r.id) == Some(id) {
            state.active = state.waiting.pop_front();
            debug!(
                listener = id.0,
                promoted = ?state.active.as_ref().map(|r| r.id.0),
                "Active listener removed"
            );
            drop(state);
            self.changed.notify_all();
            return true;
        }

        let before = state.waiting.len();
        state.waiting.retain(|r| r.id != id);
        before != state.waiting.len()
    }

    /// The listener that currently receives frames.
    pub fn active(&self) -> Option<ListenerHandle> {
        self.state.lock().active.as_ref().map(|r| r.listener.clone())
    }

    /// The active listener together with its registration id.
    pub fn active_entry(&self) -> Option<(ListenerId, ListenerHandle)> {
        self.state
            .lock()
            .active
            .as_ref()
            .map(|r| (r.id, r.listener.clone()))
    }

    /// Block up to `timeout` for a listener to become active.
    pub fn wait_active(&self, timeout: Duration) -> Option<ListenerHandle> {
        let mut state = self.state.lock();
        if state.active.is_none() {
            self.changed.wait_for(&mut state, timeout);
        }
        state.active.as_ref().map(|r| r.listener.clone())
    }

    /// Wake every thread blocked in [`wait_active`](Self::wait_active).
    pub fn wake_all(&self) {
        self.changed.notify_all();
    }

    /// Number of registered listeners (active + waiting).
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.active.iter().count() + state.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().active.is_none()
    }
}

impl Default for ListenerSlot {
    fn default() -> Self {
        Self::new()
    }
}

//! Callback slot table.
//!
//! Clients get a stable slot index for as long as they stay registered. A
//! slot is reused by the next registration once it is vacated (removal or
//! death notification) or once its occupant reports it is no longer alive.
//! The fallback handle is tracked separately and receives UI commands.

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::callback::{same_callback, CallbackHandle};

#[derive(Default)]
struct RegistryState {
    slots: Vec<Option<CallbackHandle>>,
    fallback: Option<CallbackHandle>,
}

/// Handles copied out of the registry for delivery.
#[derive(Clone, Default)]
pub struct ClientSnapshot {
    /// Registered clients other than the fallback, with their slot
    pub clients: Vec<(usize, CallbackHandle)>,
    pub fallback: Option<CallbackHandle>,
}

/// Slot table of remote clients plus the fallback handle.
#[derive(Default)]
pub struct CallbackRegistry {
    state: Mutex<RegistryState>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client and return its slot.
    pub fn register(&self, callback: CallbackHandle) -> usize {
        let mut state = self.state.lock();

        let reusable = state
            .slots
            .iter()
            .position(|slot| slot.as_ref().map_or(true, |cb| !cb.is_alive()));

        let slot = match reusable {
            Some(index) => {
                state.slots[index] = Some(callback);
                index
            }
            None => {
                state.slots.push(Some(callback));
                state.slots.len() - 1
            }
        };

        info!(slot, clients = state.slots.len(), "Registered callback");
        slot
    }

    /// Death notification for the client in `slot`. Returns false if the slot
    /// was already empty.
    pub fn client_died(&self, slot: usize) -> bool {
        let mut state = self.state.lock();
        Self::vacate(&mut state, slot)
    }

    /// Like [`client_died`](Self::client_died), but only if `slot` still
    /// holds `callback`. A slot reassigned while a call was in flight is
    /// left alone.
    pub fn client_died_if(&self, slot: usize, callback: &CallbackHandle) -> bool {
        let mut state = self.state.lock();
        let holds = state
            .slots
            .get(slot)
            .and_then(Option::as_ref)
            .is_some_and(|cb| same_callback(cb, callback));
        if !holds {
            debug!(slot, "Stale death report ignored");
            return false;
        }
        Self::vacate(&mut state, slot)
    }

    fn vacate(state: &mut RegistryState, slot: usize) -> bool {
        let Some(callback) = state.slots.get_mut(slot).and_then(Option::take) else {
            return false;
        };

        if state
            .fallback
            .as_ref()
            .is_some_and(|fb| same_callback(fb, &callback))
        {
            state.fallback = None;
            debug!(slot, "Fallback callback detached");
        }

        info!(slot, "Callback client died");
        true
    }

    /// Unregister a client. Returns the slot it occupied.
    pub fn remove_callback(&self, callback: &CallbackHandle) -> Option<usize> {
        let mut state = self.state.lock();

        if state
            .fallback
            .as_ref()
            .is_some_and(|fb| same_callback(fb, callback))
        {
            state.fallback = None;
        }

        let slot = state
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|cb| same_callback(cb, callback)))?;
        state.slots[slot] = None;

        info!(slot, "Removed callback");
        Some(slot)
    }

    /// Set or clear the fallback handle.
    pub fn set_fallback(&self, callback: Option<CallbackHandle>) {
        debug!(present = callback.is_some(), "Fallback callback updated");
        self.state.lock().fallback = callback;
    }

    /// Clear the fallback if it is still `callback`.
    pub fn detach_fallback(&self, callback: &CallbackHandle) -> bool {
        let mut state = self.state.lock();
        if state
            .fallback
            .as_ref()
            .is_some_and(|fb| same_callback(fb, callback))
        {
            state.fallback = None;
            return true;
        }
        false
    }

    pub fn fallback(&self) -> Option<CallbackHandle> {
        self.state.lock().fallback.clone()
    }

    /// Number of occupied slots.
    pub fn client_count(&self) -> usize {
        self.state.lock().slots.iter().flatten().count()
    }

    /// Copy the current handles so they can be called without the lock.
    pub fn snapshot(&self) -> ClientSnapshot {
        let state = self.state.lock();
        let fallback = state.fallback.clone();

        let clients = state
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, cb)| Some((slot, cb.clone()?)))
            .filter(|(_, cb)| !fallback.as_ref().is_some_and(|fb| same_callback(fb, cb)))
            .collect();

        ClientSnapshot { clients, fallback }
    }
}

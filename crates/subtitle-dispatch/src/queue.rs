//! Ordered asynchronous delivery to remote clients.
//!
//! Producers (parser threads of any session) append records; a single
//! dispatch thread pops them in FIFO order and calls the clients. Records are
//! popped under the queue lock and delivered outside it, so a slow client
//! never blocks producers.
//!
//! ## Routing
//!
//! | Record | Receivers |
//! |--------|-----------|
//! | scalar events | every live non-fallback client |
//! | `DisplayPayload` | every live non-fallback client, else the fallback |
//! | `UiCommand` | the fallback only |

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use subtitle_stream::SharedRegion;
use tracing::{debug, error, info, trace, warn};

use crate::callback::CallbackHandle;
use crate::error::{CallbackError, DispatchError, DispatchResult};
use crate::record::{DisplayFrame, DisplayRecord, EventRecord, UiCommand};
use crate::registry::CallbackRegistry;

/// Extra bytes allocated past each display payload.
pub const DISPLAY_SLACK: usize = 1024;

/// Dispatch queue configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How long the dispatch thread parks before re-checking the exit flag
    pub idle_wait: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(100),
        }
    }
}

/// A record tagged with the session that produced it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub session_id: u32,
    pub record: EventRecord,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Envelope>,
    /// A record has been popped and is being delivered
    busy: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    ready: Condvar,
    idle: Condvar,
    exit: AtomicBool,
    delivered: AtomicU64,
    registry: Arc<CallbackRegistry>,
    config: DispatchConfig,
}

/// Single-consumer FIFO feeding remote callbacks.
pub struct EventDispatchQueue {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatchQueue {
    /// Start the dispatch thread.
    pub fn start(registry: Arc<CallbackRegistry>, config: DispatchConfig) -> DispatchResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
            idle: Condvar::new(),
            exit: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            registry,
            config,
        });

        let worker = shared.clone();
        let thread = thread::Builder::new()
            .name("subtitle-dispatch".into())
            .spawn(move || dispatch_loop(worker))?;

        debug!("Dispatch queue started");

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Append a record.
    pub fn enqueue(&self, session_id: u32, record: EventRecord) -> DispatchResult<()> {
        if self.shared.exit.load(Ordering::Acquire) {
            return Err(DispatchError::Shutdown);
        }

        trace!(session_id, kind = record.kind(), "Enqueue record");
        self.shared
            .state
            .lock()
            .pending
            .push_back(Envelope { session_id, record });
        self.shared.ready.notify_one();
        Ok(())
    }

    /// Copy a bitmap into a fresh shared region and append it.
    ///
    /// If the region cannot be allocated this record is dropped and the error
    /// returned; the queue itself is unaffected.
    pub fn enqueue_display(&self, session_id: u32, frame: DisplayFrame) -> DispatchResult<()> {
        let region = match SharedRegion::with_contents(&frame.bytes, DISPLAY_SLACK) {
            Ok(region) => region,
            Err(e) => {
                error!(
                    session_id,
                    len = frame.bytes.len(),
                    error = %e,
                    "Dropping display payload, shared memory allocation failed"
                );
                return Err(e.into());
            }
        };

        let record = DisplayRecord {
            x: frame.x,
            y: frame.y,
            width: frame.width,
            height: frame.height,
            video_width: frame.video_width,
            video_height: frame.video_height,
            cmd: frame.cmd,
            region: Arc::new(region),
        };
        self.enqueue(session_id, EventRecord::DisplayPayload(record))
    }

    /// Append a command for the fallback renderer.
    pub fn enqueue_ui(&self, session_id: u32, command: UiCommand) -> DispatchResult<()> {
        self.enqueue(session_id, EventRecord::UiCommand(command))
    }

    /// Records waiting for delivery.
    pub fn len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records delivered so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Acquire)
    }

    /// Block until every queued record has been delivered, or `timeout`
    /// passes. Returns true if the queue drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.pending.is_empty() || state.busy {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.pending.is_empty() && !state.busy;
            }
        }
        true
    }

    /// Stop the dispatch thread. Undelivered records are discarded.
    pub fn shutdown(&self) {
        if self.shared.exit.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.ready.notify_all();

        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("Dispatch thread panicked");
            }
        }

        let dropped = {
            let mut state = self.shared.state.lock();
            let dropped = state.pending.len();
            state.pending.clear();
            dropped
        };
        self.shared.idle.notify_all();

        info!(
            delivered = self.delivered(),
            dropped, "Dispatch queue stopped"
        );
    }
}

impl Drop for EventDispatchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(shared: Arc<Shared>) {
    loop {
        let envelope = {
            let mut state = shared.state.lock();
            state.busy = false;
            loop {
                if shared.exit.load(Ordering::Acquire) {
                    shared.idle.notify_all();
                    debug!("Dispatch loop exited");
                    return;
                }
                if let Some(envelope) = state.pending.pop_front() {
                    state.busy = true;
                    break envelope;
                }
                shared.idle.notify_all();
                shared.ready.wait_for(&mut state, shared.config.idle_wait);
            }
        };

        deliver(&shared.registry, &envelope);
        shared.delivered.fetch_add(1, Ordering::AcqRel);
    }
}

fn deliver(registry: &CallbackRegistry, envelope: &Envelope) {
    let session_id = envelope.session_id;
    let snapshot = registry.snapshot();

    match &envelope.record {
        EventRecord::UiCommand(command) => {
            let Some(fallback) = snapshot.fallback else {
                trace!(session_id, ?command, "No fallback for UI command");
                return;
            };
            let result = fallback.ui_command(session_id, command);
            handle_fallback_result(registry, &fallback, result);
        }
        EventRecord::DisplayPayload(record) => {
            let live = live_clients(registry, snapshot.clients);
            if live.is_empty() {
                if let Some(fallback) = snapshot.fallback {
                    let result = fallback.notify_data(session_id, record);
                    handle_fallback_result(registry, &fallback, result);
                } else {
                    trace!(session_id, size = record.size(), "No receiver for display payload");
                }
                return;
            }
            for (slot, client) in live {
                let result = client.notify_data(session_id, record);
                handle_client_result(registry, slot, &client, result);
            }
        }
        record => {
            for (slot, client) in live_clients(registry, snapshot.clients) {
                let result = client.event_notify(session_id, record);
                handle_client_result(registry, slot, &client, result);
            }
        }
    }
}

/// Drop clients that report themselves unreachable, releasing their slots.
fn live_clients(
    registry: &CallbackRegistry,
    clients: Vec<(usize, CallbackHandle)>,
) -> Vec<(usize, CallbackHandle)> {
    clients
        .into_iter()
        .filter(|(slot, client)| {
            if client.is_alive() {
                return true;
            }
            registry.client_died_if(*slot, client);
            false
        })
        .collect()
}

fn handle_client_result(
    registry: &CallbackRegistry,
    slot: usize,
    client: &CallbackHandle,
    result: Result<(), CallbackError>,
) {
    match result {
        Ok(()) => {}
        Err(CallbackError::Dead) => {
            warn!(slot, "Callback client is dead, releasing slot");
            registry.client_died_if(slot, client);
        }
        Err(e) => warn!(slot, error = %e, "Callback delivery failed"),
    }
}

fn handle_fallback_result(
    registry: &CallbackRegistry,
    fallback: &CallbackHandle,
    result: Result<(), CallbackError>,
) {
    match result {
        Ok(()) => {}
        Err(CallbackError::Dead) => {
            warn!("Fallback client is dead, detaching");
            if let Some(slot) = registry.remove_callback(fallback) {
                debug!(slot, "Fallback also held a client slot");
            }
            registry.detach_fallback(fallback);
        }
        Err(e) => warn!(error = %e, "Fallback delivery failed"),
    }
}

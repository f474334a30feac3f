//! Session table and client bookkeeping.
//!
//! The router owns the shared pieces (socket transport, dispatch queue,
//! callback registry) and one entry per session: its service, its prepared
//! FMQ queue and the open type it was last opened with.
//!
//! # Locking
//!
//! Session operations are serialized by the session lock. Registry changes
//! take only the registry lock. Neither lock is held while calling a remote
//! client; the dispatch thread copies handles out first.
//!
//! # Open Race
//!
//! Two producers sometimes race to open the same resource with different
//! open types. If the previous `open` happened less than
//! [`OPEN_RACE_WINDOW`] ago with another open type, the service and queue of
//! the session it opened (which may be this one) are torn down before the
//! new open proceeds. The last caller inside the window wins.

use std::collections::HashMap;
use std::fs::File;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use subtitle_dispatch::{
    CallbackHandle, CallbackRegistry, EventDispatchQueue, SessionNotifier, UiCommand,
};
use subtitle_stream::{QueueDescriptor, SharedQueueReader};
use subtitle_transport::{FmqTransport, SocketTransport};
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, OPEN_RACE_WINDOW, SESSION_ID_MAX, SESSION_ID_MIN};
use crate::error::{ServerError, ServerResult};
use crate::parser::ParserFactory;
use crate::service::{DataSource, IoType, SubtitleService};

/// Per-session state.
#[derive(Default)]
struct SessionEntry {
    service: Option<SubtitleService>,
    fmq: Option<FmqTransport>,
    queue: Option<QueueDescriptor>,
    open_type: Option<i32>,
}

impl SessionEntry {
    fn stop_service(&mut self) {
        if let Some(service) = self.service.take() {
            service.stop();
        }
    }

    fn release_queue(&mut self) {
        if let Some(fmq) = self.fmq.take() {
            fmq.shutdown();
        }
        self.queue = None;
    }
}

struct LastOpen {
    session_id: u32,
    open_type: i32,
    at: Instant,
}

struct SessionTable {
    sessions: HashMap<u32, SessionEntry>,
    next_id: u32,
    last_open: Option<LastOpen>,
}

impl SessionTable {
    fn allocate_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = if id >= SESSION_ID_MAX {
                SESSION_ID_MIN
            } else {
                id + 1
            };
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    fn entry(&mut self, session_id: u32) -> ServerResult<&mut SessionEntry> {
        self.sessions
            .get_mut(&session_id)
            .ok_or(ServerError::NotFound(session_id))
    }
}

/// Routes sessions to services and owns the client registry.
pub struct SessionRouter {
    config: ServerConfig,
    socket: Arc<SocketTransport>,
    dispatch: Arc<EventDispatchQueue>,
    registry: Arc<CallbackRegistry>,
    factory: Arc<dyn ParserFactory>,
    table: Mutex<SessionTable>,
}

impl SessionRouter {
    /// Bind the socket transport and start the dispatch thread.
    pub fn start(config: ServerConfig, factory: Arc<dyn ParserFactory>) -> ServerResult<Self> {
        let registry = Arc::new(CallbackRegistry::new());
        let dispatch = Arc::new(EventDispatchQueue::start(
            registry.clone(),
            config.dispatch_config(),
        )?);
        let socket = Arc::new(SocketTransport::bind(config.socket_config())?);

        info!(addr = %socket.local_addr(), "Session router ready");

        Ok(Self {
            config,
            socket,
            dispatch,
            registry,
            factory,
            table: Mutex::new(SessionTable {
                sessions: HashMap::new(),
                next_id: SESSION_ID_MIN,
                last_open: None,
            }),
        })
    }

    /// Socket transport listen address.
    pub fn socket_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Create an empty session and return its id.
    pub fn open_connection(&self) -> u32 {
        let mut table = self.table.lock();
        let id = table.allocate_id();
        table.sessions.insert(id, SessionEntry::default());
        info!(session_id = id, sessions = table.sessions.len(), "Connection opened");
        id
    }

    /// Tear a session down completely.
    pub fn close_connection(&self, session_id: u32) -> ServerResult<()> {
        let mut table = self.table.lock();
        let mut entry = table
            .sessions
            .remove(&session_id)
            .ok_or(ServerError::NotFound(session_id))?;

        if let Err(e) = self.dispatch.enqueue_ui(session_id, UiCommand::Hide) {
            debug!(session_id, error = %e, "Hide not queued");
        }
        entry.stop_service();
        entry.release_queue();

        if table
            .last_open
            .as_ref()
            .is_some_and(|last| last.session_id == session_id)
        {
            table.last_open = None;
        }

        info!(session_id, sessions = table.sessions.len(), "Connection closed");
        Ok(())
    }

    /// Start (or restart) the session's service on the given data source.
    pub fn open(
        &self,
        session_id: u32,
        file: Option<File>,
        io_type: IoType,
        open_type: i32,
    ) -> ServerResult<()> {
        let mut table = self.table.lock();

        let now = Instant::now();
        let raced = table.last_open.as_ref().and_then(|last| {
            let within = now.duration_since(last.at) < OPEN_RACE_WINDOW;
            (within && last.open_type != open_type).then_some(last.session_id)
        });

        // Validate before touching anything
        let source = {
            let entry = table.entry(session_id)?;
            match io_type {
                IoType::Socket => DataSource::Listener(self.socket.listeners()),
                // A race on this session releases the queue being opened
                IoType::Fmq => {
                    let fmq = entry
                        .fmq
                        .as_ref()
                        .filter(|_| raced != Some(session_id))
                        .ok_or(ServerError::QueueNotPrepared(session_id))?;
                    DataSource::Listener(fmq.listeners())
                }
                IoType::File => {
                    DataSource::File(file.ok_or(ServerError::MissingFile(session_id))?)
                }
            }
        };

        if let Some(previous) = raced {
            if let Some(entry) = table.sessions.get_mut(&previous) {
                warn!(
                    session_id,
                    previous, "Open raced with a recent open of another type, tearing down previous"
                );
                entry.stop_service();
                entry.release_queue();
            }
        }

        let entry = table.entry(session_id)?;
        entry.stop_service();

        let service = SubtitleService::new(
            session_id,
            io_type,
            SessionNotifier::new(session_id, self.dispatch.clone()),
            self.factory.clone(),
        );
        service.start(source)?;
        entry.service = Some(service);
        entry.open_type = Some(open_type);

        table.last_open = Some(LastOpen {
            session_id,
            open_type,
            at: now,
        });

        info!(session_id, io_type = %io_type, open_type, "Session opened");
        Ok(())
    }

    /// Stop the session's service. The session and its queue remain.
    pub fn close(&self, session_id: u32) -> ServerResult<()> {
        let mut table = self.table.lock();
        let entry = table.entry(session_id)?;
        let service = entry
            .service
            .take()
            .ok_or(ServerError::AlreadyClosed(session_id))?;
        service.stop();

        info!(session_id, "Session closed");
        Ok(())
    }

    /// Reset the session's parser after a seek.
    pub fn reset_for_seek(&self, session_id: u32) -> ServerResult<()> {
        let mut table = self.table.lock();
        let entry = table.entry(session_id)?;
        let service = entry
            .service
            .as_ref()
            .ok_or(ServerError::NotOpen(session_id))?;
        service.reset_for_seek();
        Ok(())
    }

    /// Create the shared queue a producer writes FMQ frames into.
    ///
    /// A previously prepared queue for this session is released.
    pub fn prepare_writing_queue(&self, session_id: u32, size: usize) -> ServerResult<QueueDescriptor> {
        let mut table = self.table.lock();
        let entry = table.entry(session_id)?;

        let reader = SharedQueueReader::create(size)?;
        let descriptor = reader.descriptor();
        let fmq = FmqTransport::spawn(Box::new(reader), self.config.fmq_config())?;

        entry.release_queue();
        entry.fmq = Some(fmq);
        entry.queue = Some(descriptor.clone());

        info!(session_id, name = %descriptor.name, size, "Writing queue prepared");
        Ok(descriptor)
    }

    pub fn register_callback(&self, callback: CallbackHandle) -> usize {
        self.registry.register(callback)
    }

    /// Death notification for a client slot.
    pub fn client_died(&self, slot: usize) -> bool {
        self.registry.client_died(slot)
    }

    pub fn remove_callback(&self, callback: &CallbackHandle) -> Option<usize> {
        self.registry.remove_callback(callback)
    }

    pub fn set_fallback_callback(&self, callback: Option<CallbackHandle>) {
        self.registry.set_fallback(callback);
    }

    pub fn show(&self, session_id: u32) -> ServerResult<()> {
        self.ui(session_id, UiCommand::Show)
    }

    pub fn hide(&self, session_id: u32) -> ServerResult<()> {
        self.ui(session_id, UiCommand::Hide)
    }

    pub fn set_text_color(&self, session_id: u32, color: u32) -> ServerResult<()> {
        self.ui(session_id, UiCommand::SetTextColor(color))
    }

    pub fn set_text_size(&self, session_id: u32, size: u32) -> ServerResult<()> {
        self.ui(session_id, UiCommand::SetTextSize(size))
    }

    pub fn set_gravity(&self, session_id: u32, gravity: u32) -> ServerResult<()> {
        self.ui(session_id, UiCommand::SetGravity(gravity))
    }

    pub fn set_text_style(&self, session_id: u32, style: u32) -> ServerResult<()> {
        self.ui(session_id, UiCommand::SetTextStyle(style))
    }

    pub fn set_position(&self, session_id: u32, x: i32, y: i32) -> ServerResult<()> {
        self.ui(session_id, UiCommand::SetPosition { x, y })
    }

    pub fn set_image_ratio(
        &self,
        session_id: u32,
        ratio_w: f32,
        ratio_h: f32,
        max_w: u32,
        max_h: u32,
    ) -> ServerResult<()> {
        self.ui(
            session_id,
            UiCommand::SetImageRatio {
                ratio_w,
                ratio_h,
                max_w,
                max_h,
            },
        )
    }

    pub fn set_surface_rect(
        &self,
        session_id: u32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> ServerResult<()> {
        self.ui(
            session_id,
            UiCommand::SetSurfaceRect {
                x,
                y,
                width,
                height,
            },
        )
    }

    fn ui(&self, session_id: u32, command: UiCommand) -> ServerResult<()> {
        if !self.table.lock().sessions.contains_key(&session_id) {
            return Err(ServerError::NotFound(session_id));
        }
        self.dispatch.enqueue_ui(session_id, command)?;
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.table.lock().sessions.len()
    }

    /// Whether the session has a running service.
    pub fn is_open(&self, session_id: u32) -> bool {
        self.table
            .lock()
            .sessions
            .get(&session_id)
            .and_then(|entry| entry.service.as_ref())
            .is_some_and(SubtitleService::is_running)
    }

    /// Whether the session has a prepared writing queue.
    pub fn has_queue(&self, session_id: u32) -> bool {
        self.table
            .lock()
            .sessions
            .get(&session_id)
            .is_some_and(|entry| entry.queue.is_some())
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    pub fn dispatch(&self) -> &Arc<EventDispatchQueue> {
        &self.dispatch
    }

    /// Stop every session, then the transports and the dispatch thread.
    pub fn shutdown(&self) {
        let sessions: Vec<_> = self.table.lock().sessions.drain().collect();
        for (session_id, mut entry) in sessions {
            debug!(session_id, "Stopping session");
            entry.stop_service();
            entry.release_queue();
        }
        self.socket.shutdown();
        self.dispatch.shutdown();
    }
}

impl Drop for SessionRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

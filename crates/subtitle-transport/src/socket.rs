//! TCP socket front end.
//!
//! One accept thread, one handler thread per connection. Each handler owns a
//! [`FrameAssembler`] and forwards completed frames to the active listener of
//! the shared [`ListenerSlot`].
//!
//! ## Connection Rules
//!
//! - An `EXIT` frame ends the connection immediately, listener or not
//! - With no listener registered the handler waits, keeping buffered bytes
//! - A listener answering `Break` ends the connection
//! - EOF or a socket error ends only that connection
//!
//! Several connections may be open at once, but they all feed the same
//! active listener, so their frames interleave.

use std::io::{ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use subtitle_stream::{payload_type, FrameAssembler, SyncPolicy};
use tracing::{debug, error, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::listener::{ListenerHandle, ListenerSlot};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 10100;

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 64 * 1024;

/// Socket transport configuration.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Address to listen on
    pub addr: SocketAddr,
    /// Per-connection ring buffer size
    pub ring_capacity: usize,
    /// How long a handler blocks before re-checking for shutdown
    pub listener_wait: Duration,
    /// Sleep between accept attempts when nothing is pending
    pub accept_poll: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            ring_capacity: 512 * 1024,
            listener_wait: Duration::from_millis(100),
            accept_poll: Duration::from_millis(20),
        }
    }
}

/// State shared by the accept thread and every connection handler.
struct Shared {
    config: SocketConfig,
    listeners: Arc<ListenerSlot>,
    exit: AtomicBool,
    connections: AtomicUsize,
    handlers: Mutex<Vec<JoinHandle<()>>>,
}

/// TCP server feeding frames to a [`ListenerSlot`].
pub struct SocketTransport {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SocketTransport {
    /// Bind the listening socket and start accepting connections.
    pub fn bind(config: SocketConfig) -> TransportResult<Self> {
        let listener = TcpListener::bind(config.addr).map_err(|source| TransportError::Bind {
            addr: config.addr,
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Subtitle socket server listening");

        let shared = Arc::new(Shared {
            config,
            listeners: Arc::new(ListenerSlot::new()),
            exit: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            handlers: Mutex::new(Vec::new()),
        });

        let accept_shared = shared.clone();
        let accept_thread = thread::Builder::new()
            .name("subtitle-accept".into())
            .spawn(move || accept_loop(listener, accept_shared))?;

        Ok(Self {
            local_addr,
            shared,
            accept_thread: Mutex::new(Some(accept_thread)),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registration point for consumers of this transport.
    pub fn listeners(&self) -> Arc<ListenerSlot> {
        self.shared.listeners.clone()
    }

    /// Connections currently being served.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::Acquire)
    }

    /// Stop accepting, wake waiting handlers and join every connection thread.
    pub fn shutdown(&self) {
        if self.shared.exit.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(addr = %self.local_addr, "Subtitle socket server shutting down");
        self.shared.listeners.wake_all();

        if let Some(handle) = self.accept_thread.lock().take() {
            if handle.join().is_err() {
                error!("Accept thread panicked");
            }
        }

        let handlers: Vec<_> = self.shared.handlers.lock().drain(..).collect();
        for handle in handlers {
            if handle.join().is_err() {
                error!("Connection handler panicked");
            }
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while !shared.exit.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = spawn_handler(stream, peer, &shared) {
                    error!(peer = %peer, error = %e, "Failed to start connection handler");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(shared.config.accept_poll);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                error!(error = %e, "Accept error");
                thread::sleep(shared.config.accept_poll);
            }
        }
    }
    debug!("Accept loop exited");
}

fn spawn_handler(stream: TcpStream, peer: SocketAddr, shared: &Arc<Shared>) -> TransportResult<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(shared.config.listener_wait))?;

    let handler_shared = shared.clone();
    let handle = thread::Builder::new()
        .name(format!("subtitle-conn-{}", peer.port()))
        .spawn(move || {
            handler_shared.connections.fetch_add(1, Ordering::AcqRel);
            info!(peer = %peer, "Client connected");

            match serve_connection(&stream, &handler_shared) {
                Ok(()) => info!(peer = %peer, "Client disconnected"),
                Err(e) => warn!(peer = %peer, error = %e, "Connection closed with error"),
            }

            let _ = stream.shutdown(Shutdown::Both);
            handler_shared.connections.fetch_sub(1, Ordering::AcqRel);
        })?;

    // Finished handlers are reaped here; live ones are joined on shutdown
    let mut handlers = shared.handlers.lock();
    handlers.retain(|h| !h.is_finished());
    handlers.push(handle);
    Ok(())
}

/// Read, assemble and dispatch until the connection ends.
fn serve_connection(mut stream: &TcpStream, shared: &Shared) -> TransportResult<()> {
    let mut assembler = FrameAssembler::new(shared.config.ring_capacity, SyncPolicy::StartFlag)?;
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        while let Some(frame) = assembler.next_frame() {
            if frame.is_exit() {
                info!(session_id = frame.session_id(), "Exit frame received");
                return Ok(());
            }

            let Some(listener) = wait_for_listener(shared) else {
                return Ok(());
            };

            if listener.on_data(&frame).is_break() {
                info!(
                    payload_type = %payload_type::name(frame.payload_type()),
                    "Listener closed the connection"
                );
                return Ok(());
            }
        }

        if shared.exit.load(Ordering::Acquire) {
            return Ok(());
        }

        let want = assembler.write_avail().min(buf.len());
        if want == 0 {
            warn!(
                buffered = assembler.buffered(),
                "Ring buffer full without a complete frame, dropping buffered bytes"
            );
            assembler.reset();
            continue;
        }

        match stream.read(&mut buf[..want]) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                assembler.feed(&buf[..n]);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Block until a listener is active. `None` means shutdown was requested.
fn wait_for_listener(shared: &Shared) -> Option<ListenerHandle> {
    let mut logged = false;
    loop {
        if shared.exit.load(Ordering::Acquire) {
            return None;
        }
        if let Some(listener) = shared.listeners.wait_active(shared.config.listener_wait) {
            return Some(listener);
        }
        if !logged {
            debug!("No listener registered, holding frame");
            logged = true;
        }
    }
}

//! Subtitle server binary entry point.
//!
//! Usage: subtitle-server [--addr <host:port>] [--ring-capacity <bytes>]
//!
//! Without a decoder linked in, data payloads are forwarded unchanged and
//! every display or UI command reaching the fallback client is logged.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use subtitle_dispatch::{CallbackError, DisplayRecord, EventRecord, RemoteCallback, UiCommand};
use subtitle_server::{PassthroughParserFactory, ServerConfig, ServerResult, SessionRouter};
use tracing::info;

/// Subtitle server: frames subtitle payloads from local producers and
/// delivers them to remote renderers.
#[derive(Parser, Debug)]
#[command(name = "subtitle-server")]
#[command(about = "Local subtitle data-delivery server")]
struct Args {
    /// Socket transport listen address.
    #[arg(long, env = "SUBTITLE_SOCKET_ADDR")]
    addr: Option<SocketAddr>,

    /// Ring buffer size per transport, in bytes.
    #[arg(long, env = "SUBTITLE_RING_CAPACITY")]
    ring_capacity: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write JSONL logs to the default log file.
    #[arg(long)]
    log_file: bool,
}

/// Fallback client that records what a renderer would have drawn.
struct LoggingRenderer;

impl RemoteCallback for LoggingRenderer {
    fn notify_data(&self, session_id: u32, record: &DisplayRecord) -> Result<(), CallbackError> {
        info!(
            session_id,
            x = record.x,
            y = record.y,
            width = record.width,
            height = record.height,
            size = record.size(),
            region = %record.region.name(),
            "Display payload"
        );
        Ok(())
    }

    fn event_notify(&self, session_id: u32, event: &EventRecord) -> Result<(), CallbackError> {
        info!(session_id, kind = event.kind(), ?event, "Subtitle event");
        Ok(())
    }

    fn ui_command(&self, session_id: u32, command: &UiCommand) -> Result<(), CallbackError> {
        info!(session_id, ?command, "UI command");
        Ok(())
    }
}

fn main() -> ServerResult<()> {
    let args = Args::parse();

    // Initialize logging via observability crate
    observability::init_with_config(observability::LogConfig {
        service_name: "subtitle-server".into(),
        default_level: args.log_level.clone(),
        also_stderr: true,
        file_output: args.log_file,
        ..Default::default()
    });

    info!("Subtitle server starting...");

    let mut config = ServerConfig::from_env()?;
    if let Some(addr) = args.addr {
        config.socket_addr = addr;
    }
    if let Some(ring_capacity) = args.ring_capacity {
        config.ring_capacity = ring_capacity;
    }

    info!(
        addr = %config.socket_addr,
        ring_capacity = config.ring_capacity,
        fmq_poll_ms = config.fmq_poll_interval.as_millis() as u64,
        "Configuration loaded"
    );

    let router = SessionRouter::start(config, Arc::new(PassthroughParserFactory))?;
    router.set_fallback_callback(Some(Arc::new(LoggingRenderer)));

    // Socket producers that do not negotiate a session land here
    let session_id = router.open_connection();
    router.open(session_id, None, subtitle_server::IoType::Socket, 0)?;
    info!(session_id, addr = %router.socket_addr(), "Default socket session open");

    // Install signal handlers for graceful shutdown
    let term = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, term.clone())?;
    }

    while !term.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("Received shutdown signal, exiting...");
    router.shutdown();
    Ok(())
}

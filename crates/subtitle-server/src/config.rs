//! Configuration for the subtitle server.

use std::net::SocketAddr;
use std::time::Duration;

use subtitle_dispatch::DispatchConfig;
use subtitle_transport::{FmqConfig, SocketConfig, DEFAULT_PORT};

use crate::error::{ServerError, ServerResult};

/// Two opens closer together than this, with different open types, replace
/// the earlier session's service and queue.
pub const OPEN_RACE_WINDOW: Duration = Duration::from_millis(200);

/// Lowest session id handed out.
pub const SESSION_ID_MIN: u32 = 1;

/// Highest session id before allocation wraps to [`SESSION_ID_MIN`].
pub const SESSION_ID_MAX: u32 = 0x7FFF_FFFF;

/// Subtitle server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket transport listen address
    pub socket_addr: SocketAddr,

    /// Ring buffer size for every transport
    pub ring_capacity: usize,

    /// Sleep between polls of an empty shared queue
    pub fmq_poll_interval: Duration,

    /// Dispatch thread idle park time
    pub dispatch_idle: Duration,

    /// How long a socket handler waits for a listener before re-checking
    pub listener_wait: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            ring_capacity: 512 * 1024,
            fmq_poll_interval: Duration::from_millis(5),
            dispatch_idle: Duration::from_millis(100),
            listener_wait: Duration::from_millis(100),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `SUBTITLE_*` environment variables.
    pub fn from_env() -> ServerResult<Self> {
        let defaults = Self::default();

        let socket_addr = match std::env::var("SUBTITLE_SOCKET_ADDR") {
            Ok(addr) => addr
                .parse()
                .map_err(|e| ServerError::Config(format!("SUBTITLE_SOCKET_ADDR '{addr}': {e}")))?,
            Err(_) => defaults.socket_addr,
        };

        let ring_capacity: usize = std::env::var("SUBTITLE_RING_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.ring_capacity);
        if ring_capacity == 0 {
            return Err(ServerError::Config(
                "SUBTITLE_RING_CAPACITY must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            socket_addr,
            ring_capacity,
            fmq_poll_interval: env_millis("SUBTITLE_FMQ_POLL_MS", defaults.fmq_poll_interval),
            dispatch_idle: env_millis("SUBTITLE_DISPATCH_IDLE_MS", defaults.dispatch_idle),
            listener_wait: env_millis("SUBTITLE_LISTENER_WAIT_MS", defaults.listener_wait),
        })
    }

    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig {
            addr: self.socket_addr,
            ring_capacity: self.ring_capacity,
            listener_wait: self.listener_wait,
            ..Default::default()
        }
    }

    pub fn fmq_config(&self) -> FmqConfig {
        FmqConfig {
            ring_capacity: self.ring_capacity,
            poll_interval: self.fmq_poll_interval,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            idle_wait: self.dispatch_idle,
        }
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

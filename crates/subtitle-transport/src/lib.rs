//! Transport front ends for subtitle payloads.
//!
//! Two ways for a producer to hand framed bytes to the service:
//! - [`SocketTransport`]: TCP server, one handler thread per connection
//! - [`FmqTransport`]: poller over a shared-memory byte queue ([`ByteSource`])
//!
//! Both feed assembled frames to whichever [`DataListener`] is currently
//! active in their [`ListenerSlot`].

pub mod error;
pub mod fmq;
pub mod listener;
pub mod socket;

pub use error::{TransportError, TransportResult};
pub use fmq::{ByteSource, FmqConfig, FmqTransport};
pub use listener::{DataListener, ListenerHandle, ListenerId, ListenerSlot};
pub use socket::{SocketConfig, SocketTransport, DEFAULT_PORT};

//! Subtitle server: session routing on top of the transport and dispatch
//! crates.
//!
//! # Architecture
//!
//! ```text
//! producer ─► SocketTransport / FmqTransport / file
//!                    │ DataListener
//!                    ▼
//!             SubtitleService ─► SubtitleParser ─► SessionNotifier
//!                                                        │
//!                                                        ▼
//!                                  EventDispatchQueue ─► RemoteCallback(s)
//! ```
//!
//! [`SessionRouter`] owns the session table and the client registry, and is
//! the surface the control API calls into.

pub mod config;
pub mod error;
pub mod parser;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use config::{ServerConfig, OPEN_RACE_WINDOW, SESSION_ID_MAX, SESSION_ID_MIN};
pub use error::{ServerError, ServerResult};
pub use parser::{ParserFactory, PassthroughParser, PassthroughParserFactory, SubtitleParser};
pub use router::SessionRouter;
pub use service::{DataSource, IoType, StreamInfo, SubtitleService};

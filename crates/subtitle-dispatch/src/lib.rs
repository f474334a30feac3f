//! Asynchronous delivery of subtitle output to remote clients.
//!
//! Parsers report through a [`ParserEventNotifier`]; [`SessionNotifier`]
//! turns each call into an [`EventRecord`] on the shared
//! [`EventDispatchQueue`]. The queue's single thread delivers records in
//! FIFO order to the clients held by the [`CallbackRegistry`].
//!
//! ```text
//! parser ──► SessionNotifier ──► EventDispatchQueue ──► RemoteCallback (slot 0..n)
//!                                       │
//!                                       └──────────────► fallback (UI, display)
//! ```
//!
//! Display payloads are copied into a [`subtitle_stream::SharedRegion`]
//! before they are queued, so clients in other processes can map them.

pub mod callback;
pub mod error;
pub mod notifier;
pub mod queue;
pub mod record;
pub mod registry;

pub use callback::{same_callback, CallbackHandle, RemoteCallback};
pub use error::{CallbackError, DispatchError, DispatchResult};
pub use notifier::{ParserEventNotifier, SessionNotifier};
pub use queue::{DispatchConfig, Envelope, EventDispatchQueue, DISPLAY_SLACK};
pub use record::{display_cmd, info, DisplayFrame, DisplayRecord, EventRecord, UiCommand};
pub use registry::{CallbackRegistry, ClientSnapshot};

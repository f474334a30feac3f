//! Byte-level building blocks for subtitle payload delivery.
//!
//! This crate provides:
//! - [`RingBuffer`]: fixed-capacity circular buffer with clamped transfers
//! - [`protocol`]: the 20-byte frame header and payload type tags
//! - [`FrameCodec`] / [`FrameAssembler`]: resynchronizing frame extraction
//! - Shared memory (Unix): [`SharedQueueReader`]/[`SharedQueueWriter`] for the
//!   fast message queue transport and [`SharedRegion`] for display payloads
//!
//! # Data Path
//!
//! ```text
//! socket / shared queue bytes
//!          │ feed()
//!          ▼
//!   ┌─────────────┐   poll()   ┌────────────┐
//!   │ RingBuffer  │──────────► │ FrameCodec │──► Frame { header, payload }
//!   └─────────────┘            └────────────┘
//! ```
//!
//! # Thread Safety
//!
//! `RingBuffer` and `FrameAssembler` take `&mut self` for every transfer and
//! are owned by exactly one transport thread. The shared queue is single
//! producer, single consumer across processes.

pub mod codec;
pub mod error;
pub mod protocol;
pub mod ring;

#[cfg(unix)]
pub mod unix;

pub use codec::{FrameAssembler, FrameCodec, RESYNC_STEP};
pub use error::{StreamError, StreamResult};
pub use protocol::{
    encode_frame, payload_type, Frame, FrameHeader, SyncPolicy, HEADER_SIZE, MAGIC_FLAG,
    START_FLAG,
};
pub use ring::RingBuffer;

#[cfg(unix)]
pub use unix::{QueueDescriptor, SharedQueueReader, SharedQueueWriter, SharedRegion};

//! Frame assembly over a [`RingBuffer`].
//!
//! The codec is a two-state machine:
//!
//! ```text
//!            header synced, consumed
//! AwaitingHeader ───────────────────────► AwaitingPayload(header)
//!      ▲   │                                        │
//!      │   └─ sync mismatch: drop 4 bytes, retry    │ payload_size bytes buffered
//!      └────────────────── emit Frame ◄─────────────┘
//! ```
//!
//! A frame whose payload never completes keeps the codec in
//! `AwaitingPayload`. That is the backpressure point for a connection; there
//! is no timeout.

use tracing::{debug, trace};

use crate::error::StreamResult;
use crate::protocol::{payload_type, Frame, FrameHeader, SyncPolicy, HEADER_SIZE};
use crate::ring::RingBuffer;

/// Bytes dropped per failed sync attempt.
pub const RESYNC_STEP: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodecState {
    AwaitingHeader,
    AwaitingPayload(FrameHeader),
}

/// Extracts frames from buffered bytes.
#[derive(Debug)]
pub struct FrameCodec {
    policy: SyncPolicy,
    state: CodecState,
    discarded: u64,
}

impl FrameCodec {
    pub fn new(policy: SyncPolicy) -> Self {
        Self {
            policy,
            state: CodecState::AwaitingHeader,
            discarded: 0,
        }
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Whether a header has been consumed and its payload is pending.
    pub fn is_awaiting_payload(&self) -> bool {
        matches!(self.state, CodecState::AwaitingPayload(_))
    }

    /// Total bytes thrown away while resynchronizing.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    /// Forget any half-read frame.
    pub fn reset(&mut self) {
        self.state = CodecState::AwaitingHeader;
    }

    /// Pull the next complete frame out of `ring`, if one is buffered.
    pub fn poll(&mut self, ring: &mut RingBuffer) -> Option<Frame> {
        loop {
            match self.state {
                CodecState::AwaitingHeader => {
                    if ring.read_avail() < HEADER_SIZE {
                        return None;
                    }

                    let mut raw = [0u8; HEADER_SIZE];
                    ring.peek(&mut raw);
                    let header = match FrameHeader::decode(&raw) {
                        Ok(header) => header,
                        Err(_) => return None,
                    };

                    if !header.is_synced(self.policy)
                        || header.payload_size as usize > ring.capacity()
                    {
                        self.discarded += ring.skip(RESYNC_STEP) as u64;
                        trace!(
                            sync_word = header.sync_word,
                            discarded = self.discarded,
                            "Frame header out of sync, stepping"
                        );
                        continue;
                    }

                    ring.skip(HEADER_SIZE);
                    self.state = CodecState::AwaitingPayload(header);
                }
                CodecState::AwaitingPayload(header) => {
                    let size = header.payload_size as usize;
                    if ring.read_avail() < size {
                        return None;
                    }

                    let mut payload = vec![0u8; size];
                    ring.read(&mut payload);
                    self.state = CodecState::AwaitingHeader;

                    debug!(
                        session_id = header.session_id,
                        payload_type = %payload_type::name(header.payload_type),
                        payload_size = size,
                        "Assembled frame"
                    );

                    return Some(Frame { header, payload });
                }
            }
        }
    }
}

/// A [`RingBuffer`] paired with a [`FrameCodec`]: push bytes in, pull frames out.
#[derive(Debug)]
pub struct FrameAssembler {
    ring: RingBuffer,
    codec: FrameCodec,
}

impl FrameAssembler {
    pub fn new(capacity: usize, policy: SyncPolicy) -> StreamResult<Self> {
        Ok(Self {
            ring: RingBuffer::new(capacity)?,
            codec: FrameCodec::new(policy),
        })
    }

    /// Buffer as many of `bytes` as fit. Returns the number accepted.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        self.ring.write(bytes)
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        self.codec.poll(&mut self.ring)
    }

    /// Free space for the next [`feed`](Self::feed).
    pub fn write_avail(&self) -> usize {
        self.ring.write_avail()
    }

    pub fn buffered(&self) -> usize {
        self.ring.read_avail()
    }

    pub fn discarded_bytes(&self) -> u64 {
        self.codec.discarded_bytes()
    }

    /// Drop buffered bytes and any partial frame.
    pub fn reset(&mut self) {
        self.ring.reset();
        self.codec.reset();
    }
}

//! Wire protocol for framed subtitle payloads.
//!
//! Both transports (TCP socket and shared-memory queue) carry the same frame
//! layout. All header words are little-endian (byte 0 is the LSB).
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────┬──────────────┬─────────────┐
//! │ sync_word:4  │ session_id:4 │ magic_word:4 │ payload_size │ payload_type │ payload ... │
//! │ 0xF0D0C0B1   │              │ 0xCFFFFFFB   │ :4           │ :4           │ size bytes  │
//! └──────────────┴──────────────┴──────────────┴──────────────┴──────────────┴─────────────┘
//! ```
//!
//! The socket transport only checks `sync_word`. The shared-memory transport
//! additionally requires `magic_word` at byte offset 8.

use crate::error::{StreamError, StreamResult};

/// First word of every frame.
pub const START_FLAG: u32 = 0xF0D0_C0B1;

/// Second sync word, at byte offset 8.
pub const MAGIC_FLAG: u32 = 0xCFFF_FFFB;

/// Size of the encoded header (five u32 words).
pub const HEADER_SIZE: usize = 20;

/// Payload type identifiers. Each is four ASCII characters packed
/// big-endian into a u32, so `SRDT` reads as `0x53524454`.
pub mod payload_type {
    const fn tag(code: &[u8; 4]) -> u32 {
        u32::from_be_bytes(*code)
    }

    /// Current video render time (u32/u64 pts)
    pub const RENDER_TIME: u32 = tag(b"SRDT");
    /// Total subtitle track count
    pub const TOTAL: u32 = tag(b"STTL");
    /// Start pts of the stream
    pub const START_PTS: u32 = tag(b"SPTS");
    /// Subtitle codec type (selects the parser)
    pub const SUBTITLE_TYPE: u32 = tag(b"STYP");
    /// Human-readable subtitle type string
    pub const TYPE_STRING: u32 = tag(b"TPSR");
    /// Subtitle language string
    pub const LANG_STRING: u32 = tag(b"LGSR");
    /// Encoded subtitle data for the parser
    pub const DATA: u32 = tag(b"PLDT");
    /// Terminate this connection
    pub const EXIT: u32 = tag(b"EXIT");
    /// Reset parser state
    pub const RESET: u32 = tag(b"REST");

    /// Printable form of a payload type, e.g. `"PLDT"`.
    pub fn name(value: u32) -> String {
        value
            .to_be_bytes()
            .iter()
            .map(|b| if b.is_ascii_graphic() { *b as char } else { '?' })
            .collect()
    }
}

/// Which header words must match before a frame is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// `sync_word == START_FLAG` (socket transport)
    StartFlag,
    /// `sync_word == START_FLAG` and `magic_word == MAGIC_FLAG` (shared-memory transport)
    StartAndMagic,
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sync_word: u32,
    pub session_id: u32,
    pub magic_word: u32,
    pub payload_size: u32,
    pub payload_type: u32,
}

impl FrameHeader {
    /// Header for a new outgoing frame.
    pub fn new(session_id: u32, payload_type: u32, payload_size: u32) -> Self {
        Self {
            sync_word: START_FLAG,
            session_id,
            magic_word: MAGIC_FLAG,
            payload_size,
            payload_type,
        }
    }

    /// Check the sync words required by `policy`.
    pub fn is_synced(&self, policy: SyncPolicy) -> bool {
        match policy {
            SyncPolicy::StartFlag => self.sync_word == START_FLAG,
            SyncPolicy::StartAndMagic => {
                self.sync_word == START_FLAG && self.magic_word == MAGIC_FLAG
            }
        }
    }

    /// Encode to the 20-byte wire form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let words = [
            self.sync_word,
            self.session_id,
            self.magic_word,
            self.payload_size,
            self.payload_type,
        ];
        for (chunk, word) in buf.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Decode from at least `HEADER_SIZE` bytes. Does not validate sync words.
    pub fn decode(data: &[u8]) -> StreamResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(StreamError::TruncatedHeader {
                got: data.len(),
                need: HEADER_SIZE,
            });
        }

        let word = |index: usize| {
            let start = index * 4;
            u32::from_le_bytes([
                data[start],
                data[start + 1],
                data[start + 2],
                data[start + 3],
            ])
        };

        Ok(Self {
            sync_word: word(0),
            session_id: word(1),
            magic_word: word(2),
            payload_size: word(3),
            payload_type: word(4),
        })
    }
}

/// One complete frame: header plus its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn payload_type(&self) -> u32 {
        self.header.payload_type
    }

    pub fn session_id(&self) -> u32 {
        self.header.session_id
    }

    /// Whether this frame asks the transport to drop the connection.
    pub fn is_exit(&self) -> bool {
        self.header.payload_type == payload_type::EXIT
    }

    /// Payload interpreted as a little-endian u32, if long enough.
    pub fn payload_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.payload.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Payload interpreted as a little-endian u64 when 8 bytes are present,
    /// otherwise as a u32.
    pub fn payload_u64(&self) -> Option<u64> {
        if let Some(bytes) = self.payload.get(..8) {
            let bytes: [u8; 8] = bytes.try_into().ok()?;
            return Some(u64::from_le_bytes(bytes));
        }
        self.payload_u32().map(u64::from)
    }

    /// Payload as text, trailing NULs stripped.
    pub fn payload_text(&self) -> String {
        let end = self
            .payload
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |pos| pos + 1);
        String::from_utf8_lossy(&self.payload[..end]).into_owned()
    }
}

/// Encode a complete frame (header + payload) ready to send.
pub fn encode_frame(session_id: u32, payload_type: u32, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader::new(session_id, payload_type, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_type_tags() {
        assert_eq!(payload_type::RENDER_TIME, 0x5352_4454);
        assert_eq!(payload_type::name(payload_type::DATA), "PLDT");
        assert_eq!(payload_type::name(payload_type::EXIT), "EXIT");
        assert_eq!(payload_type::name(0x0000_0001), "????");
    }

    #[test]
    fn test_header_byte_layout() {
        let header = FrameHeader::new(0x01, payload_type::DATA, 8);
        let bytes = header.encode();

        // byte 0 is the LSB of the sync word
        assert_eq!(&bytes[0..4], &[0xB1, 0xC0, 0xD0, 0xF0]);
        assert_eq!(&bytes[4..8], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[8..12], &[0xFB, 0xFF, 0xFF, 0xCF]);
        assert_eq!(&bytes[12..16], &[0x08, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[16..20], b"TDLP");

        assert_eq!(FrameHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_decode_truncated() {
        let result = FrameHeader::decode(&[0u8; 12]);
        assert!(matches!(
            result,
            Err(StreamError::TruncatedHeader { got: 12, need: 20 })
        ));
    }

    #[test]
    fn test_sync_policies() {
        let mut header = FrameHeader::new(1, payload_type::DATA, 0);
        assert!(header.is_synced(SyncPolicy::StartFlag));
        assert!(header.is_synced(SyncPolicy::StartAndMagic));

        header.magic_word = 0;
        assert!(header.is_synced(SyncPolicy::StartFlag));
        assert!(!header.is_synced(SyncPolicy::StartAndMagic));

        header.sync_word = 0xDEAD_BEEF;
        assert!(!header.is_synced(SyncPolicy::StartFlag));
    }

    #[test]
    fn test_payload_accessors() {
        let frame = Frame {
            header: FrameHeader::new(1, payload_type::RENDER_TIME, 8),
            payload: 0x1_0000_0002u64.to_le_bytes().to_vec(),
        };
        assert_eq!(frame.payload_u32(), Some(2));
        assert_eq!(frame.payload_u64(), Some(0x1_0000_0002));

        let short = Frame {
            header: FrameHeader::new(1, payload_type::TOTAL, 4),
            payload: 7u32.to_le_bytes().to_vec(),
        };
        assert_eq!(short.payload_u64(), Some(7));

        let text = Frame {
            header: FrameHeader::new(1, payload_type::LANG_STRING, 5),
            payload: b"eng\0\0".to_vec(),
        };
        assert_eq!(text.payload_text(), "eng");
    }
}

//! Records carried by the dispatch queue.

use std::sync::Arc;

use subtitle_stream::SharedRegion;

/// Codes for [`EventRecord::Info`].
pub mod info {
    /// The subtitle type changed and a new parser was created.
    pub const TYPE_CHANGED: i32 = 1;
    /// The total subtitle count was reported by the producer.
    pub const TOTAL_CHANGED: i32 = 2;
}

/// Display command codes carried with a bitmap.
pub mod display_cmd {
    /// Draw the payload.
    pub const SHOW: i32 = 0;
    /// Clear the display area.
    pub const CLEAR: i32 = 1;
}

/// A decoded bitmap as produced by a parser, before it is moved into shared
/// memory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisplayFrame {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub video_width: i32,
    pub video_height: i32,
    pub cmd: i32,
    pub bytes: Vec<u8>,
}

/// A display payload whose bytes live in a shared memory region.
#[derive(Debug, Clone)]
pub struct DisplayRecord {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub video_width: i32,
    pub video_height: i32,
    pub cmd: i32,
    pub region: Arc<SharedRegion>,
}

impl DisplayRecord {
    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.region.len()
    }

    pub fn bytes(&self) -> &[u8] {
        self.region.as_bytes()
    }
}

/// Commands for the fallback renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UiCommand {
    Show,
    Hide,
    SetTextColor(u32),
    SetTextSize(u32),
    SetGravity(u32),
    SetTextStyle(u32),
    SetPosition { x: i32, y: i32 },
    SetImageRatio { ratio_w: f32, ratio_h: f32, max_w: u32, max_h: u32 },
    SetSurfaceRect { x: i32, y: i32, width: i32, height: i32 },
}

/// One unit of work for the dispatch thread.
#[derive(Debug, Clone)]
pub enum EventRecord {
    DataEvent { event: i32, id: i32 },
    Available { flag: i32 },
    AfdChange { afd: i32 },
    MixVideoEvent { val: i32 },
    Dimension { width: u32, height: u32 },
    Language { text: String },
    Info { what: i32, extra: i32 },
    DisplayPayload(DisplayRecord),
    UiCommand(UiCommand),
}

impl EventRecord {
    /// Short name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataEvent { .. } => "data_event",
            Self::Available { .. } => "available",
            Self::AfdChange { .. } => "afd_change",
            Self::MixVideoEvent { .. } => "mix_video_event",
            Self::Dimension { .. } => "dimension",
            Self::Language { .. } => "language",
            Self::Info { .. } => "info",
            Self::DisplayPayload(_) => "display",
            Self::UiCommand(_) => "ui_command",
        }
    }
}

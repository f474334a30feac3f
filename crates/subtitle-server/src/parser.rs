//! Boundary to the subtitle decoders.
//!
//! Decoders live outside this workspace. The service only needs to create a
//! parser for a subtitle type, feed it data and control it during playback.

use subtitle_dispatch::{display_cmd, DisplayFrame, ParserEventNotifier};
use tracing::trace;

/// A decoder for one subtitle type.
pub trait SubtitleParser: Send {
    /// Decode one data payload, reporting results through `notifier`.
    fn parse(&mut self, payload: &[u8], notifier: &dyn ParserEventNotifier);

    /// Current playback position in pts units.
    fn set_render_time(&mut self, pts: u64);

    /// Drop any decode state (seek, stream reset).
    fn reset(&mut self);
}

/// Creates parsers by subtitle type code.
pub trait ParserFactory: Send + Sync {
    fn create(&self, subtitle_type: u32) -> Box<dyn SubtitleParser>;
}

/// Forwards every data payload unchanged as a display frame.
///
/// Used when no decoder is linked in; the remote renderer receives the raw
/// bytes.
#[derive(Debug, Default)]
pub struct PassthroughParser {
    subtitle_type: u32,
    render_time: u64,
}

impl PassthroughParser {
    pub fn new(subtitle_type: u32) -> Self {
        Self {
            subtitle_type,
            render_time: 0,
        }
    }

    pub fn render_time(&self) -> u64 {
        self.render_time
    }
}

impl SubtitleParser for PassthroughParser {
    fn parse(&mut self, payload: &[u8], notifier: &dyn ParserEventNotifier) {
        if payload.is_empty() {
            return;
        }
        trace!(
            subtitle_type = self.subtitle_type,
            len = payload.len(),
            "Passthrough payload"
        );
        notifier.on_subtitle_display(DisplayFrame {
            width: payload.len() as i32,
            height: 1,
            cmd: display_cmd::SHOW,
            bytes: payload.to_vec(),
            ..Default::default()
        });
    }

    fn set_render_time(&mut self, pts: u64) {
        self.render_time = pts;
    }

    fn reset(&mut self) {
        self.render_time = 0;
    }
}

/// Factory for [`PassthroughParser`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughParserFactory;

impl ParserFactory for PassthroughParserFactory {
    fn create(&self, subtitle_type: u32) -> Box<dyn SubtitleParser> {
        Box::new(PassthroughParser::new(subtitle_type))
    }
}

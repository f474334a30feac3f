//! Parser-facing event sink.

use std::sync::Arc;

use tracing::warn;

use crate::error::DispatchError;
use crate::queue::EventDispatchQueue;
use crate::record::{DisplayFrame, EventRecord};

/// Callbacks a subtitle parser raises while decoding.
pub trait ParserEventNotifier: Send + Sync {
    fn on_subtitle_data_event(&self, event: i32, id: i32);
    fn on_subtitle_dimension(&self, width: u32, height: u32);
    fn on_subtitle_available(&self, flag: i32);
    fn on_video_afd_change(&self, afd: i32);
    fn on_mix_video_event(&self, val: i32);
    fn on_subtitle_language(&self, text: &str);
    fn on_subtitle_info(&self, what: i32, extra: i32);
    /// A decoded bitmap is ready for display.
    fn on_subtitle_display(&self, frame: DisplayFrame);
}

/// Turns parser callbacks for one session into queued records.
#[derive(Clone)]
pub struct SessionNotifier {
    session_id: u32,
    queue: Arc<EventDispatchQueue>,
}

impl SessionNotifier {
    pub fn new(session_id: u32, queue: Arc<EventDispatchQueue>) -> Self {
        Self { session_id, queue }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    fn push(&self, record: EventRecord) {
        let kind = record.kind();
        if let Err(e) = self.queue.enqueue(self.session_id, record) {
            warn!(session_id = self.session_id, kind, error = %e, "Event dropped");
        }
    }
}

impl ParserEventNotifier for SessionNotifier {
    fn on_subtitle_data_event(&self, event: i32, id: i32) {
        self.push(EventRecord::DataEvent { event, id });
    }

    fn on_subtitle_dimension(&self, width: u32, height: u32) {
        self.push(EventRecord::Dimension { width, height });
    }

    fn on_subtitle_available(&self, flag: i32) {
        self.push(EventRecord::Available { flag });
    }

    fn on_video_afd_change(&self, afd: i32) {
        self.push(EventRecord::AfdChange { afd });
    }

    fn on_mix_video_event(&self, val: i32) {
        self.push(EventRecord::MixVideoEvent { val });
    }

    fn on_subtitle_language(&self, text: &str) {
        self.push(EventRecord::Language {
            text: text.to_string(),
        });
    }

    fn on_subtitle_info(&self, what: i32, extra: i32) {
        self.push(EventRecord::Info { what, extra });
    }

    fn on_subtitle_display(&self, frame: DisplayFrame) {
        match self.queue.enqueue_display(self.session_id, frame) {
            Ok(()) => {}
            // Allocation failures are logged by the queue
            Err(DispatchError::Stream(_)) => {}
            Err(e) => {
                warn!(session_id = self.session_id, kind = "display", error = %e, "Event dropped");
            }
        }
    }
}

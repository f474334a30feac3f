//! Per-session subtitle service.
//!
//! A service consumes frames from one data source, interprets the control
//! payload types and hands subtitle data to its parser. Parser output flows
//! to the dispatch queue through a [`SessionNotifier`].
//!
//! ## Payload Handling
//!
//! | Type | Action |
//! |------|--------|
//! | `SRDT` | render time to the parser |
//! | `STTL` | total count stored, reported as info |
//! | `SPTS` | start pts stored |
//! | `STYP` | parser recreated for the new type, reported as info |
//! | `TPSR` | type string stored |
//! | `LGSR` | language reported |
//! | `PLDT` | parsed |
//! | `REST` | parser reset |

use std::fs::File;
use std::io::Read;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use subtitle_dispatch::{info as info_code, ParserEventNotifier, SessionNotifier};
use subtitle_stream::{payload_type, Frame, FrameHeader};
use subtitle_transport::{DataListener, ListenerId, ListenerSlot};
use tracing::{debug, error, info, trace, warn};

use crate::error::ServerResult;
use crate::parser::{ParserFactory, SubtitleParser};

/// How a session receives its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoType {
    Socket,
    Fmq,
    File,
}

impl std::fmt::Display for IoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoType::Socket => write!(f, "socket"),
            IoType::Fmq => write!(f, "fmq"),
            IoType::File => write!(f, "file"),
        }
    }
}

/// A concrete data source for [`SubtitleService::start`].
pub enum DataSource {
    /// Register on a transport's listener slot
    Listener(Arc<ListenerSlot>),
    /// Read a subtitle file on a helper thread
    File(File),
}

/// Values reported by control frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub subtitle_type: u32,
    pub total: u32,
    pub start_pts: u64,
    pub render_time: u64,
    pub type_string: String,
    pub language: String,
}

struct ParseState {
    parser: Box<dyn SubtitleParser>,
    info: StreamInfo,
}

/// The part of a service shared with transports and helper threads.
struct ServiceCore {
    session_id: u32,
    running: AtomicBool,
    notifier: SessionNotifier,
    factory: Arc<dyn ParserFactory>,
    state: Mutex<ParseState>,
}

impl ServiceCore {
    fn handle(&self, frame: &Frame) {
        let mut state = self.state.lock();
        let kind = frame.payload_type();

        match kind {
            payload_type::RENDER_TIME => match frame.payload_u64() {
                Some(pts) => {
                    state.info.render_time = pts;
                    state.parser.set_render_time(pts);
                }
                None => self.short_payload(frame),
            },
            payload_type::TOTAL => match frame.payload_u32() {
                Some(total) => {
                    state.info.total = total;
                    drop(state);
                    self.notifier
                        .on_subtitle_info(info_code::TOTAL_CHANGED, total as i32);
                }
                None => self.short_payload(frame),
            },
            payload_type::START_PTS => match frame.payload_u64() {
                Some(pts) => state.info.start_pts = pts,
                None => self.short_payload(frame),
            },
            payload_type::SUBTITLE_TYPE => match frame.payload_u32() {
                Some(subtitle_type) => {
                    if subtitle_type != state.info.subtitle_type {
                        info!(
                            session_id = self.session_id,
                            from = state.info.subtitle_type,
                            to = subtitle_type,
                            "Subtitle type changed, recreating parser"
                        );
                        let render_time = state.info.render_time;
                        state.parser = self.factory.create(subtitle_type);
                        state.parser.set_render_time(render_time);
                        state.info.subtitle_type = subtitle_type;
                    }
                    drop(state);
                    self.notifier
                        .on_subtitle_info(info_code::TYPE_CHANGED, subtitle_type as i32);
                }
                None => self.short_payload(frame),
            },
            payload_type::TYPE_STRING => {
                state.info.type_string = frame.payload_text();
            }
            payload_type::LANG_STRING => {
                let language = frame.payload_text();
                state.info.language = language.clone();
                drop(state);
                self.notifier.on_subtitle_language(&language);
            }
            payload_type::DATA => {
                let ParseState { parser, .. } = &mut *state;
                parser.parse(&frame.payload, &self.notifier);
            }
            payload_type::RESET => {
                debug!(session_id = self.session_id, "Parser reset requested");
                state.parser.reset();
            }
            other => {
                debug!(
                    session_id = self.session_id,
                    payload_type = %payload_type::name(other),
                    len = frame.payload.len(),
                    "Ignoring unknown payload type"
                );
            }
        }
    }

    fn short_payload(&self, frame: &Frame) {
        warn!(
            session_id = self.session_id,
            payload_type = %payload_type::name(frame.payload_type()),
            len = frame.payload.len(),
            "Control payload too short, ignored"
        );
    }
}

impl DataListener for ServiceCore {
    fn on_data(&self, frame: &Frame) -> ControlFlow<()> {
        if !self.running.load(Ordering::Acquire) {
            return ControlFlow::Break(());
        }
        trace!(
            session_id = self.session_id,
            payload_type = %payload_type::name(frame.payload_type()),
            len = frame.payload.len(),
            "Frame received"
        );
        self.handle(frame);
        ControlFlow::Continue(())
    }
}

/// Subtitle service for one session.
pub struct SubtitleService {
    core: Arc<ServiceCore>,
    io_type: IoType,
    registration: Mutex<Option<(Arc<ListenerSlot>, ListenerId)>>,
    helper: Mutex<Option<JoinHandle<()>>>,
}

impl SubtitleService {
    pub fn new(
        session_id: u32,
        io_type: IoType,
        notifier: SessionNotifier,
        factory: Arc<dyn ParserFactory>,
    ) -> Self {
        let parser = factory.create(0);
        Self {
            core: Arc::new(ServiceCore {
                session_id,
                running: AtomicBool::new(false),
                notifier,
                factory,
                state: Mutex::new(ParseState {
                    parser,
                    info: StreamInfo::default(),
                }),
            }),
            io_type,
            registration: Mutex::new(None),
            helper: Mutex::new(None),
        }
    }

    /// Begin consuming `source`.
    pub fn start(&self, source: DataSource) -> ServerResult<()> {
        let session_id = self.core.session_id;
        self.core.running.store(true, Ordering::Release);

        match source {
            DataSource::Listener(slot) => {
                let id = slot.register(self.core.clone());
                *self.registration.lock() = Some((slot, id));
            }
            DataSource::File(file) => {
                let core = self.core.clone();
                let handle = thread::Builder::new()
                    .name(format!("subtitle-file-{session_id}"))
                    .spawn(move || read_file_source(file, &core))
                    .inspect_err(|_| self.core.running.store(false, Ordering::Release))?;
                *self.helper.lock() = Some(handle);
            }
        }

        info!(session_id, io_type = %self.io_type, "Subtitle service started");
        Ok(())
    }

    /// Stop consuming. Safe to call more than once.
    ///
    /// A file source is delivered in full before the service stops.
    pub fn stop(&self) {
        if let Some((slot, id)) = self.registration.lock().take() {
            slot.unregister(id);
        }
        if let Some(handle) = self.helper.lock().take() {
            if handle.join().is_err() {
                error!(session_id = self.core.session_id, "File source thread panicked");
            }
        }

        let was_running = self.core.running.swap(false, Ordering::AcqRel);

        if was_running {
            info!(session_id = self.core.session_id, "Subtitle service stopped");
        }
    }

    /// Drop parser state after a seek.
    pub fn reset_for_seek(&self) {
        debug!(session_id = self.core.session_id, "Reset for seek");
        self.core.state.lock().parser.reset();
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    pub fn io_type(&self) -> IoType {
        self.io_type
    }

    pub fn session_id(&self) -> u32 {
        self.core.session_id
    }

    /// Snapshot of the values reported by control frames.
    pub fn stream_info(&self) -> StreamInfo {
        self.core.state.lock().info.clone()
    }

    /// Handle a frame directly, as a transport would.
    pub fn on_data(&self, frame: &Frame) -> ControlFlow<()> {
        self.core.on_data(frame)
    }
}

impl Drop for SubtitleService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read the whole file and deliver it as one data frame.
fn read_file_source(mut file: File, core: &ServiceCore) {
    let session_id = core.session_id;
    let mut payload = Vec::new();

    if let Err(e) = file.read_to_end(&mut payload) {
        error!(session_id, error = %e, "Failed to read subtitle file");
        return;
    }
    debug!(session_id, len = payload.len(), "Subtitle file loaded");

    let frame = Frame {
        header: FrameHeader::new(session_id, payload_type::DATA, payload.len() as u32),
        payload,
    };
    let _ = core.on_data(&frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use subtitle_dispatch::{
        CallbackError, CallbackRegistry, DispatchConfig, DisplayRecord, EventDispatchQueue,
        EventRecord, RemoteCallback, UiCommand,
    };

    #[derive(Default)]
    struct Client(parking_lot::Mutex<Vec<String>>);

    impl RemoteCallback for Client {
        fn notify_data(&self, _: u32, record: &DisplayRecord) -> Result<(), CallbackError> {
            self.0
                .lock()
                .push(format!("display:{}", String::from_utf8_lossy(record.bytes())));
            Ok(())
        }

        fn event_notify(&self, _: u32, event: &EventRecord) -> Result<(), CallbackError> {
            let line = match event {
                EventRecord::Language { text } => format!("language:{text}"),
                EventRecord::Info { what, extra } => format!("info:{what}:{extra}"),
                other => other.kind().to_string(),
            };
            self.0.lock().push(line);
            Ok(())
        }

        fn ui_command(&self, _: u32, _: &UiCommand) -> Result<(), CallbackError> {
            Ok(())
        }
    }

    struct Fixture {
        client: Arc<Client>,
        queue: Arc<EventDispatchQueue>,
        service: SubtitleService,
    }

    fn fixture(io_type: IoType) -> Fixture {
        let registry = Arc::new(CallbackRegistry::new());
        let client = Arc::new(Client::default());
        registry.register(client.clone());
        let queue = Arc::new(
            EventDispatchQueue::start(
                registry,
                DispatchConfig {
                    idle_wait: Duration::from_millis(10),
                },
            )
            .unwrap(),
        );
        let service = SubtitleService::new(
            7,
            io_type,
            SessionNotifier::new(7, queue.clone()),
            Arc::new(crate::parser::PassthroughParserFactory),
        );
        Fixture {
            client,
            queue,
            service,
        }
    }

    fn frame(kind: u32, payload: &[u8]) -> Frame {
        Frame {
            header: FrameHeader::new(7, kind, payload.len() as u32),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_stopped_service_breaks() {
        let f = fixture(IoType::Socket);
        assert!(f.service.on_data(&frame(payload_type::DATA, b"x")).is_break());
    }

    #[test]
    fn test_control_frames() {
        let f = fixture(IoType::Socket);
        let slot = Arc::new(ListenerSlot::new());
        f.service.start(DataSource::Listener(slot.clone())).unwrap();
        assert_eq!(slot.len(), 1);

        let service = &f.service;
        let _ = service.on_data(&frame(payload_type::RENDER_TIME, &90_000u64.to_le_bytes()));
        let _ = service.on_data(&frame(payload_type::START_PTS, &1234u32.to_le_bytes()));
        let _ = service.on_data(&frame(payload_type::TYPE_STRING, b"dvb\0\0"));
        let _ = service.on_data(&frame(payload_type::SUBTITLE_TYPE, &5u32.to_le_bytes()));
        let _ = service.on_data(&frame(payload_type::LANG_STRING, b"fra"));
        let _ = service.on_data(&frame(payload_type::DATA, b"hello"));
        // Too short to carry a type, ignored
        let _ = service.on_data(&frame(payload_type::SUBTITLE_TYPE, &[1]));

        let info = service.stream_info();
        assert_eq!(info.render_time, 90_000);
        assert_eq!(info.start_pts, 1234);
        assert_eq!(info.type_string, "dvb");
        assert_eq!(info.subtitle_type, 5);
        assert_eq!(info.language, "fra");

        assert!(f.queue.wait_idle(Duration::from_secs(5)));
        assert_eq!(
            *f.client.0.lock(),
            vec![
                format!("info:{}:5", info_code::TYPE_CHANGED),
                "language:fra".to_string(),
                "display:hello".to_string(),
            ]
        );

        service.stop();
        assert!(slot.is_empty());
        assert!(!service.is_running());
    }

    #[test]
    fn test_file_source() {
        let f = fixture(IoType::File);
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"1\n00:00:01,000 --> 00:00:02,000\nhi\n").unwrap();
        std::io::Seek::rewind(&mut file).unwrap();

        f.service.start(DataSource::File(file)).unwrap();
        // Stop right after start; the document must still be delivered
        f.service.stop();
        assert!(f.queue.wait_idle(Duration::from_secs(5)));

        let seen = f.client.0.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("display:1\n"));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let f = fixture(IoType::Socket);
        f.service
            .start(DataSource::Listener(Arc::new(ListenerSlot::new())))
            .unwrap();
        f.service.stop();
        f.service.stop();
        assert!(f.service.on_data(&frame(payload_type::DATA, b"late")).is_break());
    }
}

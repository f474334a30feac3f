//! Shared-memory queue front end.
//!
//! A single background thread polls a [`ByteSource`] and moves whatever it
//! offers into a local [`FrameAssembler`]. Frames are only extracted while a
//! listener is active; without one, bytes keep draining into the local ring
//! (up to its capacity) so the upstream queue does not overflow.
//!
//! Frames on this transport must carry both sync words
//! ([`SyncPolicy::StartAndMagic`]).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use subtitle_stream::{payload_type, FrameAssembler, SyncPolicy};
use tracing::{debug, error, info};

use crate::error::TransportResult;
use crate::listener::ListenerSlot;

/// A readable byte queue, typically backed by shared memory.
pub trait ByteSource: Send {
    /// Bytes ready to be read without blocking.
    fn available_size(&self) -> usize;

    /// Copy up to `dst.len()` bytes out. Returns the number copied.
    fn read(&mut self, dst: &mut [u8]) -> usize;
}

#[cfg(unix)]
impl ByteSource for subtitle_stream::SharedQueueReader {
    fn available_size(&self) -> usize {
        subtitle_stream::SharedQueueReader::available_size(self)
    }

    fn read(&mut self, dst: &mut [u8]) -> usize {
        subtitle_stream::SharedQueueReader::read(self, dst)
    }
}

/// FMQ transport configuration.
#[derive(Debug, Clone)]
pub struct FmqConfig {
    /// Local ring buffer size
    pub ring_capacity: usize,
    /// Sleep when the source is empty
    pub poll_interval: Duration,
}

impl Default for FmqConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 512 * 1024,
            poll_interval: Duration::from_millis(5),
        }
    }
}

struct Shared {
    listeners: Arc<ListenerSlot>,
    exit: AtomicBool,
    frames_delivered: AtomicU64,
}

/// Poller thread feeding frames from a [`ByteSource`] to a [`ListenerSlot`].
pub struct FmqTransport {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FmqTransport {
    /// Start polling `source`.
    pub fn spawn(source: Box<dyn ByteSource>, config: FmqConfig) -> TransportResult<Self> {
        let assembler = FrameAssembler::new(config.ring_capacity, SyncPolicy::StartAndMagic)?;
        let shared = Arc::new(Shared {
            listeners: Arc::new(ListenerSlot::new()),
            exit: AtomicBool::new(false),
            frames_delivered: AtomicU64::new(0),
        });

        let poll_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("subtitle-fmq".into())
            .spawn(move || poll_loop(source, assembler, config, poll_shared))?;

        info!("FMQ transport started");

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Registration point for consumers of this transport.
    pub fn listeners(&self) -> Arc<ListenerSlot> {
        self.shared.listeners.clone()
    }

    /// Frames handed to listeners so far.
    pub fn frames_delivered(&self) -> u64 {
        self.shared.frames_delivered.load(Ordering::Acquire)
    }

    /// Stop the poller and join it.
    pub fn shutdown(&self) {
        if self.shared.exit.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("FMQ poller panicked");
            }
        }
        info!("FMQ transport stopped");
    }
}

impl Drop for FmqTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop(
    mut source: Box<dyn ByteSource>,
    mut assembler: FrameAssembler,
    config: FmqConfig,
    shared: Arc<Shared>,
) {
    let mut scratch = vec![0u8; config.ring_capacity];

    while !shared.exit.load(Ordering::Acquire) {
        let moved = pump(source.as_mut(), &mut assembler, &mut scratch);
        let delivered = deliver(&mut assembler, &shared);

        if moved == 0 && delivered == 0 {
            thread::sleep(config.poll_interval);
        }
    }
    debug!(buffered = assembler.buffered(), "FMQ poll loop exited");
}

/// Move as many source bytes as the local ring can take.
fn pump(source: &mut dyn ByteSource, assembler: &mut FrameAssembler, scratch: &mut [u8]) -> usize {
    let want = source
        .available_size()
        .min(assembler.write_avail())
        .min(scratch.len());
    if want == 0 {
        return 0;
    }

    let got = source.read(&mut scratch[..want]);
    assembler.feed(&scratch[..got])
}

/// Hand buffered frames to the active listener. Returns frames delivered.
fn deliver(assembler: &mut FrameAssembler, shared: &Shared) -> usize {
    let mut delivered = 0;

    while let Some((id, listener)) = shared.listeners.active_entry() {
        let Some(frame) = assembler.next_frame() else {
            break;
        };

        if frame.is_exit() {
            debug!("Ignoring exit frame on FMQ transport");
            continue;
        }

        delivered += 1;
        shared.frames_delivered.fetch_add(1, Ordering::AcqRel);

        if listener.on_data(&frame).is_break() {
            info!(
                payload_type = %payload_type::name(frame.payload_type()),
                "Listener stopped, removing from FMQ transport"
            );
            shared.listeners.unregister(id);
        }
    }

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::DataListener;
    use std::collections::VecDeque;
    use std::ops::ControlFlow;
    use std::time::Instant;
    use subtitle_stream::{encode_frame, Frame};

    /// In-memory source shared with the test body.
    #[derive(Clone, Default)]
    struct MemorySource(Arc<Mutex<VecDeque<u8>>>);

    impl MemorySource {
        fn push(&self, bytes: &[u8]) {
            self.0.lock().extend(bytes.iter().copied());
        }

        fn pending(&self) -> usize {
            self.0.lock().len()
        }
    }

    impl ByteSource for MemorySource {
        fn available_size(&self) -> usize {
            self.0.lock().len()
        }

        fn read(&mut self, dst: &mut [u8]) -> usize {
            let mut queue = self.0.lock();
            let n = dst.len().min(queue.len());
            for (slot, byte) in dst.iter_mut().zip(queue.drain(..n)) {
                *slot = byte;
            }
            n
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Frame>>);

    impl DataListener for Recorder {
        fn on_data(&self, frame: &Frame) -> ControlFlow<()> {
            self.0.lock().push(frame.clone());
            ControlFlow::Continue(())
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn config() -> FmqConfig {
        FmqConfig {
            ring_capacity: 4096,
            poll_interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_delivers_to_active_listener() {
        let source = MemorySource::default();
        let transport = FmqTransport::spawn(Box::new(source.clone()), config()).unwrap();
        let recorder = Arc::new(Recorder::default());
        transport.listeners().register(recorder.clone());

        source.push(&encode_frame(2, payload_type::DATA, b"first"));
        source.push(&encode_frame(2, payload_type::DATA, b"second"));

        assert!(wait_until(|| recorder.0.lock().len() == 2));
        let frames = recorder.0.lock();
        assert_eq!(frames[0].payload, b"first");
        assert_eq!(frames[1].payload, b"second");
    }

    #[test]
    fn test_drains_source_without_listener() {
        let source = MemorySource::default();
        let transport = FmqTransport::spawn(Box::new(source.clone()), config()).unwrap();

        source.push(&encode_frame(2, payload_type::DATA, b"held"));
        assert!(wait_until(|| source.pending() == 0));
        assert_eq!(transport.frames_delivered(), 0);

        // Frames held in the local ring reach a late listener
        let recorder = Arc::new(Recorder::default());
        transport.listeners().register(recorder.clone());
        assert!(wait_until(|| recorder.0.lock().len() == 1));
        assert_eq!(recorder.0.lock()[0].payload, b"held");
    }

    #[test]
    fn test_requires_magic_word() {
        let source = MemorySource::default();
        let transport = FmqTransport::spawn(Box::new(source.clone()), config()).unwrap();
        let recorder = Arc::new(Recorder::default());
        transport.listeners().register(recorder.clone());

        let mut bad = encode_frame(2, payload_type::DATA, b"nomagic!");
        bad[8..12].copy_from_slice(&[0, 0, 0, 0]);
        source.push(&bad);
        source.push(&encode_frame(2, payload_type::DATA, b"ok"));

        assert!(wait_until(|| !recorder.0.lock().is_empty()));
        thread::sleep(Duration::from_millis(20));
        let frames = recorder.0.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"ok");
    }

    #[test]
    fn test_shutdown_joins() {
        let transport = FmqTransport::spawn(Box::new(MemorySource::default()), config()).unwrap();
        transport.shutdown();
        transport.shutdown();
    }
}

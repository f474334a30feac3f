//! Integration tests for subtitle-transport.
//!
//! These tests drive the transports the way a producer process would: real
//! TCP connections for the socket server and a real shared-memory queue for
//! the FMQ poller.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use subtitle_stream::{encode_frame, payload_type, Frame};
use subtitle_transport::{DataListener, SocketConfig, SocketTransport};

/// Records every frame it receives.
#[derive(Default)]
struct Recorder {
    frames: Mutex<Vec<Frame>>,
}

impl Recorder {
    fn count(&self) -> usize {
        self.frames.lock().len()
    }

    fn payloads(&self) -> Vec<Vec<u8>> {
        self.frames.lock().iter().map(|f| f.payload.clone()).collect()
    }
}

impl DataListener for Recorder {
    fn on_data(&self, frame: &Frame) -> ControlFlow<()> {
        self.frames.lock().push(frame.clone());
        ControlFlow::Continue(())
    }
}

/// Answers `Break` after `limit` frames.
struct StopAfter {
    seen: AtomicUsize,
    limit: usize,
}

impl DataListener for StopAfter {
    fn on_data(&self, _frame: &Frame) -> ControlFlow<()> {
        let seen = self.seen.fetch_add(1, Ordering::AcqRel) + 1;
        if seen >= self.limit {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
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

fn socket_transport() -> SocketTransport {
    SocketTransport::bind(SocketConfig {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        ring_capacity: 64 * 1024,
        listener_wait: Duration::from_millis(20),
        ..Default::default()
    })
    .unwrap()
}

fn connect(transport: &SocketTransport) -> TcpStream {
    let stream = TcpStream::connect(transport.local_addr()).unwrap();
    stream.set_nodelay(true).unwrap();
    stream
}

#[test]
fn test_frame_split_mid_header() {
    let transport = socket_transport();
    let recorder = Arc::new(Recorder::default());
    transport.listeners().register(recorder.clone());

    let bytes = encode_frame(3, payload_type::DATA, b"split across writes");
    let mut stream = connect(&transport);

    stream.write_all(&bytes[..7]).unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.count(), 0);

    stream.write_all(&bytes[7..]).unwrap();
    assert!(wait_until(|| recorder.count() == 1));
    assert_eq!(recorder.payloads()[0], b"split across writes");
    assert_eq!(recorder.frames.lock()[0].session_id(), 3);
}

#[test]
fn test_garbage_before_frame_is_skipped() {
    let transport = socket_transport();
    let recorder = Arc::new(Recorder::default());
    transport.listeners().register(recorder.clone());

    let mut stream = connect(&transport);
    stream.write_all(&[0xAB; 12]).unwrap();
    stream
        .write_all(&encode_frame(1, payload_type::DATA, b"after noise"))
        .unwrap();

    assert!(wait_until(|| recorder.count() == 1));
    assert_eq!(recorder.payloads()[0], b"after noise");
}

#[test]
fn test_only_front_listener_receives() {
    let transport = socket_transport();
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    let slot = transport.listeners();
    let first_id = slot.register(first.clone());
    slot.register(second.clone());

    let mut stream = connect(&transport);
    stream
        .write_all(&encode_frame(1, payload_type::DATA, b"one"))
        .unwrap();
    assert!(wait_until(|| first.count() == 1));
    assert_eq!(second.count(), 0);

    slot.unregister(first_id);
    stream
        .write_all(&encode_frame(1, payload_type::DATA, b"two"))
        .unwrap();
    assert!(wait_until(|| second.count() == 1));
    assert_eq!(first.count(), 1);
    assert_eq!(second.payloads()[0], b"two");
}

#[test]
fn test_frames_held_until_listener_registers() {
    let transport = socket_transport();
    let mut stream = connect(&transport);
    stream
        .write_all(&encode_frame(1, payload_type::LANG_STRING, b"eng"))
        .unwrap();
    stream
        .write_all(&encode_frame(1, payload_type::DATA, b"held"))
        .unwrap();
    thread::sleep(Duration::from_millis(50));

    let recorder = Arc::new(Recorder::default());
    transport.listeners().register(recorder.clone());

    assert!(wait_until(|| recorder.count() == 2));
    assert_eq!(recorder.payloads(), vec![b"eng".to_vec(), b"held".to_vec()]);
}

#[test]
fn test_exit_frame_closes_connection() {
    let transport = socket_transport();
    let recorder = Arc::new(Recorder::default());
    transport.listeners().register(recorder.clone());

    let mut stream = connect(&transport);
    assert!(wait_until(|| transport.connection_count() == 1));

    stream
        .write_all(&encode_frame(1, payload_type::EXIT, &[]))
        .unwrap();
    assert!(wait_until(|| transport.connection_count() == 0));
    assert_eq!(recorder.count(), 0);
}

#[test]
fn test_listener_break_closes_connection() {
    let transport = socket_transport();
    let stopper = Arc::new(StopAfter {
        seen: AtomicUsize::new(0),
        limit: 1,
    });
    transport.listeners().register(stopper.clone());

    let mut stream = connect(&transport);
    stream
        .write_all(&encode_frame(1, payload_type::DATA, b"bye"))
        .unwrap();
    assert!(wait_until(|| stopper.seen.load(Ordering::Acquire) == 1));
    assert!(wait_until(|| transport.connection_count() == 0));
}

#[test]
fn test_connections_share_active_listener() {
    let transport = socket_transport();
    let recorder = Arc::new(Recorder::default());
    transport.listeners().register(recorder.clone());

    let mut a = connect(&transport);
    let mut b = connect(&transport);
    a.write_all(&encode_frame(1, payload_type::DATA, b"a")).unwrap();
    b.write_all(&encode_frame(2, payload_type::DATA, b"b")).unwrap();

    assert!(wait_until(|| recorder.count() == 2));
    let mut sessions: Vec<u32> = recorder
        .frames
        .lock()
        .iter()
        .map(Frame::session_id)
        .collect();
    sessions.sort_unstable();
    assert_eq!(sessions, vec![1, 2]);
}

#[cfg(unix)]
mod fmq {
    use super::*;
    use subtitle_stream::{SharedQueueReader, SharedQueueWriter};
    use subtitle_transport::{FmqConfig, FmqTransport};

    fn fmq_config() -> FmqConfig {
        FmqConfig {
            ring_capacity: 16 * 1024,
            poll_interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_frames_over_shared_queue() {
        let reader = SharedQueueReader::create(8 * 1024).unwrap();
        let mut writer = SharedQueueWriter::open(&reader.descriptor()).unwrap();
        let transport = FmqTransport::spawn(Box::new(reader), fmq_config()).unwrap();

        let recorder = Arc::new(Recorder::default());
        transport.listeners().register(recorder.clone());

        for i in 0..20u32 {
            writer
                .write_all(&encode_frame(9, payload_type::DATA, &i.to_le_bytes()))
                .unwrap();
        }

        assert!(wait_until(|| recorder.count() == 20));
        for (i, frame) in recorder.frames.lock().iter().enumerate() {
            assert_eq!(frame.payload_u32(), Some(i as u32));
        }
    }

    #[test]
    fn test_exit_frame_ignored() {
        let reader = SharedQueueReader::create(4096).unwrap();
        let mut writer = SharedQueueWriter::open(&reader.descriptor()).unwrap();
        let transport = FmqTransport::spawn(Box::new(reader), fmq_config()).unwrap();

        let recorder = Arc::new(Recorder::default());
        transport.listeners().register(recorder.clone());

        writer
            .write_all(&encode_frame(9, payload_type::EXIT, &[]))
            .unwrap();
        writer
            .write_all(&encode_frame(9, payload_type::DATA, b"still open"))
            .unwrap();

        assert!(wait_until(|| recorder.count() == 1));
        assert_eq!(recorder.payloads()[0], b"still open");
    }

    #[test]
    fn test_break_unregisters_listener() {
        let reader = SharedQueueReader::create(4096).unwrap();
        let mut writer = SharedQueueWriter::open(&reader.descriptor()).unwrap();
        let transport = FmqTransport::spawn(Box::new(reader), fmq_config()).unwrap();

        let stopper = Arc::new(StopAfter {
            seen: AtomicUsize::new(0),
            limit: 1,
        });
        let next = Arc::new(Recorder::default());
        let slot = transport.listeners();
        slot.register(stopper.clone());
        slot.register(next.clone());

        writer
            .write_all(&encode_frame(9, payload_type::DATA, b"first"))
            .unwrap();
        writer
            .write_all(&encode_frame(9, payload_type::DATA, b"second"))
            .unwrap();

        assert!(wait_until(|| next.count() == 1));
        assert_eq!(stopper.seen.load(Ordering::Acquire), 1);
        assert_eq!(next.payloads()[0], b"second");
        assert_eq!(slot.len(), 1);
    }
}

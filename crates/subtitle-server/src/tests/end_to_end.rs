//! Producers through to remote clients.

use std::io::Write;
use std::net::TcpStream;

use subtitle_dispatch::info as info_code;
use subtitle_stream::{encode_frame, payload_type, SharedQueueWriter};

use super::harness::{router, settle, wait_until, Delivery, RecordingClient};
use crate::IoType;

#[test]
fn test_socket_producer_to_client() {
    let router = router();
    let client = RecordingClient::new();
    router.register_callback(client.clone());

    let id = router.open_connection();
    router.open(id, None, IoType::Socket, 0).unwrap();

    let mut producer = TcpStream::connect(router.socket_addr()).unwrap();
    let mut bytes = Vec::new();
    bytes.extend(encode_frame(id, payload_type::SUBTITLE_TYPE, &4u32.to_le_bytes()));
    bytes.extend(encode_frame(id, payload_type::LANG_STRING, b"eng\0"));
    bytes.extend(encode_frame(id, payload_type::RENDER_TIME, &3000u64.to_le_bytes()));
    bytes.extend(encode_frame(id, payload_type::DATA, b"bitmap"));
    // Split the stream at an awkward point
    producer.write_all(&bytes[..27]).unwrap();
    producer.flush().unwrap();
    producer.write_all(&bytes[27..]).unwrap();

    assert!(wait_until(|| client.deliveries().len() == 3));
    settle(&router);

    assert_eq!(
        client.deliveries(),
        vec![
            Delivery::Event {
                session_id: id,
                record: format!("info:{}:4", info_code::TYPE_CHANGED)
            },
            Delivery::Event {
                session_id: id,
                record: "language:eng".to_string()
            },
            Delivery::Display {
                session_id: id,
                bytes: b"bitmap".to_vec()
            },
        ]
    );
}

#[test]
fn test_closed_session_stops_receiving() {
    let router = router();
    let client = RecordingClient::new();
    router.register_callback(client.clone());

    let id = router.open_connection();
    router.open(id, None, IoType::Socket, 0).unwrap();
    let mut producer = TcpStream::connect(router.socket_addr()).unwrap();
    producer
        .write_all(&encode_frame(id, payload_type::DATA, b"before"))
        .unwrap();
    assert!(wait_until(|| client.displays().len() == 1));

    router.close(id).unwrap();

    // The next session to open takes over the socket
    let next = router.open_connection();
    router.open(next, None, IoType::Socket, 0).unwrap();
    let mut producer = TcpStream::connect(router.socket_addr()).unwrap();
    producer
        .write_all(&encode_frame(next, payload_type::DATA, b"after"))
        .unwrap();
    assert!(wait_until(|| client.displays().len() == 2));
    settle(&router);

    let sessions: Vec<u32> = client
        .deliveries()
        .iter()
        .map(|d| match d {
            Delivery::Display { session_id, .. } => *session_id,
            other => panic!("unexpected delivery {other:?}"),
        })
        .collect();
    assert_eq!(sessions, vec![id, next]);
}

#[test]
fn test_fmq_producer_to_client() {
    let router = router();
    let client = RecordingClient::new();
    router.register_callback(client.clone());

    let id = router.open_connection();
    let descriptor = router.prepare_writing_queue(id, 8192).unwrap();
    router.open(id, None, IoType::Fmq, 0).unwrap();

    let mut writer = SharedQueueWriter::open(&descriptor).unwrap();
    for chunk in [b"alpha".as_slice(), b"beta", b"gamma"] {
        writer
            .write_all(&encode_frame(id, payload_type::DATA, chunk))
            .unwrap();
    }

    assert!(wait_until(|| client.displays().len() == 3));
    assert_eq!(
        client.displays(),
        vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]
    );
}

#[test]
fn test_file_source_to_client() {
    let router = router();
    let client = RecordingClient::new();
    router.register_callback(client.clone());

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(b"WEBVTT\n\n00:01.000 --> 00:02.000\nhello\n")
        .unwrap();
    std::io::Seek::rewind(&mut file).unwrap();

    let id = router.open_connection();
    router.open(id, Some(file), IoType::File, 0).unwrap();

    assert!(wait_until(|| client.displays().len() == 1));
    assert!(client.displays()[0].starts_with(b"WEBVTT"));
}

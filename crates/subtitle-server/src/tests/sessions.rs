//! Session lifecycle and error cases.

use super::harness::{router, settle, RecordingClient};
use crate::{IoType, ServerError, SESSION_ID_MIN};
use subtitle_dispatch::UiCommand;

#[test]
fn test_ids_start_at_minimum_and_increase() {
    let router = router();
    let a = router.open_connection();
    let b = router.open_connection();
    assert_eq!(a, SESSION_ID_MIN);
    assert_eq!(b, a + 1);
    assert_eq!(router.session_count(), 2);
}

#[test]
fn test_unknown_session_errors() {
    let router = router();
    assert!(matches!(
        router.open(99, None, IoType::Socket, 0),
        Err(ServerError::NotFound(99))
    ));
    assert!(matches!(router.close(99), Err(ServerError::NotFound(99))));
    assert!(matches!(
        router.reset_for_seek(99),
        Err(ServerError::NotFound(99))
    ));
    assert!(matches!(
        router.close_connection(99),
        Err(ServerError::NotFound(99))
    ));
    assert!(matches!(
        router.prepare_writing_queue(99, 1024),
        Err(ServerError::NotFound(99))
    ));
    assert!(matches!(router.show(99), Err(ServerError::NotFound(99))));
}

#[test]
fn test_close_and_seek_need_open_service() {
    let router = router();
    let id = router.open_connection();

    assert!(matches!(router.close(id), Err(ServerError::AlreadyClosed(_))));
    assert!(matches!(router.reset_for_seek(id), Err(ServerError::NotOpen(_))));

    router.open(id, None, IoType::Socket, 0).unwrap();
    assert!(router.is_open(id));
    router.reset_for_seek(id).unwrap();
    router.close(id).unwrap();
    assert!(!router.is_open(id));
    assert!(matches!(router.close(id), Err(ServerError::AlreadyClosed(_))));
}

#[test]
fn test_fmq_open_requires_prepared_queue() {
    let router = router();
    let id = router.open_connection();

    assert!(matches!(
        router.open(id, None, IoType::Fmq, 0),
        Err(ServerError::QueueNotPrepared(_))
    ));
    assert!(!router.is_open(id));

    let descriptor = router.prepare_writing_queue(id, 4096).unwrap();
    assert_eq!(descriptor.capacity, 4096);
    assert!(router.has_queue(id));
    router.open(id, None, IoType::Fmq, 0).unwrap();
    assert!(router.is_open(id));
}

#[test]
fn test_file_open_requires_file() {
    let router = router();
    let id = router.open_connection();
    assert!(matches!(
        router.open(id, None, IoType::File, 0),
        Err(ServerError::MissingFile(_))
    ));
}

#[test]
fn test_reopen_keeps_queue() {
    let router = router();
    let id = router.open_connection();
    router.prepare_writing_queue(id, 4096).unwrap();

    router.open(id, None, IoType::Fmq, 1).unwrap();
    router.open(id, None, IoType::Fmq, 1).unwrap();
    assert!(router.is_open(id));
    assert!(router.has_queue(id));
}

#[test]
fn test_close_connection_hides_fallback() {
    let router = router();
    let fallback = RecordingClient::new();
    router.set_fallback_callback(Some(fallback.clone()));

    let id = router.open_connection();
    router.open(id, None, IoType::Socket, 0).unwrap();
    router.close_connection(id).unwrap();
    settle(&router);

    assert_eq!(fallback.ui_commands(), vec![UiCommand::Hide]);
    assert_eq!(router.session_count(), 0);
    assert!(matches!(
        router.close_connection(id),
        Err(ServerError::NotFound(_))
    ));
}

#[test]
fn test_ui_surface_reaches_fallback_only() {
    let router = router();
    let fallback = RecordingClient::new();
    let client = RecordingClient::new();
    router.set_fallback_callback(Some(fallback.clone()));
    router.register_callback(client.clone());

    let id = router.open_connection();
    router.show(id).unwrap();
    router.set_text_color(id, 0xFFFF_FFFF).unwrap();
    router.set_text_size(id, 32).unwrap();
    router.set_gravity(id, 17).unwrap();
    router.set_text_style(id, 1).unwrap();
    router.set_position(id, 0, 40).unwrap();
    router.set_image_ratio(id, 1.5, 1.5, 1920, 1080).unwrap();
    router.set_surface_rect(id, 0, 0, 1920, 1080).unwrap();
    router.hide(id).unwrap();
    settle(&router);

    assert_eq!(
        fallback.ui_commands(),
        vec![
            UiCommand::Show,
            UiCommand::SetTextColor(0xFFFF_FFFF),
            UiCommand::SetTextSize(32),
            UiCommand::SetGravity(17),
            UiCommand::SetTextStyle(1),
            UiCommand::SetPosition { x: 0, y: 40 },
            UiCommand::SetImageRatio {
                ratio_w: 1.5,
                ratio_h: 1.5,
                max_w: 1920,
                max_h: 1080
            },
            UiCommand::SetSurfaceRect {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080
            },
            UiCommand::Hide,
        ]
    );
    assert!(client.deliveries().is_empty());
}

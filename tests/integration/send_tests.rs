//! Host → device traffic through a live session.

use std::sync::Arc;

use serde_json::json;

use serial_events::{LinkConfig, Session};

use super::test_helpers::{loopback, open_session};

#[tokio::test]
async fn send_event_writes_event_frame() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;

    session.send_event("blink").await.unwrap();

    assert_eq!(device.read_line().await.as_deref(), Some("[\"_e\",\"blink\"]\n"));
}

#[tokio::test]
async fn send_data_coerces_numeric_strings() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;

    session
        .send_data(json!({"speed": "12", "mode": "fast", "gains": ["0.5", " 3 "]}))
        .await
        .unwrap();

    assert_eq!(
        device.read_json().await,
        json!(["_d", {"speed": 12, "mode": "fast", "gains": [0.5, 3]}])
    );
}

#[tokio::test]
async fn coercion_can_be_disabled() {
    let config = LinkConfig {
        parse_strings_as_numbers: false,
        ..LinkConfig::default()
    };
    let (session, mut device, _transport) = open_session(config).await;

    session.send_data("12").await.unwrap();

    assert_eq!(device.read_json().await, json!(["_d", "12"]));
}

#[tokio::test]
async fn send_without_data_sends_name_as_raw_data() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;

    session.send("12", None).await.unwrap();
    session.send("hello", None).await.unwrap();

    assert_eq!(device.read_json().await, json!(["_d", 12]));
    assert_eq!(device.read_json().await, json!(["_d", "hello"]));
}

#[tokio::test]
async fn send_with_data_uses_event_name() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;

    session
        .send("led", Some(json!({"pin": "13", "on": true})))
        .await
        .unwrap();

    assert_eq!(
        device.read_json().await,
        json!(["led", {"pin": 13, "on": true}])
    );
}

#[tokio::test]
async fn configured_terminator_ends_each_frame() {
    let config = LinkConfig {
        new_line_character: "\r\n".into(),
        ..LinkConfig::default()
    };
    let (session, mut device, _transport) = open_session(config).await;

    session.send_event("a").await.unwrap();
    session.send_event("b").await.unwrap();

    assert_eq!(device.read_line().await.as_deref(), Some("[\"_e\",\"a\"]\r\n"));
    assert_eq!(device.read_line().await.as_deref(), Some("[\"_e\",\"b\"]\r\n"));
}

#[tokio::test]
async fn sends_are_ordered() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;

    for i in 0..20 {
        session.send_data(i).await.unwrap();
    }

    for i in 0..20 {
        assert_eq!(device.read_json().await, json!(["_d", i]));
    }
}

#[tokio::test]
async fn send_before_open_is_a_no_op() {
    let (transport, _device) = loopback();
    let session = Session::new(LinkConfig::default(), transport).unwrap();

    session.send_event("early").await.unwrap();
    session.send_data(1).await.unwrap();
    session.send("early", None).await.unwrap();
}

#[tokio::test]
async fn send_after_close_is_a_no_op() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;
    session.close().await;

    session.send_event("late").await.unwrap();

    assert_eq!(device.read_line().await, None);
}

#[tokio::test]
async fn concurrent_senders_never_interleave_frames() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;
    let session = Arc::new(session);

    let mut handles = Vec::new();
    for worker in 0..4 {
        let session = Arc::clone(&session);
        handles.push(tokio::spawn(async move {
            for i in 0..10 {
                session
                    .send(&format!("w{worker}"), Some(json!(i)))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for _ in 0..40 {
        let frame = device.read_json().await;
        let name = frame[0].as_str().unwrap();
        assert!(name.starts_with('w'), "unexpected frame {frame}");
        assert!(frame[1].is_u64());
    }
}

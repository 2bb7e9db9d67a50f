//! Device → host traffic through a live session.

use serde_json::{json, Value};

use serial_events::diagnostics::LinkDiagnostic;
use serial_events::LinkConfig;

use super::test_helpers::{collect, next, open_session, WAIT};

#[tokio::test]
async fn data_channel_reaches_data_listeners() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;
    let mut data = collect(&session, "data");

    device.write("[\"_d\",{\"temp\":21.5}]\r\n").await;

    assert_eq!(next(&mut data).await, json!({"temp": 21.5}));
}

#[tokio::test]
async fn line_split_across_writes_is_reassembled() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;
    let mut reading = collect(&session, "reading");

    device.write("[\"read").await;
    device.write("ing\",[1,2").await;
    device.write(",3]]\r").await;
    device.write("\n[\"reading\",4]\r\n").await;

    assert_eq!(next(&mut reading).await, json!([1, 2, 3]));
    assert_eq!(next(&mut reading).await, json!(4));
}

#[tokio::test]
async fn bare_string_dispatches_with_null_payload() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;
    let mut pressed = collect(&session, "button");

    device.write("\"button\"\r\n").await;

    assert_eq!(next(&mut pressed).await, Value::Null);
}

#[tokio::test]
async fn malformed_lines_are_skipped() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;
    let mut data = collect(&session, "data");

    device
        .write("garbage\r\n[1,2]\r\n{\"_d\":1}\r\n[\"_d\",\r\n[\"_d\",\"ok\"]\r\n")
        .await;

    assert_eq!(next(&mut data).await, json!("ok"));
    assert!(data.try_recv().is_err());
    assert!(session.readable());
}

#[tokio::test]
async fn device_log_channels_are_not_dispatched() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;
    let mut warnings = collect(&session, "_w");
    let mut logs = collect(&session, "_l");
    let mut errors = collect(&session, "_e");
    let mut data = collect(&session, "data");

    device
        .write("[\"_w\",\"low battery\"]\r\n[\"_l\",\"boot\"]\r\n[\"_e\",\"fault\"]\r\n[\"_d\",1]\r\n")
        .await;

    // Lines are dispatched in order, so once data arrives the log lines
    // before it have been handled.
    assert_eq!(next(&mut data).await, json!(1));
    assert!(warnings.try_recv().is_err());
    assert!(logs.try_recv().is_err());
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn trailing_fragment_is_flushed_at_end_of_stream() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;
    let mut data = collect(&session, "data");
    let mut done = collect(&session, "done");

    device.write("[\"_d\",1]\r\n\"done\"").await;
    assert_eq!(next(&mut data).await, json!(1));

    device.hang_up().await;

    assert_eq!(next(&mut done).await, Value::Null);
}

#[tokio::test]
async fn panicking_listener_does_not_stop_the_loop() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;
    let mut diagnostics = session.subscribe_diagnostics();
    session.on("boom", |_| panic!("listener failure"));
    let mut data = collect(&session, "data");

    device.write("[\"boom\",1]\r\n[\"_d\",2]\r\n").await;

    assert_eq!(next(&mut data).await, json!(2));
    let diagnostic = tokio::time::timeout(WAIT, diagnostics.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        diagnostic,
        LinkDiagnostic::ListenerPanicked {
            event: "boom".into()
        }
    );
    assert!(session.readable());
}

#[tokio::test]
async fn oversized_line_is_discarded_and_reported() {
    let config = LinkConfig {
        max_line_bytes: 16,
        ..LinkConfig::default()
    };
    let (session, mut device, _transport) = open_session(config).await;
    let mut diagnostics = session.subscribe_diagnostics();
    let mut data = collect(&session, "data");

    device
        .write(&format!("[\"_d\",\"{}\"]\r\n[\"_d\",7]\r\n", "x".repeat(64)))
        .await;

    assert_eq!(next(&mut data).await, json!(7));
    let diagnostic = tokio::time::timeout(WAIT, diagnostics.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(
        matches!(diagnostic, LinkDiagnostic::LineOverflow { discarded } if discarded > 16),
        "got {diagnostic:?}"
    );
    assert!(data.try_recv().is_err());
}

#[tokio::test]
async fn numeric_looking_strings_arrive_unchanged() {
    let (session, mut device, _transport) = open_session(LinkConfig::default()).await;
    let mut data = collect(&session, "data");

    device.write("[\"_d\",\"42\"]\r\n").await;

    assert_eq!(next(&mut data).await, json!("42"));
}

#[tokio::test]
async fn oversized_line_split_across_writes_dispatches_nothing() {
    let config = LinkConfig {
        max_line_bytes: 16,
        ..LinkConfig::default()
    };
    let (session, mut device, _transport) = open_session(config).await;
    let mut tail = collect(&session, "evt");
    let mut data = collect(&session, "data");

    device.write(&"A".repeat(20)).await;
    device.write("\"evt\"\r\n[\"_d\",7]\r\n").await;

    assert_eq!(next(&mut data).await, json!(7));
    assert!(tail.try_recv().is_err());
}

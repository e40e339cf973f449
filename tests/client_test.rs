//! Client session surface: predict, component_server, event streams.

mod common;

use common::*;
use futures_util::StreamExt;
use queueflow::client::config::Protocol;
use queueflow::submit::{Event, EventKind};
use queueflow::upload::InputValue;
use queueflow::{Client, QueueflowError, Stage};
use serde_json::json;
use std::sync::Arc;

/// predict drives a submission to completion and returns the final data.
#[tokio::test]
async fn test_predict_returns_final_data() {
    let mut config = app_config(Protocol::SseV1);
    config.dependencies[0].queue = Some(false);

    let http = MockHttp::new();
    http.respond("/run/predict", 200, json!({"data": [42]}));

    let client = Client::builder(config)
        .api(api_info())
        .http(http)
        .sse_factory(MockSse::new())
        .ws_factory(MockWs::new())
        .build()
        .unwrap();

    let result = client
        .predict("/predict", vec![InputValue::Data(json!(41))])
        .await
        .unwrap();
    assert_eq!(result, json!([42]));
}

/// predict surfaces a terminal error status as a server error.
#[tokio::test]
async fn test_predict_surfaces_error() {
    let mut config = app_config(Protocol::SseV1);
    config.dependencies[0].queue = Some(false);

    let http = MockHttp::new();
    http.respond("/run/predict", 500, json!({"error": "out of memory"}));

    let client = Client::builder(config)
        .api(api_info())
        .http(http)
        .sse_factory(MockSse::new())
        .ws_factory(MockWs::new())
        .build()
        .unwrap();

    let err = client
        .predict("/predict", vec![InputValue::Data(json!(1))])
        .await
        .unwrap_err();
    match err {
        QueueflowError::Server(message) => assert_eq!(message, "out of memory"),
        other => panic!("unexpected error: {other:?}"),
    }
}

/// predict works across the multiplexed queue, streaming included.
#[tokio::test]
async fn test_predict_over_mux() {
    let http = MockHttp::new();
    http.respond("/queue/join", 200, json!({"event_id": "E1"}));
    let sse = MockSse::new();
    let stream = sse.expect("/queue/data");

    let client = Client::builder(app_config(Protocol::SseV1))
        .api(api_info())
        .http(http)
        .sse_factory(sse)
        .ws_factory(MockWs::new())
        .build()
        .unwrap();

    let prediction = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .predict("/gen", vec![InputValue::Data(json!("hi"))])
                .await
        }
    });
    settle().await;

    stream.frame(json!({
        "msg": "process_generating", "event_id": "E1",
        "success": true, "output": {"data": ["partial"]}
    }));
    stream.frame(json!({
        "msg": "process_completed", "event_id": "E1",
        "success": true, "output": {"data": ["final"]}
    }));
    settle().await;

    let result = prediction.await.unwrap().unwrap();
    assert_eq!(result, json!(["final"]));
}

/// The event stream sees events in emission order.
#[tokio::test]
async fn test_event_stream_order() {
    let http = MockHttp::new();
    http.respond("/queue/join", 200, json!({"event_id": "E1"}));
    let sse = MockSse::new();
    let stream = sse.expect("/queue/data");

    let client = Client::builder(app_config(Protocol::SseV1))
        .api(api_info())
        .http(http)
        .sse_factory(sse)
        .ws_factory(MockWs::new())
        .build()
        .unwrap();

    let submission = client
        .submit("/gen", vec![InputValue::Data(json!("hi"))])
        .unwrap();
    let mut events = submission.event_stream();
    settle().await;

    stream.frame(json!({
        "msg": "process_completed", "event_id": "E1",
        "success": true, "output": {"data": ["out"]}
    }));
    settle().await;

    let mut seen = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(std::time::Duration::from_millis(10), events.next()).await
    {
        seen.push(event);
        if matches!(seen.last(), Some(Event::Status(s)) if s.stage.is_terminal()) {
            break;
        }
    }
    assert_eq!(
        describe_all(&seen),
        vec!["status:Pending", "data:[\"out\"]", "status:Complete"]
    );
}

/// Listeners can be detached by identity while others keep firing.
#[tokio::test]
async fn test_off_detaches_single_listener() {
    let mut config = app_config(Protocol::SseV1);
    config.dependencies[0].queue = Some(false);

    let http = MockHttp::new();
    http.respond("/run/predict", 200, json!({"data": [1]}));

    let client = Client::builder(config)
        .api(api_info())
        .http(http)
        .sse_factory(MockSse::new())
        .ws_factory(MockWs::new())
        .build()
        .unwrap();

    let submission = client
        .submit("/predict", vec![InputValue::Data(json!(0))])
        .unwrap();

    let kept = Arc::new(parking_lot::Mutex::new(0usize));
    let dropped = Arc::new(parking_lot::Mutex::new(0usize));

    let kept_count = kept.clone();
    let kept_listener: queueflow::Listener = Arc::new(move |_| *kept_count.lock() += 1);
    let dropped_count = dropped.clone();
    let dropped_listener: queueflow::Listener = Arc::new(move |_| *dropped_count.lock() += 1);

    submission.on(EventKind::Status, kept_listener);
    submission.on(EventKind::Status, dropped_listener.clone());
    submission.off(EventKind::Status, &dropped_listener);
    settle().await;

    assert!(*kept.lock() >= 2);
    assert_eq!(*dropped.lock(), 0);
}

/// component_server passes through and stamps the session hash.
#[tokio::test]
async fn test_component_server_passthrough() {
    let http = MockHttp::new();
    http.respond("/component_server", 200, json!({"choices": ["a", "b"]}));

    let client = Client::builder(app_config(Protocol::SseV1))
        .api(api_info())
        .http(http.clone())
        .sse_factory(MockSse::new())
        .ws_factory(MockWs::new())
        .build()
        .unwrap();

    let reply = client
        .component_server(7, "refresh_choices", json!([]))
        .await
        .unwrap();
    assert_eq!(reply, json!({"choices": ["a", "b"]}));

    let posts = http.posts_to("/component_server");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["component_id"], json!(7));
    assert_eq!(posts[0]["fn_name"], json!("refresh_choices"));
    assert!(posts[0]["session_hash"].is_string());
}

/// Stage terminality drives the public contract.
#[test]
fn test_stage_terminality() {
    assert!(Stage::Complete.is_terminal());
    assert!(Stage::Error.is_terminal());
    assert!(!Stage::Pending.is_terminal());
    assert!(!Stage::Generating.is_terminal());
}

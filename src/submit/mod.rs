//! The submission engine.
//!
//! One submission is one call against a logical endpoint: the engine prepares
//! the payload, picks the transport the server's config demands, joins the
//! queue, and turns the transport's frames into the caller's event stream.
//! Per submission the lifecycle is `Prep → Joined → Streaming → Terminal`,
//! with exactly one terminal `status` on every path.
//!
//! A terminal frame's `status` is never emitted ahead of the data it carries:
//! listeners always see the final `data` first, then `status{complete}`.

pub mod events;
pub mod handle;
pub mod mux;

pub use events::{DataEvent, Event, EventKind, Listener, LogEvent, StatusEvent};
pub use handle::Submission;

use crate::client::api::{resolve, EndpointRef};
use crate::client::config::{version_lt, Dependency, Protocol};
use crate::client::SessionInner;
use crate::error::{
    QueueflowError, Result, BROKEN_CONNECTION_MSG, QUEUE_FULL_MSG, UNEXPECTED_ERROR_MSG,
};
use crate::protocol::diff::{apply_diff, parse_diff};
use crate::protocol::interpreter::{interpret, Interpreted, Stage, Status};
use crate::protocol::{HashReply, QueueFrame};
use crate::transport::{Headers, SocketFrame};
use crate::upload::{prepare_payload, InputValue};
use futures_util::StreamExt;
use handle::{SubmissionShared, SubmissionState};
use mux::FrameCallback;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a submission reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Synchronous POST to `${root}/run{endpoint}`, queue skipped
    Direct,
    /// Dedicated WebSocket to `${root}/queue/join`
    Ws,
    /// Dedicated SSE stream to `${root}/queue/join`
    SseLegacy,
    /// POST join, frames over the shared session stream
    SseMux,
}

/// Create a submission and start its driver.
///
/// Fails synchronously with [`QueueflowError::NoApi`] when the session has no
/// discovered API and [`QueueflowError::UnknownEndpoint`] when resolution
/// fails; every later failure surfaces as a terminal error `status` event.
pub(crate) fn submit(
    session: Arc<SessionInner>,
    endpoint: EndpointRef,
    args: Vec<InputValue>,
    event_data: Option<Value>,
    trigger_id: Option<u64>,
) -> Result<Submission> {
    let api = session.api.as_ref().ok_or(QueueflowError::NoApi)?;
    let resolved = resolve(&endpoint, api, &session.api_map, &session.config)?;
    let dependency = session
        .config
        .dependencies
        .get(resolved.fn_index)
        .cloned()
        .ok_or_else(|| QueueflowError::UnknownEndpoint(resolved.fn_index.to_string()))?;

    let transport = if dependency.skips_queue(&session.config) {
        TransportKind::Direct
    } else {
        match session.config.protocol {
            Protocol::Ws => TransportKind::Ws,
            Protocol::Sse => TransportKind::SseLegacy,
            _ => TransportKind::SseMux,
        }
    };

    let shared = Arc::new(SubmissionShared {
        session,
        fn_index: resolved.fn_index,
        endpoint_path: resolved.endpoint_path,
        transport,
        event_data,
        trigger_id,
        listeners: Mutex::new(HashMap::new()),
        state: Mutex::new(SubmissionState::default()),
    });

    let driver = tokio::spawn(run_driver(shared.clone(), args, dependency));
    shared.state.lock().driver = Some(driver);

    Ok(Submission { inner: shared })
}

async fn run_driver(sub: Arc<SubmissionShared>, args: Vec<InputValue>, dependency: Dependency) {
    let session = sub.session.clone();
    let queued = sub.transport != TransportKind::Direct;

    let payload = match prepare_payload(&session.root(), args, session.uploader.as_ref()).await {
        Ok(payload) => payload,
        Err(e) => {
            sub.emit_status(Status {
                queue: queued,
                ..Status::error(e.to_string())
            });
            return;
        }
    };

    sub.emit(Event::Status(StatusEvent::pending(
        queued,
        sub.fn_index,
        &sub.endpoint_path,
    )));

    match sub.transport {
        TransportKind::Direct => run_direct(&sub, payload).await,
        TransportKind::Ws => run_ws(&sub, payload).await,
        TransportKind::SseLegacy => run_sse_legacy(&sub, payload).await,
        TransportKind::SseMux => run_sse_mux(&sub, payload, &dependency).await,
    }
}

// ---------------------------------------------------------------------------
// Direct POST
// ---------------------------------------------------------------------------

async fn run_direct(sub: &Arc<SubmissionShared>, payload: Vec<Value>) {
    let session = &sub.session;
    let url = format!("{}/run{}", session.root(), sub.endpoint_path);
    let body = sub.data_reply(&payload, None);

    match session.http.post_json(&url, &body, &Headers::new()).await {
        Ok(reply) if reply.is_success() => {
            let data = reply.body.get("data").cloned().unwrap_or(Value::Null);
            sub.emit_data(data);
            sub.emit_status(Status {
                queue: false,
                eta: reply.body.get("average_duration").and_then(Value::as_f64),
                ..Status::at(Stage::Complete)
            });
        }
        Ok(reply) => {
            let message = reply
                .body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", reply.status));
            sub.emit_status(Status {
                queue: false,
                ..Status::error(message)
            });
        }
        Err(e) => sub.emit_status(Status {
            queue: false,
            ..Status::error(e.to_string())
        }),
    }
}

// ---------------------------------------------------------------------------
// Dedicated WebSocket
// ---------------------------------------------------------------------------

async fn run_ws(sub: &Arc<SubmissionShared>, payload: Vec<Value>) {
    let session = &sub.session;
    let mut url = format!("{}/queue/join", session.config.ws_root());
    if let Some(jwt) = &session.options.jwt {
        url = format!("{url}?__sign={jwt}");
    }

    let mut socket = match session.ws_factory.connect(&url).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, "WebSocket connect failed");
            sub.emit_status(Status {
                broken: true,
                ..Status::error(BROKEN_CONNECTION_MSG)
            });
            return;
        }
    };

    // Older servers expect the session hash immediately on open instead of
    // asking for it with a send_hash frame.
    if version_lt(&session.config.version, "3.6.0") {
        let _ = socket
            .send(json!({ "hash": session.session_hash.clone() }))
            .await;
    }

    loop {
        match socket.next_frame().await {
            SocketFrame::Closed { clean } => {
                if !clean {
                    sub.emit_status(Status {
                        broken: true,
                        ..Status::error(BROKEN_CONNECTION_MSG)
                    });
                }
                return;
            }
            SocketFrame::Text(text) => {
                let frame: QueueFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "Unparseable WebSocket frame");
                        sub.emit_status(Status::error(UNEXPECTED_ERROR_MSG));
                        socket.close().await;
                        return;
                    }
                };

                match interpret(&frame, sub.previous_stage()) {
                    Interpreted::SendHash => {
                        let reply = HashReply {
                            fn_index: sub.fn_index,
                            session_hash: session.session_hash.clone(),
                        };
                        if let Ok(value) = serde_json::to_value(&reply) {
                            let _ = socket.send(value).await;
                        }
                    }
                    Interpreted::SendData => {
                        let _ = socket.send(sub.data_reply(&payload, None)).await;
                    }
                    Interpreted::Update(status) => {
                        sub.record_stage(status.stage);
                        let is_error = status.stage == Stage::Error;
                        sub.emit_status(status);
                        if is_error {
                            socket.close().await;
                            return;
                        }
                    }
                    Interpreted::Generating { status, data } => {
                        sub.record_stage(status.stage);
                        sub.emit_status(status);
                        if let Some(data) = data {
                            sub.emit_data(data);
                        }
                    }
                    Interpreted::Complete { status, data } => {
                        sub.record_stage(status.stage);
                        if let Some(data) = data {
                            sub.emit_data(data);
                        }
                        sub.emit_status(status);
                        socket.close().await;
                        return;
                    }
                    Interpreted::Log(record) => sub.emit_log(record),
                    Interpreted::UnexpectedError(status) => {
                        sub.emit_status(status);
                        socket.close().await;
                        return;
                    }
                    Interpreted::Heartbeat | Interpreted::CloseStream => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Legacy dedicated SSE
// ---------------------------------------------------------------------------

async fn run_sse_legacy(sub: &Arc<SubmissionShared>, payload: Vec<Value>) {
    let session = &sub.session;
    let url = format!(
        "{}/queue/join?fn_index={}&session_hash={}",
        session.root(),
        sub.fn_index,
        session.session_hash
    );

    let mut stream = match session.sse_factory.connect(&url).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "SSE connect failed");
            sub.emit_status(Status {
                broken: true,
                ..Status::error(BROKEN_CONNECTION_MSG)
            });
            return;
        }
    };

    while let Some(item) = stream.next().await {
        let raw = match item {
            Ok(frame) => frame.data,
            Err(e) => {
                warn!(error = %e, "SSE stream errored");
                sub.emit_status(Status {
                    broken: true,
                    ..Status::error(BROKEN_CONNECTION_MSG)
                });
                return;
            }
        };

        let frame: QueueFrame = match serde_json::from_str(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Unparseable SSE frame");
                sub.emit_status(Status::error(UNEXPECTED_ERROR_MSG));
                return;
            }
        };

        // The first frame carrying an id binds the submission for /reset.
        if sub.event_id().is_none() {
            if let Some(id) = frame.event_id.clone().filter(|id| !id.is_empty()) {
                sub.set_event_id(id);
            }
        }

        match interpret(&frame, sub.previous_stage()) {
            Interpreted::SendData => {
                let body = sub.data_reply(&payload, sub.event_id());
                let url = format!("{}/queue/data", session.root());
                let posted = session.http.post_json(&url, &body, &Headers::new()).await;
                let ok = matches!(&posted, Ok(reply) if reply.is_success());
                if !ok {
                    sub.emit_status(Status {
                        broken: true,
                        ..Status::error(BROKEN_CONNECTION_MSG)
                    });
                    return;
                }
            }
            Interpreted::Update(status) => {
                sub.record_stage(status.stage);
                let is_error = status.stage == Stage::Error;
                sub.emit_status(status);
                if is_error {
                    return;
                }
            }
            Interpreted::Generating { status, data } => {
                sub.record_stage(status.stage);
                sub.emit_status(status);
                if let Some(data) = data {
                    sub.emit_data(data);
                }
            }
            Interpreted::Complete { status, data } => {
                sub.record_stage(status.stage);
                if let Some(data) = data {
                    sub.emit_data(data);
                }
                sub.emit_status(status);
                return;
            }
            Interpreted::Log(record) => sub.emit_log(record),
            Interpreted::UnexpectedError(status) => {
                sub.emit_status(status);
                return;
            }
            Interpreted::SendHash | Interpreted::Heartbeat | Interpreted::CloseStream => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Multiplexed SSE
// ---------------------------------------------------------------------------

async fn run_sse_mux(sub: &Arc<SubmissionShared>, payload: Vec<Value>, dependency: &Dependency) {
    let session = &sub.session;

    // Shared-GPU hosts want extra auth headers on the join request.
    let headers = if dependency.zerogpu {
        match &session.config.space_id {
            Some(space_id) => session
                .auth_headers
                .acquire(space_id)
                .await
                .unwrap_or_default(),
            None => Headers::new(),
        }
    } else {
        Headers::new()
    };

    let url = format!("{}/queue/join", session.root());
    let body = sub.data_reply(&payload, None);
    let reply = match session.http.post_json(&url, &body, &headers).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Queue join failed");
            sub.emit_status(Status::error(BROKEN_CONNECTION_MSG));
            return;
        }
    };

    if reply.status == 503 {
        sub.emit_status(Status::error(QUEUE_FULL_MSG));
        return;
    }
    if !reply.is_success() {
        sub.emit_status(Status::error(BROKEN_CONNECTION_MSG));
        return;
    }

    let event_id = reply
        .body
        .get("event_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|id| !id.is_empty());
    let Some(event_id) = event_id else {
        warn!("Queue join reply carried no event id");
        sub.emit_status(Status::error(UNEXPECTED_ERROR_MSG));
        return;
    };

    sub.set_event_id(event_id.clone());
    mux::register_event(session, &event_id, mux_callback(sub.clone()));

    // Frames buffered ahead of the join reply may already have finished the
    // submission, and a cancellation may have landed during the POST.
    if sub.is_terminal() {
        mux::detach_event(session, &event_id);
        return;
    }

    mux::ensure_stream_open(session).await;
}

fn mux_callback(sub: Arc<SubmissionShared>) -> FrameCallback {
    Arc::new(move |frame: QueueFrame| {
        if let Err(e) = handle_mux_frame(&sub, frame) {
            warn!(error = %e, "Frame handling failed");
            sub.emit_status(Status::error(UNEXPECTED_ERROR_MSG));
            if let Some(id) = sub.event_id() {
                mux::detach_event(&sub.session, &id);
            }
            // v3 keeps the stream alive until the server's close signal;
            // the earlier revisions have no recovery story, so drop it.
            if matches!(
                sub.session.config.protocol,
                Protocol::SseV2 | Protocol::SseV2_1
            ) {
                mux::close_stream(&sub.session);
            }
        }
    })
}

fn handle_mux_frame(sub: &Arc<SubmissionShared>, frame: QueueFrame) -> Result<()> {
    if sub.is_terminal() {
        // Late frames after cancellation; drop them.
        return Ok(());
    }

    match interpret(&frame, sub.previous_stage()) {
        Interpreted::Update(status) => {
            sub.record_stage(status.stage);
            let is_error = status.stage == Stage::Error;
            sub.emit_status(status);
            if is_error {
                if let Some(id) = sub.event_id() {
                    mux::detach_event(&sub.session, &id);
                }
            }
        }
        Interpreted::Generating { status, data } => {
            sub.record_stage(status.stage);
            sub.emit_status(status);
            if let Some(data) = data {
                let emitted = if sub.session.config.protocol.folds_diffs() {
                    fold_diff(sub, data)?
                } else {
                    data
                };
                sub.emit_data(emitted);
            }
        }
        Interpreted::Complete { status, data } => {
            sub.record_stage(status.stage);
            if let Some(data) = data {
                sub.emit_data(data);
            }
            sub.emit_status(status);
            if let Some(id) = sub.event_id() {
                mux::detach_event(&sub.session, &id);
            }
        }
        Interpreted::Log(record) => sub.emit_log(record),
        Interpreted::UnexpectedError(status) => {
            sub.emit_status(status);
            if let Some(id) = sub.event_id() {
                mux::detach_event(&sub.session, &id);
            }
        }
        Interpreted::Heartbeat => {}
        Interpreted::SendHash | Interpreted::SendData | Interpreted::CloseStream => {
            debug!(msg = ?frame.msg, "Ignoring frame on multiplex stream");
        }
    }
    Ok(())
}

/// Fold a generating frame's data into the running snapshot.
///
/// The first frame publishes the full value and seeds the snapshot; later
/// frames carry diffs against it. The emitted payload is always the folded
/// snapshot.
fn fold_diff(sub: &Arc<SubmissionShared>, data: Value) -> Result<Value> {
    let Some(event_id) = sub.event_id() else {
        return Ok(data);
    };
    let mut mux = sub.session.mux.lock();
    match mux.pending_diff_streams.entry(event_id) {
        std::collections::hash_map::Entry::Occupied(mut entry) => {
            let ops = parse_diff(&data)?;
            apply_diff(entry.get_mut(), &ops)?;
            Ok(entry.get().clone())
        }
        std::collections::hash_map::Entry::Vacant(slot) => {
            slot.insert(data.clone());
            Ok(data)
        }
    }
}

//! Multiplexed SSE stream.
//!
//! The `sse_v1`+ protocols share a single long-lived event stream per
//! session. Each frame carries the server-assigned `event_id` of the
//! submission it belongs to; this module owns the one stream, dispatches
//! frames to the callback registered under their id, and buffers frames whose
//! id has no callback yet; the join POST's reply and the first stream frames
//! for the same event race freely.
//!
//! Only this module opens and closes the stream; the engine mutates the
//! registries through [`register_event`] and [`detach_event`]. The stream is
//! open exactly while `unclosed_events` is non-empty.

use crate::client::SessionInner;
use crate::error::BROKEN_CONNECTION_MSG;
use crate::protocol::{FrameTag, QueueFrame};
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handler invoked for every frame addressed to one event id.
pub type FrameCallback = Arc<dyn Fn(QueueFrame) + Send + Sync>;

/// Session-wide multiplex state. Lives behind `parking_lot::Mutex`; no await
/// happens while the lock is held, and callbacks run with it released.
#[derive(Default)]
pub struct MuxState {
    pub stream_open: bool,
    pub event_callbacks: HashMap<String, FrameCallback>,
    pub unclosed_events: HashSet<String>,
    /// Frames that arrived before their event id was bound by the join reply
    pub pending_stream_messages: HashMap<String, Vec<QueueFrame>>,
    /// Running snapshots of diff-streaming outputs
    pub pending_diff_streams: HashMap<String, Value>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for MuxState {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Register a submission's frame callback under its event id.
///
/// Frames buffered for the id are drained through the callback first, in
/// arrival order, then the callback takes over live dispatch. Empty ids are
/// never registered.
pub(crate) fn register_event(session: &Arc<SessionInner>, event_id: &str, callback: FrameCallback) {
    if event_id.is_empty() {
        warn!("Refusing to register an empty event id");
        return;
    }

    loop {
        let backlog = {
            let mut mux = session.mux.lock();
            match mux.pending_stream_messages.remove(event_id) {
                Some(frames) => frames,
                None => {
                    // Nothing buffered (anymore): bind the id atomically.
                    mux.event_callbacks
                        .insert(event_id.to_string(), callback.clone());
                    mux.unclosed_events.insert(event_id.to_string());
                    return;
                }
            }
        };
        for frame in backlog {
            callback(frame);
        }
    }
}

/// Drop every trace of an event id and close the stream once nothing is
/// outstanding.
pub(crate) fn detach_event(session: &Arc<SessionInner>, event_id: &str) {
    let handle = {
        let mut mux = session.mux.lock();
        mux.event_callbacks.remove(event_id);
        mux.unclosed_events.remove(event_id);
        mux.pending_stream_messages.remove(event_id);
        mux.pending_diff_streams.remove(event_id);
        if mux.unclosed_events.is_empty() && mux.stream_open {
            mux.stream_open = false;
            mux.handle.take()
        } else {
            None
        }
    };
    if let Some(handle) = handle {
        handle.abort();
    }
}

/// Force-close the stream and fail every registered submission.
///
/// Used when frame handling itself fails on the v2/v2.1 protocols, where the
/// server gives no stream-level recovery signal.
pub(crate) fn close_stream(session: &Arc<SessionInner>) {
    fail_registered(session, BROKEN_CONNECTION_MSG);
}

/// Open the shared stream unless it is already open.
pub(crate) async fn ensure_stream_open(session: &Arc<SessionInner>) {
    {
        let mut mux = session.mux.lock();
        if mux.stream_open {
            return;
        }
        // Claimed before the connect await so concurrent joins don't open a
        // second stream.
        mux.stream_open = true;
    }

    let url = format!(
        "{}/queue/data?session_hash={}",
        session.root(),
        session.session_hash
    );

    let stream = match session.sse_factory.connect(&url).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to open multiplex stream");
            fail_registered(session, BROKEN_CONNECTION_MSG);
            return;
        }
    };

    let task_session = session.clone();
    let handle = tokio::spawn(async move {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            match item {
                Ok(frame) => {
                    if !dispatch(&task_session, &frame.data) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Multiplex stream errored");
                    fail_registered(&task_session, BROKEN_CONNECTION_MSG);
                    return;
                }
            }
        }
        let mut mux = task_session.mux.lock();
        mux.stream_open = false;
        mux.handle = None;
    });

    session.mux.lock().handle = Some(handle);
}

/// Route one raw frame. Returns `false` when the stream should stop.
fn dispatch(session: &Arc<SessionInner>, raw: &str) -> bool {
    let frame: QueueFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Dropping unparseable stream frame");
            return true;
        }
    };

    if frame.msg == FrameTag::CloseStream {
        let abandoned = {
            let mut mux = session.mux.lock();
            mux.stream_open = false;
            mux.handle = None;
            mux.pending_stream_messages.clear();
            mux.pending_diff_streams.clear();
            mux.unclosed_events.clear();
            mux.event_callbacks.drain().count()
        };
        if abandoned > 0 {
            warn!(abandoned, "Server closed the stream with events in flight");
        }
        return false;
    }

    let Some(event_id) = frame.event_id.clone().filter(|id| !id.is_empty()) else {
        debug!(msg = ?frame.msg, "Dropping stream frame without event id");
        return true;
    };

    let callback = session.mux.lock().event_callbacks.get(&event_id).cloned();
    match callback {
        Some(callback) => callback(frame),
        None => {
            // The join reply for this id has not landed yet.
            session
                .mux
                .lock()
                .pending_stream_messages
                .entry(event_id)
                .or_default()
                .push(frame);
        }
    }
    true
}

/// Tear the stream down and deliver a synthesized error frame to every
/// registered callback.
fn fail_registered(session: &Arc<SessionInner>, message: &str) {
    let (callbacks, handle) = {
        let mut mux = session.mux.lock();
        mux.stream_open = false;
        mux.pending_stream_messages.clear();
        mux.pending_diff_streams.clear();
        mux.unclosed_events.clear();
        let callbacks: Vec<FrameCallback> =
            mux.event_callbacks.drain().map(|(_, cb)| cb).collect();
        (callbacks, mux.handle.take())
    };

    let frame = QueueFrame::synthesized_error(message);
    for callback in &callbacks {
        callback(frame.clone());
    }
    if let Some(handle) = handle {
        handle.abort();
    }
}

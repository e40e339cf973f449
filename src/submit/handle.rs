//! Submission handles.
//!
//! [`Submission`] is what `submit` hands back to the caller: a listener
//! registry over the event stream of one in-flight call, plus cancellation
//! and teardown. Listeners fire synchronously in registration order;
//! listeners attached during dispatch only see subsequent events. After the
//! one terminal `status`, nothing fires again.

use super::events::{DataEvent, Event, EventKind, Listener, LogEvent, StatusEvent};
use super::mux;
use super::TransportKind;
use crate::client::SessionInner;
use crate::protocol::interpreter::{LogRecord, Stage, Status};
use crate::protocol::ResetBody;
use crate::transport::Headers;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;

/// Handle to one in-flight endpoint call.
#[derive(Clone)]
pub struct Submission {
    pub(crate) inner: Arc<SubmissionShared>,
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("endpoint_path", &self.inner.endpoint_path)
            .field("transport", &self.inner.transport)
            .finish()
    }
}

pub(crate) struct SubmissionShared {
    pub(crate) session: Arc<SessionInner>,
    pub(crate) fn_index: usize,
    pub(crate) endpoint_path: String,
    pub(crate) transport: TransportKind,
    pub(crate) event_data: Option<Value>,
    pub(crate) trigger_id: Option<u64>,
    pub(crate) listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
    pub(crate) state: Mutex<SubmissionState>,
}

#[derive(Default)]
pub(crate) struct SubmissionState {
    /// Server-assigned id on SSE-family transports; `None` until bound
    pub(crate) event_id: Option<String>,
    /// Terminal stage once the final `status` has been emitted
    pub(crate) terminal: Option<Stage>,
    pub(crate) driver: Option<JoinHandle<()>>,
}

impl SubmissionShared {
    /// Fire one event at the listeners registered for its kind.
    ///
    /// Terminal statuses latch: the first one marks the submission done and
    /// every later emission is dropped, including frames that race in after
    /// cancellation.
    pub(crate) fn emit(&self, event: Event) {
        {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            if let Event::Status(status) = &event {
                if status.stage.is_terminal() {
                    state.terminal = Some(status.stage);
                }
            }
        }
        // Snapshot so listeners attached mid-dispatch wait for the next event.
        let listeners = {
            self.listeners
                .lock()
                .get(&event.kind())
                .cloned()
                .unwrap_or_default()
        };
        for listener in &listeners {
            listener(&event);
        }
    }

    pub(crate) fn emit_status(&self, status: Status) {
        self.emit(Event::Status(StatusEvent::from_status(
            status,
            self.fn_index,
            &self.endpoint_path,
        )));
    }

    pub(crate) fn emit_data(&self, data: Value) {
        self.emit(Event::Data(DataEvent {
            data,
            time: Utc::now(),
            fn_index: self.fn_index,
            endpoint: self.endpoint_path.clone(),
            event_data: self.event_data.clone(),
            trigger_id: self.trigger_id,
        }));
    }

    pub(crate) fn emit_log(&self, record: LogRecord) {
        self.emit(Event::Log(LogEvent {
            log: record.log,
            level: record.level,
            fn_index: self.fn_index,
            endpoint: self.endpoint_path.clone(),
        }));
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.lock().terminal.is_some()
    }

    pub(crate) fn event_id(&self) -> Option<String> {
        self.state.lock().event_id.clone()
    }

    pub(crate) fn set_event_id(&self, event_id: String) {
        self.state.lock().event_id = Some(event_id);
    }

    /// Last stage observed for this function, feeding the next interpretation.
    pub(crate) fn previous_stage(&self) -> Option<Stage> {
        self.session.last_status.lock().get(&self.fn_index).copied()
    }

    pub(crate) fn record_stage(&self, stage: Stage) {
        self.session.last_status.lock().insert(self.fn_index, stage);
    }

    /// The wire payload for queue joins, `send_data` replies and direct runs.
    pub(crate) fn data_reply(&self, payload: &[Value], event_id: Option<String>) -> Value {
        let reply = crate::protocol::DataReply {
            fn_index: self.fn_index,
            data: payload.to_vec(),
            event_data: self.event_data.clone(),
            trigger_id: self.trigger_id,
            session_hash: self.session.session_hash.clone(),
            event_id,
        };
        serde_json::to_value(&reply).unwrap_or(Value::Null)
    }
}

impl Submission {
    /// Attach a listener for one event kind. Returns `self` for chaining.
    pub fn on(&self, kind: EventKind, listener: Listener) -> &Self {
        self.inner
            .listeners
            .lock()
            .entry(kind)
            .or_default()
            .push(listener);
        self
    }

    /// Detach the first listener matching by `Arc` identity.
    pub fn off(&self, kind: EventKind, listener: &Listener) -> &Self {
        let mut map = self.inner.listeners.lock();
        if let Some(list) = map.get_mut(&kind) {
            if let Some(position) = list.iter().position(|l| Arc::ptr_eq(l, listener)) {
                list.remove(position);
            }
        }
        self
    }

    /// All events of this submission as a stream, in emission order.
    ///
    /// Registers channel-backed listeners for every kind; the stream does not
    /// end on its own; stop reading after the terminal `status`.
    pub fn event_stream(&self) -> UnboundedReceiverStream<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: Listener = Arc::new(move |event: &Event| {
            let _ = tx.send(event.clone());
        });
        self.on(EventKind::Status, listener.clone())
            .on(EventKind::Data, listener.clone())
            .on(EventKind::Log, listener);
        UnboundedReceiverStream::new(rx)
    }

    /// The server-assigned event id, once a queue join has bound one.
    pub fn event_id(&self) -> Option<String> {
        self.inner.event_id()
    }

    /// Cancel the submission.
    ///
    /// Idempotent. Emits a synthetic terminal `status{complete}`, tears the
    /// transport down so late frames are dropped, then best-effort notifies
    /// the server via `/reset`; a failed reset is logged, never surfaced.
    pub async fn cancel(&self) {
        if self.inner.is_terminal() {
            return;
        }
        self.inner.emit_status(Status {
            queue: false,
            ..Status::at(Stage::Complete)
        });

        let (event_id, driver) = {
            let mut state = self.inner.state.lock();
            (state.event_id.clone(), state.driver.take())
        };
        if let Some(driver) = driver {
            driver.abort();
        }
        if self.inner.transport == TransportKind::SseMux {
            if let Some(id) = &event_id {
                mux::detach_event(&self.inner.session, id);
            }
        }

        let body = match self.inner.transport {
            TransportKind::Ws => Some(ResetBody::Session {
                fn_index: self.inner.fn_index,
                session_hash: self.inner.session.session_hash.clone(),
            }),
            _ => event_id.map(|event_id| ResetBody::Event { event_id }),
        };
        let Some(body) = body else {
            return;
        };
        let Ok(body) = serde_json::to_value(&body) else {
            return;
        };

        let url = format!("{}/reset", self.inner.session.root());
        match self
            .inner
            .session
            .http
            .post_json(&url, &body, &Headers::new())
            .await
        {
            Ok(reply) if reply.is_success() => {}
            Ok(reply) => warn!(status = reply.status, "Reset request was rejected"),
            Err(e) => warn!(error = %e, "Reset request failed"),
        }
    }

    /// Remove every listener. Does not cancel the submission.
    pub fn destroy(&self) {
        self.inner.listeners.lock().clear();
    }
}

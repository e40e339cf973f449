//! Client sessions.
//!
//! A [`Client`] holds everything that outlives a single call: the resolved
//! app config, the discovered API surface, the opaque session hash, the
//! transport stack, and the shared multiplex state that `sse_v1`+ submissions
//! dispatch through. Sessions are cheap to clone and safe to share; all
//! per-call state lives on the [`Submission`] handle.

pub mod api;
pub mod config;

use crate::client::api::{build_api_map, ApiInfo, EndpointRef};
use crate::client::config::{AppConfig, ClientOptions};
use crate::error::{QueueflowError, Result, UNEXPECTED_ERROR_MSG};
use crate::protocol::interpreter::Stage;
use crate::submit::mux::MuxState;
use crate::submit::{Event, Submission};
use crate::transport::{
    EventStreamFactory, Headers, HttpTransport, ReqwestEventStreamFactory, ReqwestTransport,
    SocketFactory, TungsteniteSocketFactory,
};
use crate::upload::{HttpUploader, InputValue, Uploader};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Source of the extra auth headers shared-GPU hosts require on queue joins.
///
/// Consulted only for dependencies flagged `zerogpu` on apps with a
/// `space_id`. The default source supplies nothing; embedders with a
/// host-specific handshake plug their own in.
#[async_trait]
pub trait AuthHeaderSource: Send + Sync {
    async fn acquire(&self, space_id: &str) -> Option<Headers>;
}

/// Default [`AuthHeaderSource`]: no extra headers.
pub struct NoAuthHeaders;

#[async_trait]
impl AuthHeaderSource for NoAuthHeaders {
    async fn acquire(&self, _space_id: &str) -> Option<Headers> {
        None
    }
}

/// Shared session state. Read-only after construction apart from the
/// multiplex registries and the per-function stage map.
pub(crate) struct SessionInner {
    pub(crate) options: ClientOptions,
    pub(crate) config: AppConfig,
    pub(crate) api: Option<ApiInfo>,
    pub(crate) api_map: HashMap<String, usize>,
    pub(crate) session_hash: String,
    pub(crate) http: Arc<dyn HttpTransport>,
    pub(crate) sse_factory: Arc<dyn EventStreamFactory>,
    pub(crate) ws_factory: Arc<dyn SocketFactory>,
    pub(crate) uploader: Arc<dyn Uploader>,
    pub(crate) auth_headers: Arc<dyn AuthHeaderSource>,
    pub(crate) mux: Mutex<MuxState>,
    pub(crate) last_status: Mutex<HashMap<usize, Stage>>,
    pub(crate) heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    pub(crate) fn root(&self) -> String {
        self.config.api_root()
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
    }
}

/// Client for one app server.
#[derive(Clone)]
pub struct Client {
    inner: Arc<SessionInner>,
}

impl Client {
    /// Connect to an app: fetch its config and API view, then start the
    /// session heartbeat.
    pub async fn connect(app_root: &str, options: ClientOptions) -> Result<Self> {
        let root = app_root.trim_end_matches('/').to_string();
        if root.is_empty() {
            return Err(QueueflowError::Config("empty app root URL".to_string()));
        }

        let http: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(options.auth_token.clone())?);

        let reply = http.get_json(&format!("{root}/config")).await?;
        if !reply.is_success() {
            return Err(QueueflowError::Config(format!(
                "config fetch returned HTTP {}",
                reply.status
            )));
        }
        let mut config: AppConfig = serde_json::from_value(reply.body)?;
        if config.root.is_empty() {
            config.root = root;
        }

        // A missing API view is not fatal; submissions then fail with NoApi.
        let api_reply = http.get_json(&format!("{}/info", config.api_root())).await;
        let api = match api_reply {
            Ok(reply) if reply.is_success() => serde_json::from_value(reply.body).ok(),
            _ => None,
        };

        let mut builder = Client::builder(config).options(options).http(http);
        if let Some(api) = api {
            builder = builder.api(api);
        }
        let client = builder.build()?;
        client.start_heartbeat();
        Ok(client)
    }

    /// Builder for sessions with pre-resolved config, used directly by tests
    /// and embedders that fetch configuration through their own channels.
    pub fn builder(config: AppConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Submit a call against an endpoint.
    ///
    /// Returns the handle synchronously; transport work happens on a spawned
    /// driver. On a multi-threaded runtime, attach listeners before the first
    /// `.await` so no event can slip past them (on a current-thread runtime
    /// the driver cannot run before the caller yields).
    pub fn submit(
        &self,
        endpoint: impl Into<EndpointRef>,
        args: Vec<InputValue>,
    ) -> Result<Submission> {
        self.submit_with(endpoint, args, None, None)
    }

    /// [`Client::submit`] with event metadata attached to every data event.
    pub fn submit_with(
        &self,
        endpoint: impl Into<EndpointRef>,
        args: Vec<InputValue>,
        event_data: Option<Value>,
        trigger_id: Option<u64>,
    ) -> Result<Submission> {
        crate::submit::submit(
            self.inner.clone(),
            endpoint.into(),
            args,
            event_data,
            trigger_id,
        )
    }

    /// Submit and wait for the final output.
    ///
    /// Convenience over [`Client::submit`]: drives the event stream to its
    /// terminal status and returns the last `data` payload, or the server's
    /// error message as [`QueueflowError::Server`].
    pub async fn predict(
        &self,
        endpoint: impl Into<EndpointRef>,
        args: Vec<InputValue>,
    ) -> Result<Value> {
        let submission = self.submit(endpoint, args)?;
        let mut events = submission.event_stream();
        let mut last_data = None;

        while let Some(event) = events.next().await {
            match event {
                Event::Data(data) => last_data = Some(data.data),
                Event::Status(status) if status.stage == Stage::Error => {
                    return Err(QueueflowError::Server(
                        status
                            .message
                            .unwrap_or_else(|| UNEXPECTED_ERROR_MSG.to_string()),
                    ));
                }
                Event::Status(status) if status.stage == Stage::Complete => break,
                _ => {}
            }
        }
        Ok(last_data.unwrap_or(Value::Null))
    }

    /// Pass-through POST to a component's server-side function.
    pub async fn component_server(
        &self,
        component_id: u64,
        fn_name: &str,
        data: Value,
    ) -> Result<Value> {
        let url = format!("{}/component_server", self.inner.root());
        let body = json!({
            "component_id": component_id,
            "fn_name": fn_name,
            "session_hash": self.inner.session_hash,
            "data": data,
        });
        let reply = self.inner.http.post_json(&url, &body, &Headers::new()).await?;
        if !reply.is_success() {
            return Err(QueueflowError::Server(format!(
                "component server returned HTTP {}",
                reply.status
            )));
        }
        Ok(reply.body)
    }

    /// The discovered API surface, when the server published one.
    pub fn view_api(&self) -> Option<&ApiInfo> {
        self.inner.api.as_ref()
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn session_hash(&self) -> &str {
        &self.inner.session_hash
    }

    /// Open the session heartbeat so the server keeps queue state alive.
    fn start_heartbeat(&self) {
        let url = format!(
            "{}/heartbeat/{}",
            self.inner.root(),
            self.inner.session_hash
        );
        let factory = self.inner.sse_factory.clone();
        let handle = tokio::spawn(async move {
            match factory.connect(&url).await {
                Ok(mut stream) => while let Some(Ok(_)) = stream.next().await {},
                Err(e) => debug!(error = %e, "Heartbeat stream failed"),
            }
        });
        *self.inner.heartbeat.lock() = Some(handle);
    }
}

/// Builder for [`Client`] sessions.
pub struct ClientBuilder {
    config: AppConfig,
    options: ClientOptions,
    api: Option<ApiInfo>,
    http: Option<Arc<dyn HttpTransport>>,
    sse_factory: Option<Arc<dyn EventStreamFactory>>,
    ws_factory: Option<Arc<dyn SocketFactory>>,
    uploader: Option<Arc<dyn Uploader>>,
    auth_headers: Option<Arc<dyn AuthHeaderSource>>,
}

impl ClientBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            options: ClientOptions::default(),
            api: None,
            http: None,
            sse_factory: None,
            ws_factory: None,
            uploader: None,
            auth_headers: None,
        }
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn api(mut self, api: ApiInfo) -> Self {
        self.api = Some(api);
        self
    }

    pub fn http(mut self, http: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn sse_factory(mut self, factory: Arc<dyn EventStreamFactory>) -> Self {
        self.sse_factory = Some(factory);
        self
    }

    pub fn ws_factory(mut self, factory: Arc<dyn SocketFactory>) -> Self {
        self.ws_factory = Some(factory);
        self
    }

    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn auth_headers(mut self, source: Arc<dyn AuthHeaderSource>) -> Self {
        self.auth_headers = Some(source);
        self
    }

    /// Build the session, wiring reqwest-backed defaults for any transport
    /// not injected.
    pub fn build(self) -> Result<Client> {
        let token = self.options.auth_token.clone();
        let http = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestTransport::new(token.clone())?),
        };
        let sse_factory = match self.sse_factory {
            Some(factory) => factory,
            None => Arc::new(ReqwestEventStreamFactory::new(token.clone())?),
        };
        let ws_factory = self
            .ws_factory
            .unwrap_or_else(|| Arc::new(TungsteniteSocketFactory));
        let uploader = match self.uploader {
            Some(uploader) => uploader,
            None => Arc::new(HttpUploader::new(token)?),
        };
        let auth_headers = self.auth_headers.unwrap_or_else(|| Arc::new(NoAuthHeaders));

        let api_map = build_api_map(&self.config);
        Ok(Client {
            inner: Arc::new(SessionInner {
                options: self.options,
                config: self.config,
                api: self.api,
                api_map,
                session_hash: Uuid::new_v4().to_string(),
                http,
                sse_factory,
                ws_factory,
                uploader,
                auth_headers,
                mux: Mutex::new(MuxState::default()),
                last_status: Mutex::new(HashMap::new()),
                heartbeat: Mutex::new(None),
            }),
        })
    }
}


#[cfg(test)]
impl SessionInner {
    /// Session over inert transports, for unit tests of submission state.
    pub(crate) fn for_tests(config: AppConfig) -> Self {
        use null_transport::*;

        let api_map = build_api_map(&config);
        Self {
            options: ClientOptions::default(),
            config,
            api: Some(ApiInfo::default()),
            api_map,
            session_hash: "test-session".to_string(),
            http: Arc::new(NullHttp),
            sse_factory: Arc::new(NullSse),
            ws_factory: Arc::new(NullWs),
            uploader: Arc::new(NullUploader),
            auth_headers: Arc::new(NoAuthHeaders),
            mux: Mutex::new(MuxState::default()),
            last_status: Mutex::new(HashMap::new()),
            heartbeat: Mutex::new(None),
        }
    }
}

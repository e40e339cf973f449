//! App configuration as published by the server.
//!
//! A session resolves the app's `/config` document once at connect time and
//! treats it as read-only afterwards. The config decides which transport each
//! submission uses (the app-wide `protocol` tag plus per-dependency queue
//! flags) and carries the dependency table the API map is derived from.

use serde::{Deserialize, Serialize};

/// Queue protocol revisions an app server may expose.
///
/// `Ws` and `Sse` are the historical single-connection transports; the
/// `SseV*` revisions share one multiplexed stream per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Dedicated WebSocket per submission
    #[serde(rename = "ws")]
    Ws,
    /// First-generation SSE queue, one dedicated stream per submission
    #[serde(rename = "sse")]
    Sse,
    /// Multiplexed SSE queue, initial revision
    #[serde(rename = "sse_v1")]
    SseV1,
    /// Multiplexed SSE queue with diff streams
    #[serde(rename = "sse_v2")]
    SseV2,
    /// Diff streams plus corrected cancellation semantics
    #[serde(rename = "sse_v2.1")]
    SseV2_1,
    /// Server-driven stream close via a `close_stream` frame
    #[serde(rename = "sse_v3")]
    SseV3,
}

impl Protocol {
    /// Whether submissions share one session-wide SSE stream.
    pub fn is_multiplexed(self) -> bool {
        matches!(
            self,
            Protocol::SseV1 | Protocol::SseV2 | Protocol::SseV2_1 | Protocol::SseV3
        )
    }

    /// Whether generating frames may carry diffs against a running snapshot.
    pub fn folds_diffs(self) -> bool {
        matches!(self, Protocol::SseV2 | Protocol::SseV2_1 | Protocol::SseV3)
    }

    /// Whether the server announces stream end with a `close_stream` frame.
    pub fn server_closes_stream(self) -> bool {
        matches!(self, Protocol::SseV3)
    }
}

/// One entry of the app's dependency table, describing a callable function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    /// Server-side identifier, when published
    #[serde(default)]
    pub id: Option<usize>,
    /// Endpoint name (`/predict` style) when the function is named
    #[serde(default)]
    pub api_name: Option<String>,
    /// Per-function queue override; falls back to the app-wide setting
    #[serde(default)]
    pub queue: Option<bool>,
    /// Whether calls need the extra auth headers of shared-GPU hosts
    #[serde(default)]
    pub zerogpu: bool,
    /// Whether the function is published in the API view
    #[serde(default = "default_show_api")]
    pub show_api: bool,
}

fn default_show_api() -> bool {
    true
}

impl Dependency {
    /// Whether calls to this function bypass the queue entirely.
    pub fn skips_queue(&self, config: &AppConfig) -> bool {
        !self.queue.unwrap_or(config.enable_queue)
    }
}

/// Resolved app configuration, fetched from `${root}/config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Canonical root URL of the app; filled from the connect URL when the
    /// server leaves it out
    #[serde(default)]
    pub root: String,
    /// Mount path when the app is served under a subpath
    #[serde(default)]
    pub path: String,
    /// Queue protocol the server speaks
    pub protocol: Protocol,
    /// Server version string, e.g. `"4.19.1"`
    #[serde(default)]
    pub version: String,
    /// Dependency table, indexed by fn_index
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Component descriptors; opaque to the submission engine
    #[serde(default)]
    pub components: Vec<serde_json::Value>,
    /// Hosted-space identifier, when the app runs on a shared host
    #[serde(default)]
    pub space_id: Option<String>,
    /// Whether the app requires authentication
    #[serde(default)]
    pub auth_required: bool,
    /// App-wide queue default for dependencies without an override
    #[serde(default = "default_enable_queue")]
    pub enable_queue: bool,
}

fn default_enable_queue() -> bool {
    true
}

impl AppConfig {
    /// Root URL with the mount path applied and no trailing slash.
    pub fn api_root(&self) -> String {
        let base = if self.path.is_empty() || self.path == "/" {
            self.root.clone()
        } else {
            format!("{}{}", self.root.trim_end_matches('/'), self.path)
        };
        base.trim_end_matches('/').to_string()
    }

    /// WebSocket flavour of the api root (`http` → `ws`, `https` → `wss`).
    pub fn ws_root(&self) -> String {
        let root = self.api_root();
        if let Some(rest) = root.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = root.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            root
        }
    }
}

/// Caller-supplied options for a session.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Bearer token forwarded to uploads and API requests
    pub auth_token: Option<String>,
    /// Pre-acquired JWT appended to WebSocket join URLs as `__sign`
    pub jwt: Option<String>,
}

/// Compare two dotted version strings numerically, component by component.
///
/// Missing components count as zero, so `"3.6" < "3.6.1"` and
/// `"4" == "4.0.0"`. Non-numeric fragments compare as zero.
pub fn version_lt(a: &str, b: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|c| {
                c.chars()
                    .take_while(|ch| ch.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    for i in 0..a.len().max(b.len()) {
        let (x, y) = (
            a.get(i).copied().unwrap_or(0),
            b.get(i).copied().unwrap_or(0),
        );
        if x != y {
            return x < y;
        }
    }
    false
}

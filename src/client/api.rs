//! API discovery types and endpoint resolution.
//!
//! The server publishes its callable surface in two maps: named endpoints
//! (`"/predict"` style) and unnamed endpoints addressed by bare fn_index.
//! [`resolve`] maps either form to the internal function index plus the
//! endpoint's parameter descriptors, without touching any session state.

use crate::client::config::AppConfig;
use crate::error::{QueueflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Discovered API surface of an app, fetched from `${root}/info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiInfo {
    /// Endpoints addressable by `/name`
    #[serde(default)]
    pub named_endpoints: HashMap<String, EndpointInfo>,
    /// Endpoints addressable only by fn_index
    #[serde(default)]
    pub unnamed_endpoints: HashMap<usize, EndpointInfo>,
}

/// Parameter and return descriptors for one endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointInfo {
    #[serde(default)]
    pub parameters: Vec<ParameterInfo>,
    #[serde(default)]
    pub returns: Vec<ParameterInfo>,
}

/// One positional parameter of an endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterInfo {
    #[serde(default)]
    pub label: String,
    /// Component name on the server, e.g. `"Image"` or `"Textbox"`
    #[serde(default)]
    pub component: String,
    /// Python-ish type hint string published by the server
    #[serde(default, rename = "type")]
    pub type_hint: serde_json::Value,
    /// Whether the parameter expects an uploaded file payload
    #[serde(default)]
    pub is_file: bool,
}

/// How a caller names an endpoint: by `/name` or by raw fn_index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointRef {
    Name(String),
    Index(usize),
}

impl From<&str> for EndpointRef {
    fn from(name: &str) -> Self {
        EndpointRef::Name(name.to_string())
    }
}

impl From<String> for EndpointRef {
    fn from(name: String) -> Self {
        EndpointRef::Name(name)
    }
}

impl From<usize> for EndpointRef {
    fn from(index: usize) -> Self {
        EndpointRef::Index(index)
    }
}

impl std::fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointRef::Name(name) => write!(f, "{name}"),
            EndpointRef::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Result of resolving an endpoint reference.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    /// The server's function index for the endpoint
    pub fn_index: usize,
    /// The `/name` form used in run URLs and events (`/predict` for unnamed)
    pub endpoint_path: String,
    /// Parameter descriptors, when the API view publishes them
    pub info: Option<EndpointInfo>,
}

/// Derive the endpoint-name → fn_index map from the dependency table.
pub fn build_api_map(config: &AppConfig) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (fn_index, dep) in config.dependencies.iter().enumerate() {
        if let Some(api_name) = &dep.api_name {
            map.insert(api_name.trim_start_matches('/').to_string(), fn_index);
        }
    }
    map
}

/// Map an endpoint reference to its fn_index and descriptor.
///
/// Numeric references look up `unnamed_endpoints`; string references are
/// stripped of a leading `/` and looked up via the api map, then
/// `named_endpoints`. Fails with [`QueueflowError::UnknownEndpoint`] when
/// neither mapping resolves.
pub fn resolve(
    endpoint: &EndpointRef,
    api: &ApiInfo,
    api_map: &HashMap<String, usize>,
    config: &AppConfig,
) -> Result<ResolvedEndpoint> {
    match endpoint {
        EndpointRef::Index(index) => {
            if *index >= config.dependencies.len() {
                return Err(QueueflowError::UnknownEndpoint(index.to_string()));
            }
            Ok(ResolvedEndpoint {
                fn_index: *index,
                endpoint_path: "/predict".to_string(),
                info: api.unnamed_endpoints.get(index).cloned(),
            })
        }
        EndpointRef::Name(name) => {
            let trimmed = name.trim_start_matches('/');
            let fn_index = api_map
                .get(trimmed)
                .copied()
                .ok_or_else(|| QueueflowError::UnknownEndpoint(name.clone()))?;
            Ok(ResolvedEndpoint {
                fn_index,
                endpoint_path: format!("/{trimmed}"),
                info: api.named_endpoints.get(trimmed).cloned(),
            })
        }
    }
}

//! reqwest-backed HTTP transport.

use super::{Headers, HttpReply, HttpTransport};
use crate::error::{QueueflowError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Default request timeout, generous because direct runs block until the job
/// finishes server-side.
const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// HTTP transport on a shared [`reqwest::Client`].
pub struct ReqwestTransport {
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl ReqwestTransport {
    /// Build the transport with the default timeout.
    pub fn new(auth_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .map_err(|e| QueueflowError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, auth_token })
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

async fn into_reply(response: reqwest::Response) -> Result<HttpReply> {
    let status = response.status().as_u16();
    let text = response.text().await?;
    // Error bodies are not always JSON; a null body still carries the status.
    let body = serde_json::from_str(&text).unwrap_or(Value::Null);
    Ok(HttpReply { status, body })
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(&self, url: &str, body: &Value, headers: &Headers) -> Result<HttpReply> {
        let mut req = self.apply_auth(self.client.post(url)).json(body);
        for (name, value) in headers {
            req = req.header(name, value);
        }
        into_reply(req.send().await?).await
    }

    async fn get_json(&self, url: &str) -> Result<HttpReply> {
        let req = self.apply_auth(self.client.get(url));
        into_reply(req.send().await?).await
    }
}

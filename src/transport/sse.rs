//! reqwest-eventsource-backed SSE streams.

use super::{EventStreamFactory, StreamFrame};
use crate::error::{QueueflowError, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest_eventsource::{Event as SourceEvent, EventSource};
use tracing::debug;

/// Opens SSE streams with a shared [`reqwest::Client`].
pub struct ReqwestEventStreamFactory {
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl ReqwestEventStreamFactory {
    pub fn new(auth_token: Option<String>) -> Result<Self> {
        // No overall timeout: queue streams stay open for the job's lifetime.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| QueueflowError::Config(format!("Failed to create SSE client: {e}")))?;
        Ok(Self { client, auth_token })
    }
}

fn to_frame(message: eventsource_stream::Event) -> StreamFrame {
    StreamFrame { data: message.data }
}

#[async_trait]
impl EventStreamFactory for ReqwestEventStreamFactory {
    async fn connect(&self, url: &str) -> Result<BoxStream<'static, Result<StreamFrame>>> {
        let mut req = self.client.get(url);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        let mut source =
            EventSource::new(req).map_err(|e| QueueflowError::Stream(e.to_string()))?;

        let stream = async_stream::stream! {
            while let Some(event) = source.next().await {
                match event {
                    Ok(SourceEvent::Open) => continue,
                    Ok(SourceEvent::Message(message)) => yield Ok(to_frame(message)),
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        debug!(error = %e, "SSE stream errored");
                        // Stop rather than let the source auto-reconnect; the
                        // engine decides whether a submission survives.
                        source.close();
                        yield Err(QueueflowError::Stream(e.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

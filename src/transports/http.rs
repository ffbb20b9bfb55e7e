//! Completion transport over HTTP.
//!
//! Posts the conversation as JSON to the completion endpoint and hands back
//! the raw event-stream body; decoding happens in [`crate::sse`].

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;

use crate::client::{ClientError, CompletionResponse, CompletionTransport};
use crate::http::{authorize, build_http_client};
use crate::model::CompletionRequest;
use crate::options::{ClientConfig, HttpTransport};

/// [`CompletionTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpCompletionTransport {
    client: Client,
    url: String,
    transport: HttpTransport,
}

impl HttpCompletionTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(&config.transport)?,
            url: config.chat_url()?,
            transport: config.transport.provider.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CompletionTransport for HttpCompletionTransport {
    async fn send(&self, request: &CompletionRequest) -> Result<CompletionResponse, ClientError> {
        let builder = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(request);

        let response = authorize(builder, &self.transport)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        tracing::debug!(url = %self.url, status = status.as_u16(), "Completion response received");

        let body = response
            .bytes_stream()
            .map_err(|e| ClientError::Stream(e.to_string()))
            .boxed();

        Ok(CompletionResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body: Some(body),
        })
    }
}

//! Core transport trait and error types.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::CompletionRequest;
use crate::stream::ByteStream;

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Non-success response from an endpoint.
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },

    /// The response could not be consumed (e.g. it carried no body).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reading the body failed after streaming began.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Bad or missing input; the request was never sent.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Stream cancelled")]
    StreamCancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Machine-readable code surfaced alongside the message.
    pub fn code(&self) -> Option<String> {
        let code = match self {
            ClientError::Api { code, .. } => return code.clone(),
            ClientError::Http(_) => "network_error",
            ClientError::Parse(_) => "parse_error",
            ClientError::Transport(_) => "transport_error",
            ClientError::Stream(_) => "stream_error",
            ClientError::Validation(_) => "validation_error",
            ClientError::StreamCancelled => "cancelled",
            ClientError::Config(_) => "config_error",
        };
        Some(code.to_string())
    }

    /// HTTP status of an API error, if that is what this is.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Raw response of the completion endpoint.
///
/// The body is handed over unread so the caller decides how to consume it:
/// streamed through the frame decoder on success, or collected and parsed as
/// an error document otherwise.
pub struct CompletionResponse {
    pub status: u16,
    /// Canonical reason phrase for `status` (may be empty).
    pub reason: String,
    pub body: Option<ByteStream>,
}

impl CompletionResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for CompletionResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

/// Transport used by a stream session to reach the completion endpoint.
///
/// Implement this trait to plug in a different transport. The session is
/// responsible for cancellation: it races the returned future and the body
/// stream against its cancellation token and drops them when cancelled, so an
/// implementation must release its resources on drop.
///
/// # Example
/// ```rust,ignore
/// struct Canned;
///
/// #[async_trait]
/// impl CompletionTransport for Canned {
///     async fn send(&self, _request: &CompletionRequest) -> Result<CompletionResponse, ClientError> {
///         let body = futures::stream::iter(vec![Ok(Bytes::from("data: [DONE]\n\n"))]);
///         Ok(CompletionResponse { status: 200, reason: "OK".into(), body: Some(Box::pin(body)) })
///     }
/// }
/// ```
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Issue the POST carrying the message history and return once the
    /// response head has arrived.
    async fn send(&self, request: &CompletionRequest) -> Result<CompletionResponse, ClientError>;
}

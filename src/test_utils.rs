//! In-memory transport for driving sessions deterministically in tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;

use crate::client::{ClientError, CompletionResponse, CompletionTransport};
use crate::model::CompletionRequest;
use crate::stream::ByteStream;

enum Scripted {
    Respond(CompletionResponse),
    Reject(ClientError),
    Hang,
}

/// Replays queued responses in order and records every request body.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<Value>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, status: u16, body: Option<ByteStream>) {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        self.script
            .lock()
            .push_back(Scripted::Respond(CompletionResponse {
                status,
                reason,
                body,
            }));
    }

    pub(crate) fn respond_ok(&self, body: ByteStream) {
        self.respond(200, Some(body));
    }

    pub(crate) fn reject(&self, err: ClientError) {
        self.script.lock().push_back(Scripted::Reject(err));
    }

    /// The next request never receives a response head.
    pub(crate) fn hang(&self) {
        self.script.lock().push_back(Scripted::Hang);
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn send(&self, request: &CompletionRequest) -> Result<CompletionResponse, ClientError> {
        self.requests.lock().push(serde_json::to_value(request)?);

        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Reject(err)) => Err(err),
            Some(Scripted::Hang) => futures::future::pending().await,
            None => Err(ClientError::Transport("no scripted response".to_string())),
        }
    }
}

/// A body that yields each string as one chunk, then ends.
pub(crate) fn body_of(chunks: &[&str]) -> ByteStream {
    let chunks: Vec<Result<Bytes, ClientError>> = chunks
        .iter()
        .map(|c| Ok(Bytes::from(c.to_string())))
        .collect();
    futures::stream::iter(chunks).boxed()
}

/// A body fed by the returned sender; it ends when the sender is dropped.
pub(crate) fn channel_body() -> (mpsc::UnboundedSender<Result<Bytes, ClientError>>, ByteStream) {
    let (tx, rx) = mpsc::unbounded();
    (tx, rx.boxed())
}

/// Convenience for pushing one frame through a channel body.
pub(crate) fn frame(content: &str) -> Result<Bytes, ClientError> {
    let payload = serde_json::json!({ "content": content });
    Ok(Bytes::from(format!("data: {payload}\n\n")))
}

//! One request/response cycle against the completion endpoint.
//!
//! ```text
//! Idle -> Sending -> StreamingContent -> Completed
//!            |              |
//!            +--------------+---------> Cancelled | Errored
//! ```
//!
//! `Sending` covers issuing the request, checking the status and waiting for
//! the first chunk of the body; `StreamingContent` is entered once the body
//! yields bytes. The assistant message is created as soon as a successful
//! response with a body has arrived. Failures before that point retract the
//! user message, failures after it keep whatever content was already applied.
//! Cancellation is never reported as an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;

use crate::accumulator::ContentAccumulator;
use crate::client::{ClientError, CompletionResponse, CompletionTransport};
use crate::controller::SendOutcome;
use crate::http::api_error;
use crate::model::{ChatError, CompletionRequest, Message, MessageId, Role};
use crate::sse::SseStreamExt;
use crate::store::{ConversationStore, ReaderSlot, SessionTicket};

/// Largest error body read from a failed response.
const MAX_ERROR_BODY: usize = 64 * 1024;

/// Lifecycle phase of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Sending,
    StreamingContent,
    Completed,
    Cancelled,
    Errored,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Errored)
    }
}

pub(crate) struct StreamSession {
    transport: Arc<dyn CompletionTransport>,
    store: ConversationStore,
    ticket: SessionTicket,
    /// Every phase entered so far, starting with `Idle`.
    phases: Vec<SessionPhase>,
}

impl StreamSession {
    pub(crate) fn new(
        transport: Arc<dyn CompletionTransport>,
        store: ConversationStore,
        ticket: SessionTicket,
    ) -> Self {
        Self {
            transport,
            store,
            ticket,
            phases: vec![SessionPhase::Idle],
        }
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.phases.last().copied().unwrap_or(SessionPhase::Idle)
    }

    fn transition(&mut self, next: SessionPhase) {
        tracing::debug!(
            session = self.ticket.id,
            from = ?self.phase(),
            to = ?next,
            "Session transition"
        );
        self.phases.push(next);
    }

    /// Run the session to a terminal state.
    pub(crate) async fn start(&mut self) -> SendOutcome {
        self.transition(SessionPhase::Sending);

        let request = match CompletionRequest::from_history(&self.ticket.history) {
            Ok(request) => request,
            Err(e) => return self.fail_before_content(e),
        };

        let token = self.ticket.token.clone();
        let transport = self.transport.clone();
        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            res = transport.send(&request) => Some(res),
        };
        let response = match sent {
            None => return self.cancelled(),
            Some(Err(e)) => return self.fail_before_content(e),
            Some(Ok(response)) => response,
        };

        let success = response.is_success();
        let CompletionResponse {
            status,
            reason,
            body,
        } = response;

        // The store owns the body from here on, so teardown closes it.
        let reader = match body {
            Some(body) => match self.store.attach_reader(self.ticket.id, body) {
                Some(reader) => Some(reader),
                None => return self.cancelled(),
            },
            None => None,
        };

        if !success {
            return match self.read_error(status, &reason, reader).await {
                Some(err) => self.fail_before_content(err),
                None => self.cancelled(),
            };
        }

        let Some(reader) = reader else {
            return self.fail_before_content(ClientError::Transport(
                "No response body received".to_string(),
            ));
        };

        let assistant = Message::new(Role::Assistant, "");
        let message_id = assistant.id.clone();
        if !self.store.begin_streaming(self.ticket.id, assistant) {
            return self.cancelled();
        }

        let mut accumulator =
            ContentAccumulator::initialize(self.store.clone(), self.ticket.id, message_id.clone());
        let received = Arc::new(AtomicBool::new(false));
        let seen = received.clone();
        let mut deltas = reader
            .stream()
            .inspect(move |chunk| {
                if chunk.is_ok() {
                    seen.store(true, Ordering::Relaxed);
                }
            })
            .sse_deltas();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return self.cancelled(),
                next = deltas.next() => next,
            };

            if self.phase() == SessionPhase::Sending && received.load(Ordering::Relaxed) {
                self.transition(SessionPhase::StreamingContent);
            }

            match next {
                Some(Ok(delta)) => {
                    if !accumulator.apply(&delta) {
                        return self.cancelled();
                    }
                }
                Some(Err(e)) => return self.fail_streaming(e),
                None => break,
            }
        }

        self.transition(SessionPhase::Completed);
        tracing::debug!(
            session = self.ticket.id,
            message_id = %message_id,
            length = accumulator.content().len(),
            "Stream completed"
        );
        SendOutcome::Completed { message_id }
    }

    /// Collect at most `MAX_ERROR_BODY` bytes of a failed response's body and
    /// turn them into an API error. Returns `None` if cancelled while reading.
    async fn read_error(
        &self,
        status: u16,
        reason: &str,
        reader: Option<ReaderSlot>,
    ) -> Option<ClientError> {
        let mut collected = Vec::new();

        if let Some(reader) = reader {
            let mut body = reader.stream();
            while collected.len() < MAX_ERROR_BODY {
                let next = tokio::select! {
                    biased;
                    _ = self.ticket.token.cancelled() => return None,
                    next = body.next() => next,
                };
                match next {
                    Some(Ok(chunk)) => {
                        let room = MAX_ERROR_BODY - collected.len();
                        collected.extend_from_slice(&chunk[..chunk.len().min(room)]);
                    }
                    Some(Err(_)) | None => break,
                }
            }
        }

        tracing::error!(
            session = self.ticket.id,
            status,
            body_len = collected.len(),
            "Completion request rejected"
        );
        Some(api_error(status, reason, &collected))
    }

    fn cancelled(&mut self) -> SendOutcome {
        self.transition(SessionPhase::Cancelled);
        SendOutcome::Cancelled
    }

    fn fail_before_content(&mut self, err: ClientError) -> SendOutcome {
        let user_message_id = self.ticket.user_message_id.clone();
        self.fail(err, Some(&user_message_id))
    }

    fn fail_streaming(&mut self, err: ClientError) -> SendOutcome {
        self.fail(err, None)
    }

    fn fail(&mut self, err: ClientError, retract: Option<&MessageId>) -> SendOutcome {
        if self.ticket.token.is_cancelled() {
            return self.cancelled();
        }

        let chat_error = ChatError::from_client_error(&err);
        if !self
            .store
            .record_failure(self.ticket.id, retract, chat_error.clone())
        {
            return self.cancelled();
        }

        tracing::error!(session = self.ticket.id, error = %err, "Chat error");
        self.transition(SessionPhase::Errored);
        SendOutcome::Failed(chat_error)
    }
}

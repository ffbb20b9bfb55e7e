//! Session lifecycle management for one conversation.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::client::{ClientError, CompletionTransport};
use crate::model::{ChatError, Message, MessageId, StreamingState};
use crate::options::ClientConfig;
use crate::session::StreamSession;
use crate::store::{ChatEvent, ChatSnapshot, ConversationStore, SessionId};
use crate::transports::HttpCompletionTransport;

/// Why a send was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The content was empty or whitespace only.
    Empty,
    /// Another session is still in flight.
    Busy,
}

/// How a call to [`ChatController::send_message`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// No request was issued.
    Skipped(SkipReason),
    /// The stream ended normally, via the sentinel or end of body.
    Completed { message_id: MessageId },
    /// The session was torn down before finishing. Not an error.
    Cancelled,
    /// The session failed; the same error is published in the state.
    Failed(ChatError),
}

/// Releases a session's resources when the send finishes, on every path,
/// including when the send future is dropped.
struct TeardownGuard {
    store: ConversationStore,
    session: SessionId,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        self.store.teardown_session(self.session);
    }
}

/// Drives chat sessions for a single conversation.
///
/// At most one session is in flight at a time: sends made while one is
/// active are rejected, not queued. Cloning the controller yields another
/// handle to the same conversation, so one task can cancel a send another
/// task is awaiting.
///
/// # Example
/// ```no_run
/// use chatrelay::{ChatController, ClientConfig};
///
/// # async fn demo() -> Result<(), chatrelay::ClientError> {
/// let controller = ChatController::from_config(&ClientConfig::new("http://localhost:3000"))?;
/// let mut events = controller.subscribe();
///
/// let sender = controller.clone();
/// tokio::spawn(async move { sender.send_message("How does AI work?").await });
///
/// while let Ok(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChatController {
    transport: Arc<dyn CompletionTransport>,
    store: ConversationStore,
}

impl ChatController {
    pub fn new(transport: Arc<dyn CompletionTransport>) -> Self {
        Self {
            transport,
            store: ConversationStore::new(),
        }
    }

    /// Controller talking HTTP to the configured completion endpoint.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpCompletionTransport::new(config)?;
        Ok(Self::new(Arc::new(transport)))
    }

    /// Send a user message and stream the assistant's reply into the
    /// conversation.
    ///
    /// Never fails: errors are published as the conversation's `ChatError`
    /// and reported through the returned outcome.
    pub async fn send_message(&self, content: &str) -> SendOutcome {
        let content = content.trim();
        if content.is_empty() {
            return SendOutcome::Skipped(SkipReason::Empty);
        }

        let Some(ticket) = self.store.begin_send(content) else {
            tracing::warn!("Rejected send while another session is in flight");
            return SendOutcome::Skipped(SkipReason::Busy);
        };

        let _teardown = TeardownGuard {
            store: self.store.clone(),
            session: ticket.id,
        };
        tracing::debug!(session = ticket.id, history = ticket.history.len(), "Starting session");

        let mut session = StreamSession::new(self.transport.clone(), self.store.clone(), ticket);
        session.start().await
    }

    /// Stop the active session, keeping any content it already produced.
    ///
    /// The session's response body is closed before this returns.
    pub fn cancel_stream(&self) {
        tracing::debug!("Cancelling active stream");
        self.store.teardown();
    }

    /// Stop the active session and forget the conversation.
    pub fn clear_messages(&self) {
        self.store.clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.store.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.store.snapshot()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.store.snapshot().messages
    }

    pub fn is_loading(&self) -> bool {
        self.store.is_loading()
    }

    pub fn streaming_state(&self) -> StreamingState {
        self.store.snapshot().streaming
    }

    pub fn error(&self) -> Option<ChatError> {
        self.store.snapshot().error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::test_utils::{body_of, channel_body, frame, ScriptedTransport};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn controller() -> (Arc<ScriptedTransport>, ChatController) {
        let transport = Arc::new(ScriptedTransport::new());
        let controller = ChatController::new(transport.clone());
        (transport, controller)
    }

    /// Wait until an event matching `pred` has been published.
    async fn wait_for<F>(events: &mut broadcast::Receiver<ChatEvent>, pred: F)
    where
        F: Fn(&ChatEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event");
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (_, controller) = controller();
        assert_eq!(controller.snapshot(), ChatSnapshot::default());
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn test_send_streams_reply() {
        let (transport, controller) = controller();
        transport.respond_ok(body_of(&[
            "data: {\"content\":\"Hello\"}\n\n",
            "data: {\"content\":\" world\"}\n\n",
            "data: [DONE]\n\n",
        ]));

        let outcome = controller.send_message("Test message").await;
        let messages = controller.messages();

        assert!(matches!(outcome, SendOutcome::Completed { ref message_id } if *message_id == messages[1].id));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Test message");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello world");
        assert!(!controller.is_loading());
        assert!(!controller.streaming_state().is_streaming);
        assert_eq!(controller.error(), None);
    }

    #[tokio::test]
    async fn test_user_message_is_trimmed() {
        let (transport, controller) = controller();
        transport.respond_ok(body_of(&["data: [DONE]\n\n"]));

        controller.send_message("  padded \n").await;
        assert_eq!(controller.messages()[0].content, "padded");
    }

    #[tokio::test]
    async fn test_natural_end_without_sentinel_completes() {
        let (transport, controller) = controller();
        transport.respond_ok(body_of(&["data: {\"content\":\"no sentinel\"}\n\n"]));

        let outcome = controller.send_message("hi").await;
        assert!(matches!(outcome, SendOutcome::Completed { .. }));
        assert_eq!(controller.messages()[1].content, "no sentinel");
        assert_eq!(controller.error(), None);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_invisible() {
        let (transport, controller) = controller();
        transport.respond_ok(body_of(&[
            "data: {\"content\":\"Hello\"}\n\n",
            "data: {oops}\n\n",
            "data: {\"content\":\" world\"}\n\n",
            "data: [DONE]\n\n",
        ]));

        let outcome = controller.send_message("hi").await;
        assert!(matches!(outcome, SendOutcome::Completed { .. }));
        assert_eq!(controller.messages()[1].content, "Hello world");
        assert_eq!(controller.error(), None);
    }

    #[tokio::test]
    async fn test_empty_message_is_ignored() {
        let (transport, controller) = controller();

        assert_eq!(
            controller.send_message("   ").await,
            SendOutcome::Skipped(SkipReason::Empty)
        );
        assert_eq!(controller.send_message("").await, SendOutcome::Skipped(SkipReason::Empty));
        assert_eq!(transport.request_count(), 0);
        assert!(controller.messages().is_empty());
    }

    #[tokio::test]
    async fn test_api_error_retracts_user_message() {
        let (transport, controller) = controller();
        transport.respond(500, Some(body_of(&[r#"{"error":"Server error"}"#])));

        let outcome = controller.send_message("Test message").await;
        let expected = ChatError::new("Server error", None);

        assert_eq!(outcome, SendOutcome::Failed(expected.clone()));
        assert_eq!(controller.error(), Some(expected));
        assert!(controller.messages().is_empty());
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn test_network_error_is_surfaced() {
        let (transport, controller) = controller();
        transport.reject(ClientError::Transport("Network error".to_string()));

        let outcome = controller.send_message("Test message").await;

        assert_eq!(
            controller.error().map(|e| e.message),
            Some("Network error".to_string())
        );
        assert!(matches!(outcome, SendOutcome::Failed(_)));
        assert!(controller.messages().is_empty());
    }

    #[tokio::test]
    async fn test_new_send_clears_previous_error() {
        let (transport, controller) = controller();
        transport.respond(500, Some(body_of(&[r#"{"error":"Server error"}"#])));
        transport.respond_ok(body_of(&["data: {\"content\":\"ok\"}\n\ndata: [DONE]\n\n"]));

        controller.send_message("first").await;
        assert!(controller.error().is_some());

        controller.send_message("second").await;
        assert_eq!(controller.error(), None);
        assert_eq!(controller.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_history_is_sent() {
        let (transport, controller) = controller();
        transport.respond_ok(body_of(&["data: {\"content\":\"Hi there\"}\n\ndata: [DONE]\n\n"]));
        transport.respond_ok(body_of(&["data: [DONE]\n\n"]));

        controller.send_message("Hello").await;
        controller.send_message("How are you?").await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1],
            json!({
                "messages": [
                    {"role": "user", "content": "Hello"},
                    {"role": "assistant", "content": "Hi there"},
                    {"role": "user", "content": "How are you?"}
                ]
            })
        );
    }

    #[tokio::test]
    async fn test_send_while_active_is_rejected() {
        let (transport, controller) = controller();
        let (tx, body) = channel_body();
        transport.respond_ok(body);
        let mut events = controller.subscribe();

        let first = controller.clone();
        let running = tokio::spawn(async move { first.send_message("First message").await });
        wait_for(&mut events, |e| matches!(e, ChatEvent::StreamingChanged(s) if s.is_streaming)).await;

        assert!(controller.is_loading());
        assert_eq!(
            controller.send_message("Second message").await,
            SendOutcome::Skipped(SkipReason::Busy)
        );

        tx.unbounded_send(frame("Response")).unwrap();
        drop(tx);

        assert!(matches!(running.await.unwrap(), SendOutcome::Completed { .. }));
        assert_eq!(transport.request_count(), 1);
        assert_eq!(controller.messages().len(), 2);
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_keeps_partial_content() {
        let (transport, controller) = controller();
        let (tx, body) = channel_body();
        transport.respond_ok(body);
        let mut events = controller.subscribe();

        let sender = controller.clone();
        let running = tokio::spawn(async move { sender.send_message("Test message").await });

        tx.unbounded_send(frame("Hello")).unwrap();
        wait_for(&mut events, |e| {
            matches!(e, ChatEvent::MessageUpdated { content, .. } if content == "Hello")
        })
        .await;

        controller.cancel_stream();
        // Arrives after cancellation and must not be applied.
        let _ = tx.unbounded_send(frame(" world"));

        assert_eq!(running.await.unwrap(), SendOutcome::Cancelled);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.error, None);
        assert!(!snapshot.streaming.is_streaming);
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].content, "Hello");
    }

    #[tokio::test]
    async fn test_cancel_closes_reader_before_next_send() {
        let (transport, controller) = controller();
        let (first_tx, first_body) = channel_body();
        let (second_tx, second_body) = channel_body();
        transport.respond_ok(first_body);
        transport.respond_ok(second_body);

        let mut first = Box::pin(controller.send_message("one"));
        tokio::select! {
            biased;
            _ = &mut first => panic!("first send finished early"),
            _ = tokio::task::yield_now() => {}
        }
        assert!(controller.streaming_state().is_streaming);
        assert!(!first_tx.is_closed());

        // The first session's task is never polled again, yet its reader
        // must already be gone.
        controller.cancel_stream();
        assert!(first_tx.is_closed());

        let mut second = Box::pin(controller.send_message("two"));
        tokio::select! {
            biased;
            _ = &mut second => panic!("second send finished early"),
            _ = tokio::task::yield_now() => {}
        }
        assert!(controller.streaming_state().is_streaming);
        assert!(first_tx.is_closed());
        assert!(!second_tx.is_closed());

        drop(first);
        assert!(controller.is_loading());
        drop(second);
        assert!(second_tx.is_closed());
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn test_cancel_before_response_is_silent() {
        let (transport, controller) = controller();
        transport.hang();
        let mut events = controller.subscribe();

        let sender = controller.clone();
        let running = tokio::spawn(async move { sender.send_message("Test message").await });
        wait_for(&mut events, |e| matches!(e, ChatEvent::LoadingChanged(true))).await;

        controller.cancel_stream();

        assert_eq!(running.await.unwrap(), SendOutcome::Cancelled);
        assert_eq!(controller.error(), None);
        assert!(!controller.is_loading());
        // Cancellation never retracts.
        assert_eq!(controller.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_send_after_cancel_is_not_torn_down_by_stale_session() {
        let (transport, controller) = controller();
        let (first_tx, first_body) = channel_body();
        let (second_tx, second_body) = channel_body();
        transport.respond_ok(first_body);
        transport.respond_ok(second_body);
        let mut events = controller.subscribe();

        let sender = controller.clone();
        let first = tokio::spawn(async move { sender.send_message("one").await });
        wait_for(&mut events, |e| matches!(e, ChatEvent::StreamingChanged(s) if s.is_streaming)).await;
        controller.cancel_stream();
        assert!(first_tx.is_closed());

        let sender = controller.clone();
        let second = tokio::spawn(async move { sender.send_message("two").await });
        wait_for(&mut events, |e| matches!(e, ChatEvent::StreamingChanged(s) if s.is_streaming)).await;

        assert_eq!(first.await.unwrap(), SendOutcome::Cancelled);
        assert!(controller.is_loading());
        assert!(controller.streaming_state().is_streaming);

        second_tx.unbounded_send(frame("second reply")).unwrap();
        drop(second_tx);

        assert!(matches!(second.await.unwrap(), SendOutcome::Completed { .. }));
        let messages = controller.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "");
        assert_eq!(messages[3].content, "second reply");
    }

    #[tokio::test]
    async fn test_dropping_send_future_releases_session() {
        let (transport, controller) = controller();
        transport.hang();

        let send = controller.send_message("hi");
        let timed_out = tokio::time::timeout(Duration::from_millis(20), send).await;

        assert!(timed_out.is_err());
        assert!(!controller.is_loading());
        assert!(!controller.streaming_state().is_streaming);
    }

    #[tokio::test]
    async fn test_clear_messages_resets_state() {
        let (transport, controller) = controller();
        transport.respond(500, Some(body_of(&[r#"{"error":"Server error"}"#])));
        transport.respond_ok(body_of(&["data: {\"content\":\"kept\"}\n\ndata: [DONE]\n\n"]));

        controller.send_message("fails").await;
        controller.send_message("works").await;
        assert!(!controller.messages().is_empty());

        controller.clear_messages();

        assert_eq!(controller.snapshot(), ChatSnapshot::default());
    }

    #[tokio::test]
    async fn test_clear_messages_during_stream() {
        let (transport, controller) = controller();
        let (tx, body) = channel_body();
        transport.respond_ok(body);
        let mut events = controller.subscribe();

        let sender = controller.clone();
        let running = tokio::spawn(async move { sender.send_message("hi").await });
        tx.unbounded_send(frame("partial")).unwrap();
        wait_for(&mut events, |e| matches!(e, ChatEvent::MessageUpdated { .. })).await;

        controller.clear_messages();

        assert_eq!(running.await.unwrap(), SendOutcome::Cancelled);
        assert_eq!(controller.snapshot(), ChatSnapshot::default());
    }

    #[tokio::test]
    async fn test_stream_error_keeps_turns() {
        let (transport, controller) = controller();
        let (tx, body) = channel_body();
        transport.respond_ok(body);
        let mut events = controller.subscribe();

        let sender = controller.clone();
        let running = tokio::spawn(async move { sender.send_message("hi").await });
        tx.unbounded_send(frame("partial")).unwrap();
        wait_for(&mut events, |e| matches!(e, ChatEvent::MessageUpdated { .. })).await;
        tx.unbounded_send(Err(ClientError::Stream("connection reset".to_string())))
            .unwrap();

        assert!(matches!(running.await.unwrap(), SendOutcome::Failed(_)));
        let snapshot = controller.snapshot();
        assert_eq!(
            snapshot.error.map(|e| e.message),
            Some("connection reset".to_string())
        );
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].content, "partial");
        assert!(!snapshot.streaming.is_streaming);
    }
}

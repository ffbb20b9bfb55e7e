//! Observable conversation state.
//!
//! The store owns the message list, the streaming/loading flags, the
//! surfaced error and the handle of the single active session. Only the
//! controller and the session it runs write to it; every write is published
//! as a [`ChatEvent`].

use std::sync::Arc;
use std::task::Poll;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::model::{ChatError, Message, MessageId, Role, StreamingState};
use crate::stream::ByteStream;

const EVENT_CAPACITY: usize = 1024;

/// Identifies one send within a conversation.
pub(crate) type SessionId = u64;

/// A discrete, observable state change.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    MessageAppended(Message),
    MessageUpdated { id: MessageId, content: String },
    MessageRemoved(MessageId),
    MessagesCleared,
    StreamingChanged(StreamingState),
    LoadingChanged(bool),
    ErrorChanged(Option<ChatError>),
}

/// Point-in-time copy of the conversation state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSnapshot {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub streaming: StreamingState,
    pub error: Option<ChatError>,
}

/// Response body of a session, shared with the store so that teardown can
/// close it without waiting for the session task to run again.
#[derive(Clone, Default)]
pub(crate) struct ReaderSlot(Arc<Mutex<Option<ByteStream>>>);

impl ReaderSlot {
    /// Drop the body. Returns whether one was open.
    fn close(&self) -> bool {
        self.0.lock().take().is_some()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.0.lock().is_some()
    }

    /// Read the body through the slot. Ends as soon as the slot is closed.
    pub(crate) fn stream(&self) -> ByteStream {
        let slot = self.0.clone();
        stream::poll_fn(move |cx| match slot.lock().as_mut() {
            Some(body) => body.poll_next_unpin(cx),
            None => Poll::Ready(None),
        })
        .boxed()
    }
}

impl std::fmt::Debug for ReaderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReaderSlot").field(&self.is_open()).finish()
    }
}

/// Live resources of one in-flight request.
#[derive(Debug)]
struct SessionHandle {
    id: SessionId,
    token: CancellationToken,
    reader: ReaderSlot,
}

/// What a newly admitted send needs to run its session.
#[derive(Debug)]
pub(crate) struct SessionTicket {
    pub id: SessionId,
    pub token: CancellationToken,
    pub user_message_id: MessageId,
    /// Prior messages plus the new user message.
    pub history: Vec<Message>,
}

struct Inner {
    messages: Vec<Message>,
    is_loading: bool,
    streaming: StreamingState,
    error: Option<ChatError>,
    active: Option<SessionHandle>,
    next_session: SessionId,
    events: broadcast::Sender<ChatEvent>,
}

impl Inner {
    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn is_active(&self, session: SessionId) -> bool {
        self.active.as_ref().is_some_and(|h| h.id == session)
    }

    fn set_error(&mut self, error: Option<ChatError>) {
        if self.error != error {
            self.error = error.clone();
            self.emit(ChatEvent::ErrorChanged(error));
        }
    }

    /// Release the active handle (if any) and reset the transient flags.
    /// Safe to call any number of times.
    ///
    /// The body reader is dropped here, under the lock, so it is closed
    /// before any later session can be admitted.
    fn teardown(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.token.cancel();
            let closed_reader = handle.reader.close();
            tracing::debug!(session = handle.id, closed_reader, "Released session resources");
        }
        if self.streaming != StreamingState::default() {
            self.streaming = StreamingState::default();
            self.emit(ChatEvent::StreamingChanged(StreamingState::default()));
        }
        if self.is_loading {
            self.is_loading = false;
            self.emit(ChatEvent::LoadingChanged(false));
        }
    }
}

/// Shared handle to one conversation's state.
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                messages: Vec::new(),
                is_loading: false,
                streaming: StreamingState::default(),
                error: None,
                active: None,
                next_session: 1,
                events,
            })),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.lock().events.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let inner = self.inner.lock();
        ChatSnapshot {
            messages: inner.messages.clone(),
            is_loading: inner.is_loading,
            streaming: inner.streaming.clone(),
            error: inner.error.clone(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.inner.lock().is_loading
    }

    /// Admit a new send, unless one is already in flight.
    ///
    /// Tears down any leftover handle, clears the error, appends the user
    /// message and registers a fresh session handle, all under one lock.
    pub(crate) fn begin_send(&self, content: &str) -> Option<SessionTicket> {
        let mut inner = self.inner.lock();
        if inner.is_loading {
            return None;
        }

        inner.teardown();
        inner.set_error(None);

        let user_message = Message::new(Role::User, content);
        let user_message_id = user_message.id.clone();
        inner.messages.push(user_message.clone());
        inner.emit(ChatEvent::MessageAppended(user_message));

        inner.is_loading = true;
        inner.emit(ChatEvent::LoadingChanged(true));

        let id = inner.next_session;
        inner.next_session += 1;
        let token = CancellationToken::new();
        inner.active = Some(SessionHandle {
            id,
            token: token.clone(),
            reader: ReaderSlot::default(),
        });

        Some(SessionTicket {
            id,
            token,
            user_message_id,
            history: inner.messages.clone(),
        })
    }

    /// Hand the response body to the session handle.
    ///
    /// Returns the slot to read it through, or `None` (dropping the body) if
    /// `session` is no longer the active one.
    pub(crate) fn attach_reader(&self, session: SessionId, body: ByteStream) -> Option<ReaderSlot> {
        let inner = self.inner.lock();
        let handle = inner.active.as_ref().filter(|h| h.id == session)?;
        *handle.reader.0.lock() = Some(body);
        Some(handle.reader.clone())
    }

    /// Append the assistant message and mark it as streaming.
    ///
    /// Returns `false` if `session` is no longer the active one.
    pub(crate) fn begin_streaming(&self, session: SessionId, message: Message) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_active(session) {
            return false;
        }

        let streaming = StreamingState::streaming(message.id.clone());
        inner.messages.push(message.clone());
        inner.emit(ChatEvent::MessageAppended(message));
        inner.streaming = streaming.clone();
        inner.emit(ChatEvent::StreamingChanged(streaming));
        true
    }

    /// Replace the content of a streaming message.
    ///
    /// Returns `false` (and changes nothing) if `session` is no longer active
    /// or the message is gone.
    pub(crate) fn set_content(&self, session: SessionId, id: &MessageId, content: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_active(session) {
            return false;
        }

        let Some(message) = inner.messages.iter_mut().find(|m| &m.id == id) else {
            return false;
        };
        message.content.clear();
        message.content.push_str(content);
        inner.emit(ChatEvent::MessageUpdated {
            id: id.clone(),
            content: content.to_string(),
        });
        true
    }

    /// Publish a session failure, retracting `retract` if given.
    ///
    /// Returns `false` if `session` was already torn down, in which case the
    /// failure is not surfaced.
    pub(crate) fn record_failure(
        &self,
        session: SessionId,
        retract: Option<&MessageId>,
        error: ChatError,
    ) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_active(session) {
            return false;
        }

        inner.set_error(Some(error));
        if let Some(id) = retract {
            let before = inner.messages.len();
            inner.messages.retain(|m| &m.id != id);
            if inner.messages.len() != before {
                inner.emit(ChatEvent::MessageRemoved(id.clone()));
            }
        }
        true
    }

    /// Tear down whatever session is active.
    pub(crate) fn teardown(&self) {
        self.inner.lock().teardown();
    }

    /// Tear down `session` if it is still the active one.
    pub(crate) fn teardown_session(&self, session: SessionId) {
        let mut inner = self.inner.lock();
        if inner.is_active(session) {
            inner.teardown();
        }
    }

    /// Tear down any session, empty the message list and clear the error.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.teardown();
        inner.messages.clear();
        inner.emit(ChatEvent::MessagesCleared);
        inner.set_error(None);
    }
}

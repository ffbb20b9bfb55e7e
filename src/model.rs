//! Conversation data models shared by the stream controller and its observers.

use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

use crate::client::ClientError;

/// Role of the message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Opaque, unique identifier of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a new identifier, prefixed with the role that owns it
    /// (`user-…`, `assistant-…`).
    pub fn generate(role: Role) -> Self {
        let prefix = match role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        Self(format!("{prefix}-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One turn in a conversation.
///
/// `content` only grows while the message is being streamed and is left alone
/// once its session reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with a freshly generated id and the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(role),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Reduce to the `{role, content}` pair sent to the completion endpoint.
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Transient status of the active session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingState {
    pub is_streaming: bool,
    pub current_message_id: Option<MessageId>,
}

impl StreamingState {
    pub fn streaming(message_id: MessageId) -> Self {
        Self {
            is_streaming: true,
            current_message_id: Some(message_id),
        }
    }
}

/// A failure surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatError {
    pub message: String,
    pub code: Option<String>,
}

impl ChatError {
    pub fn new(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    /// Convert a client failure into its displayable form.
    ///
    /// API messages are kept verbatim; an empty message falls back to
    /// `"Failed to send message"`.
    pub fn from_client_error(err: &ClientError) -> Self {
        let message = match err {
            ClientError::Api { message, .. } => message.clone(),
            ClientError::Transport(message)
            | ClientError::Stream(message)
            | ClientError::Validation(message)
            | ClientError::Config(message) => message.clone(),
            other => other.to_string(),
        };
        let message = if message.trim().is_empty() {
            "Failed to send message".to_string()
        } else {
            message
        };

        Self {
            message,
            code: err.code(),
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A message as transmitted to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

/// Body of a completion request: the full history, never empty.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    #[serde(serialize_with = "serialize_history")]
    pub messages: NonEmpty<WireMessage>,
}

impl CompletionRequest {
    /// Build a request from the conversation history.
    pub fn from_history(messages: &[Message]) -> Result<Self, ClientError> {
        let wire = messages.iter().map(Message::to_wire).collect();
        NonEmpty::from_vec(wire)
            .map(|messages| Self { messages })
            .ok_or_else(|| ClientError::Validation("Messages array is required".to_string()))
    }
}

fn serialize_history<S: Serializer>(
    messages: &NonEmpty<WireMessage>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(messages.iter())
}

/// One `data:` payload of the completion stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeltaPayload {
    #[serde(default)]
    pub content: Option<String>,
}

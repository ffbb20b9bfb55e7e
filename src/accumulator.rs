//! Content accumulation for the assistant message being streamed.

use crate::model::MessageId;
use crate::store::{ConversationStore, SessionId};

/// Owns the growing text of one streaming assistant message.
///
/// Every applied delta is written through to the message in the store
/// (which publishes a `MessageUpdated` event) before `apply` returns. Deltas
/// are concatenated in call order; ordering is the caller's job.
pub(crate) struct ContentAccumulator {
    store: ConversationStore,
    session: SessionId,
    message_id: MessageId,
    content: String,
}

impl ContentAccumulator {
    /// Start tracking an empty content string for `message_id`.
    pub(crate) fn initialize(
        store: ConversationStore,
        session: SessionId,
        message_id: MessageId,
    ) -> Self {
        Self {
            store,
            session,
            message_id,
            content: String::new(),
        }
    }

    /// Append `delta` and publish the new content.
    ///
    /// Returns `false`, leaving the content untouched, once the owning
    /// session is no longer active.
    pub(crate) fn apply(&mut self, delta: &str) -> bool {
        let applied = self.content.len();
        self.content.push_str(delta);

        if self
            .store
            .set_content(self.session, &self.message_id, &self.content)
        {
            true
        } else {
            self.content.truncate(applied);
            false
        }
    }

    pub(crate) fn content(&self) -> &str {
        &self.content
    }
}

//! Store change notifications.
//!
//! The store publishes a [`StoreChange`] after every committed mutation.
//! Observers re-read whatever they display; a change never carries state that
//! could drift from the store.

use switchboard_proto::{ConversationId, MessageId};

/// What changed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// The conversation list was replaced by a bulk load.
    ConversationsReplaced {
        /// Number of conversations now listed.
        count: usize,
    },

    /// The selected conversation changed, or was dropped.
    SelectionChanged {
        /// New selection.
        selected: Option<ConversationId>,
    },

    /// A message was appended to a conversation.
    MessageAppended {
        /// Target conversation.
        conversation_id: ConversationId,
        /// Appended message.
        message_id: MessageId,
    },

    /// Summary fields or message status of a conversation changed.
    ConversationUpdated {
        /// Changed conversation.
        conversation_id: ConversationId,
    },

    /// All state was dropped (session ended).
    Reset,
}

//! Event dispatcher.
//!
//! Decodes inbound stream frames into [`PushEvent`]s and routes each to the
//! store operation for its kind. A frame that cannot be decoded is logged and
//! dropped; nothing a frame contains can fail the connection that carried it.

use switchboard_proto::{EventKind, ProtocolError, PushEvent};

use crate::store::ConversationStore;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The event changed the store.
    Applied {
        /// Event kind
        kind: EventKind,
    },
    /// The event was valid but already reflected in the store.
    NoChange {
        /// Event kind
        kind: EventKind,
    },
    /// The event has no store effect (keepalive reply, unknown kind).
    Ignored {
        /// Wire kind as received
        kind: String,
    },
    /// The frame could not be decoded.
    Dropped {
        /// Decode failure
        error: ProtocolError,
    },
}

impl DispatchOutcome {
    /// Whether the store changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Routes push events into a [`ConversationStore`].
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    store: ConversationStore,
}

impl EventDispatcher {
    /// Dispatcher feeding `store`.
    pub fn new(store: ConversationStore) -> Self {
        Self { store }
    }

    /// Decode and apply one raw frame.
    pub fn dispatch(&self, frame: &str) -> DispatchOutcome {
        match PushEvent::decode(frame) {
            Ok(event) => self.apply(event),
            Err(error) => {
                tracing::warn!(%error, len = frame.len(), "dropping malformed push event");
                DispatchOutcome::Dropped { error }
            },
        }
    }

    /// Apply a decoded event.
    pub fn apply(&self, event: PushEvent) -> DispatchOutcome {
        let (kind, changed) = match event {
            PushEvent::MessageCreated(body) => {
                (EventKind::MessageCreated, self.store.append_message(&body.conversation_id, body.message))
            },
            PushEvent::MessageStatus(body) => (
                EventKind::MessageStatus,
                self.store.update_delivery_status(&body.conversation_id, &body.message_id, body.status),
            ),
            PushEvent::ConversationAssigned(body) => {
                (EventKind::ConversationAssigned, self.store.assign(&body.conversation_id, body.assignee))
            },
            PushEvent::ConversationRead(body) => {
                (EventKind::ConversationRead, self.store.mark_read_local(&body.conversation_id))
            },
            PushEvent::Pong => {
                tracing::trace!("keepalive acknowledged");
                return DispatchOutcome::Ignored { kind: EventKind::Pong.as_str().to_owned() };
            },
            PushEvent::Unknown { kind } => {
                tracing::debug!(%kind, "ignoring unknown push event");
                return DispatchOutcome::Ignored { kind };
            },
        };

        tracing::trace!(kind = kind.as_str(), changed, "push event applied");
        if changed { DispatchOutcome::Applied { kind } } else { DispatchOutcome::NoChange { kind } }
    }
}

//! Conversation store.
//!
//! [`ConversationStore`] is the single source of truth for conversations and
//! the selection. It owns an [`Inbox`] behind a short-lived lock, calls the
//! REST collaborator without holding it, and commits results atomically once
//! a response arrives. Every committed mutation is published as a
//! [`StoreChange`] before the lock is released, so observers see changes in
//! commit order.
//!
//! Responses are never cancelled: a fetch that resolves after the user moved
//! on is still merged. Merges are idempotent, so the worst outcome is a
//! redundant update. A response that resolves after the session ended is
//! discarded instead; see [`StoreError::SessionChanged`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use switchboard_client::{ApiError, ConversationApi};
use switchboard_core::CredentialGate;
use switchboard_proto::{
    Assignment, Conversation, ConversationFilter, ConversationId, ConversationSummary,
    DeliveryStatus, Message, MessageId,
};
use tokio::sync::broadcast;

use crate::{change::StoreChange, error::StoreError, inbox::Inbox};

/// Capacity of the change channel. Slow observers see `Lagged` and re-read.
const CHANGE_CAPACITY: usize = 256;

struct StoreInner {
    api: Arc<dyn ConversationApi>,
    gate: CredentialGate,
    inbox: Mutex<Inbox>,
    changes: broadcast::Sender<StoreChange>,
}

/// Shared handle to the conversation store.
///
/// Cheap to clone; all clones see the same state.
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inbox = self.lock();
        f.debug_struct("ConversationStore")
            .field("conversations", &inbox.conversations().len())
            .field("selected", &inbox.selected_id())
            .field("session", &inbox.session())
            .finish_non_exhaustive()
    }
}

impl ConversationStore {
    /// Empty store backed by `api`.
    ///
    /// Authentication failures from `api` clear `gate`.
    pub fn new(api: Arc<dyn ConversationApi>, gate: CredentialGate) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(StoreInner { api, gate, inbox: Mutex::new(Inbox::new()), changes }),
        }
    }

    /// Replace the conversation list with the server's view under `filter`.
    ///
    /// On failure the store is unchanged.
    pub async fn load_conversations(
        &self,
        filter: ConversationFilter,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let session = self.lock().session();
        let list = self
            .inner
            .api
            .list_conversations(&filter)
            .await
            .map_err(|source| self.fail(StoreError::Load { source }))?;

        tracing::debug!(count = list.len(), ?filter, "conversations loaded");
        let mut inbox = self.lock_session(session)?;
        let changes = inbox.replace_conversations(filter, list);
        self.publish(changes);
        Ok(inbox.conversations().to_vec())
    }

    /// Reload with the filter of the last load.
    pub async fn refresh(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let filter = self.lock().filter();
        self.load_conversations(filter).await
    }

    /// Fetch `id` and make it the selected conversation.
    ///
    /// An id that is not listed triggers a refresh first; only if it is still
    /// missing afterwards does selection fail with [`StoreError::NotFound`].
    /// On success the conversation is marked read, best effort.
    pub async fn select_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Conversation, StoreError> {
        let listed = self.lock().contains(id);
        if !listed {
            tracing::info!(conversation = %id, "selecting unlisted conversation, refreshing");
            self.refresh().await?;
            let healed = self.lock().contains(id);
            if !healed {
                return Err(StoreError::NotFound { id: id.clone() });
            }
        }

        let session = self.lock().session();
        let fetched = self
            .inner
            .api
            .fetch_conversation(id)
            .await
            .map_err(|source| self.fail(StoreError::Fetch { id: id.clone(), source }))?;

        if &fetched.summary.id != id {
            tracing::warn!(
                requested = %id,
                returned = %fetched.summary.id,
                "fetched conversation id mismatch"
            );
            return Err(StoreError::Fetch {
                id: id.clone(),
                source: ApiError::Decode(format!("expected conversation {id}")),
            });
        }

        let selected = {
            let mut inbox = self.lock_session(session)?;
            let changes = inbox.select_fetched(fetched);
            self.publish(changes);
            inbox.selected()
        };

        self.mark_read_remote(id).await;

        selected.ok_or_else(|| StoreError::NotFound { id: id.clone() })
    }

    /// Send `content` to `id` and merge the created message.
    ///
    /// No local copy exists until the server confirms; a push for the same
    /// message id, before or after, is deduplicated. If the session ends
    /// while the request is in flight the message may have been delivered,
    /// but it is not merged and [`StoreError::SessionChanged`] is returned.
    pub async fn send_message(
        &self,
        id: &ConversationId,
        content: &str,
    ) -> Result<Message, StoreError> {
        let session = self.lock().session();
        let mut message = self
            .inner
            .api
            .send_message(id, content)
            .await
            .map_err(|source| self.fail(StoreError::Send { id: id.clone(), source }))?;

        message.status = message.status.or(Some(DeliveryStatus::Confirmed));
        tracing::debug!(conversation = %id, message = %message.id, "message sent");

        let mut inbox = self.lock_session(session)?;
        let change = inbox.append_message(id, message.clone());
        self.publish_one(change);
        Ok(message)
    }

    /// Idempotent append. Returns `true` if the message was new.
    pub fn append_message(&self, conversation_id: &ConversationId, message: Message) -> bool {
        let mut inbox = self.lock();
        let change = inbox.append_message(conversation_id, message);
        self.publish_one(change)
    }

    /// Set the delivery status of a known message. Returns `true` on change.
    pub fn update_delivery_status(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        status: DeliveryStatus,
    ) -> bool {
        let mut inbox = self.lock();
        let change = inbox.update_delivery_status(conversation_id, message_id, status);
        self.publish_one(change)
    }

    /// Change the owner of a listed conversation. Returns `true` on change.
    pub fn assign(&self, conversation_id: &ConversationId, assignee: Option<Assignment>) -> bool {
        let mut inbox = self.lock();
        let change = inbox.assign(conversation_id, assignee);
        self.publish_one(change)
    }

    /// Zero the local unread counter. Returns `true` on change.
    pub fn mark_read_local(&self, conversation_id: &ConversationId) -> bool {
        let mut inbox = self.lock();
        let change = inbox.mark_read(conversation_id);
        self.publish_one(change)
    }

    /// Drop the selection. Returns `true` if something was selected.
    pub fn clear_selection(&self) -> bool {
        let mut inbox = self.lock();
        let change = inbox.clear_selection();
        self.publish_one(change)
    }

    /// Drop all state and start a new session.
    ///
    /// Requests issued before the reset no longer commit.
    pub fn reset(&self) {
        let mut inbox = self.lock();
        let change = inbox.reset();
        tracing::info!(session = inbox.session(), "conversation store reset");
        self.publish(vec![change]);
    }

    /// Listed conversations, in server order.
    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.lock().conversations().to_vec()
    }

    /// Summary of `id`, if listed.
    pub fn conversation(&self, id: &ConversationId) -> Option<ConversationSummary> {
        self.lock().conversation(id).cloned()
    }

    /// The selected conversation with its messages.
    pub fn selected(&self) -> Option<Conversation> {
        self.lock().selected()
    }

    /// Id of the selected conversation.
    pub fn selected_id(&self) -> Option<ConversationId> {
        self.lock().selected_id().cloned()
    }

    /// Locally known messages of `id`.
    pub fn messages(&self, id: &ConversationId) -> Vec<Message> {
        self.lock().messages(id).to_vec()
    }

    /// Consistent copy of the whole state.
    pub fn snapshot(&self) -> Inbox {
        self.lock().clone()
    }

    /// Receive a [`StoreChange`] after every committed mutation.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }

    async fn mark_read_remote(&self, id: &ConversationId) {
        match self.inner.api.mark_read(id).await {
            Ok(()) => tracing::trace!(conversation = %id, "marked read"),
            Err(error) if error.is_unauthorized() => {
                tracing::warn!(conversation = %id, "mark read rejected, ending session");
                self.inner.gate.clear();
            },
            Err(error) => {
                tracing::warn!(conversation = %id, %error, "mark read failed, ignoring");
            },
        }
    }

    fn fail(&self, error: StoreError) -> StoreError {
        if error.is_unauthorized() {
            tracing::warn!(%error, "request rejected, ending session");
            self.inner.gate.clear();
        } else {
            tracing::warn!(%error, "store operation failed");
        }
        error
    }

    fn lock(&self) -> MutexGuard<'_, Inbox> {
        // Inbox mutations never panic midway, so a poisoned lock still holds
        // consistent state.
        self.inner.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock for committing a response to a request issued during `session`.
    fn lock_session(&self, session: u64) -> Result<MutexGuard<'_, Inbox>, StoreError> {
        let inbox = self.lock();
        if inbox.session() == session {
            Ok(inbox)
        } else {
            tracing::info!(
                issued = session,
                current = inbox.session(),
                "discarding response from an ended session"
            );
            Err(StoreError::SessionChanged)
        }
    }

    // Called with the inbox lock held; `broadcast::send` never blocks.
    fn publish_one(&self, change: Option<StoreChange>) -> bool {
        match change {
            Some(change) => {
                self.publish(vec![change]);
                true
            },
            None => false,
        }
    }

    fn publish(&self, changes: Vec<StoreChange>) {
        for change in changes {
            // No receivers is fine; observers are optional.
            let _ = self.inner.changes.send(change);
        }
    }
}

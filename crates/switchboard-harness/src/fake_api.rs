//! In-memory conversation backend.
//!
//! [`FakeApi`] implements [`ConversationApi`] over a server-side conversation
//! table. Tests seed the table, inject failures and latency per operation,
//! and inspect the recorded calls afterwards. Latency uses tokio's clock, so
//! paused-time tests control exactly when a response resolves.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use switchboard_client::{ApiError, ConversationApi};
use switchboard_proto::{
    Conversation, ConversationFilter, ConversationId, ConversationSummary, DeliveryStatus, Message,
    MessageId, SenderRole,
};

/// REST operation selector for failure and latency injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `list_conversations`
    List,
    /// `fetch_conversation`
    Fetch,
    /// `send_message`
    Send,
    /// `mark_read`
    MarkRead,
}

/// One recorded REST call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    /// List under a filter.
    List(ConversationFilter),
    /// Fetch one conversation.
    Fetch(ConversationId),
    /// Send a message.
    Send(ConversationId, String),
    /// Mark a conversation read.
    MarkRead(ConversationId),
}

impl ApiCall {
    /// Operation of this call.
    pub fn op(&self) -> Op {
        match self {
            Self::List(_) => Op::List,
            Self::Fetch(_) => Op::Fetch,
            Self::Send(..) => Op::Send,
            Self::MarkRead(_) => Op::MarkRead,
        }
    }
}

#[derive(Default)]
struct Backend {
    conversations: Vec<Conversation>,
    failures: HashMap<Op, VecDeque<ApiError>>,
    latency: HashMap<Op, Duration>,
    calls: Vec<ApiCall>,
    sent: u64,
}

/// Scriptable in-memory [`ConversationApi`].
#[derive(Default)]
pub struct FakeApi {
    backend: Mutex<Backend>,
}

impl FakeApi {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend seeded with `conversations`, in list order.
    pub fn with_conversations(conversations: impl IntoIterator<Item = Conversation>) -> Self {
        let api = Self::new();
        for conversation in conversations {
            api.insert(conversation);
        }
        api
    }

    /// Add or replace a server-side conversation.
    pub fn insert(&self, conversation: Conversation) {
        let mut backend = self.lock();
        let id = conversation.summary.id.clone();
        match backend.conversations.iter_mut().find(|c| c.summary.id == id) {
            Some(existing) => *existing = conversation,
            None => backend.conversations.push(conversation),
        }
    }

    /// Remove a server-side conversation.
    pub fn remove(&self, id: &ConversationId) -> bool {
        let mut backend = self.lock();
        let before = backend.conversations.len();
        backend.conversations.retain(|c| &c.summary.id != id);
        backend.conversations.len() != before
    }

    /// Fail the next call to `op` with `error`. Queued failures are consumed
    /// in order.
    pub fn fail_next(&self, op: Op, error: ApiError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Delay every call to `op` by `latency` before it resolves.
    pub fn set_latency(&self, op: Op, latency: Duration) {
        self.lock().latency.insert(op, latency);
    }

    /// Every call so far, in arrival order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Number of calls to `op` so far.
    pub fn calls_to(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    /// Server-side copy of `id`.
    pub fn server_conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.lock().conversations.iter().find(|c| &c.summary.id == id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, call: ApiCall) -> Result<(), ApiError> {
        let op = call.op();
        let (latency, failure) = {
            let mut backend = self.lock();
            backend.calls.push(call);
            let failure = backend.failures.get_mut(&op).and_then(VecDeque::pop_front);
            (backend.latency.get(&op).copied(), failure)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(error) => {
                tracing::debug!(?op, %error, "injected failure");
                Err(error)
            },
            None => Ok(()),
        }
    }
}

fn not_found(id: &ConversationId) -> ApiError {
    ApiError::Status { status: 404, message: format!("conversation {id} not found") }
}

fn matches(filter: &ConversationFilter, summary: &ConversationSummary) -> bool {
    filter.channel.is_none_or(|c| c == summary.channel)
        && filter.status.is_none_or(|s| s == summary.status)
}

#[async_trait]
impl ConversationApi for FakeApi {
    async fn list_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        self.enter(ApiCall::List(*filter)).await?;
        Ok(self
            .lock()
            .conversations
            .iter()
            .map(|c| &c.summary)
            .filter(|s| matches(filter, s))
            .cloned()
            .collect())
    }

    async fn fetch_conversation(&self, id: &ConversationId) -> Result<Conversation, ApiError> {
        self.enter(ApiCall::Fetch(id.clone())).await?;
        self.server_conversation(id).ok_or_else(|| not_found(id))
    }

    async fn send_message(&self, id: &ConversationId, content: &str) -> Result<Message, ApiError> {
        self.enter(ApiCall::Send(id.clone(), content.to_owned())).await?;

        let mut backend = self.lock();
        backend.sent += 1;
        let message = Message {
            id: MessageId::new(format!("sent-{}", backend.sent)),
            sender: SenderRole::Agent,
            content: content.to_owned(),
            timestamp: Utc::now(),
            status: Some(DeliveryStatus::Confirmed),
        };
        let conversation =
            backend.conversations.iter_mut().find(|c| &c.summary.id == id).ok_or_else(|| not_found(id))?;
        conversation.summary.record_last_message(&message);
        conversation.messages.push(message.clone());
        Ok(message)
    }

    async fn mark_read(&self, id: &ConversationId) -> Result<(), ApiError> {
        self.enter(ApiCall::MarkRead(id.clone())).await?;
        let mut backend = self.lock();
        let conversation =
            backend.conversations.iter_mut().find(|c| &c.summary.id == id).ok_or_else(|| not_found(id))?;
        conversation.summary.unread_count = 0;
        Ok(())
    }
}

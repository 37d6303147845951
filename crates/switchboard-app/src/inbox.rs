//! Inbox state.
//!
//! Pure, synchronous model of every conversation the session knows about.
//! [`crate::ConversationStore`] wraps it with REST calls and change
//! notifications; all merge rules live here so they can be tested without a
//! runtime.
//!
//! # Layout
//!
//! Summaries (the inbox list) and threads (message sequences) are kept in
//! separate structures keyed by conversation id. The selected conversation is
//! only an id: its view is assembled from the summary and the thread with that
//! id, so "the list entry" and "the open conversation" are one entity and
//! cannot diverge.
//!
//! # Invariants
//!
//! - The selected id, if any, names a listed conversation
//! - Message ids are unique within a thread
//! - A listed conversation's `last_message_at` is never older than the newest
//!   message in its thread

use std::collections::{HashMap, HashSet};

use switchboard_proto::{
    Assignment, Conversation, ConversationFilter, ConversationId, ConversationSummary,
    DeliveryStatus, Message, MessageId, SenderRole,
};

use crate::change::StoreChange;

/// Ordered, id-deduplicated message sequence of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Thread {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl Thread {
    /// Append `message` unless its id is already present.
    ///
    /// Returns `true` if the message was appended.
    pub fn push(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Messages in append order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether a message with `id` is present.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the thread has no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Message with the latest timestamp. Ties go to the later append.
    pub fn newest(&self) -> Option<&Message> {
        self.messages.iter().max_by_key(|m| m.timestamp)
    }

    fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }
}

/// Conversation state for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inbox {
    summaries: Vec<ConversationSummary>,
    threads: HashMap<ConversationId, Thread>,
    selected: Option<ConversationId>,
    filter: ConversationFilter,
    session: u64,
}

impl Inbox {
    /// Empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listed conversations, in server order.
    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    /// Summary for `id`, if listed.
    pub fn conversation(&self, id: &ConversationId) -> Option<&ConversationSummary> {
        self.summaries.iter().find(|s| &s.id == id)
    }

    /// Whether `id` is listed.
    pub fn contains(&self, id: &ConversationId) -> bool {
        self.conversation(id).is_some()
    }

    /// Locally known messages of `id`.
    pub fn messages(&self, id: &ConversationId) -> &[Message] {
        self.threads.get(id).map(Thread::messages).unwrap_or_default()
    }

    /// Thread of `id`, if any message is known.
    pub fn thread(&self, id: &ConversationId) -> Option<&Thread> {
        self.threads.get(id)
    }

    /// Every known thread, listed or not.
    pub fn threads(&self) -> impl Iterator<Item = (&ConversationId, &Thread)> {
        self.threads.iter()
    }

    /// Session generation. Bumped by every [`Self::reset`].
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Id of the selected conversation.
    pub fn selected_id(&self) -> Option<&ConversationId> {
        self.selected.as_ref()
    }

    /// The selected conversation, assembled from its summary and thread.
    pub fn selected(&self) -> Option<Conversation> {
        let id = self.selected.as_ref()?;
        let summary = self.conversation(id)?.clone();
        Some(Conversation { summary, messages: self.messages(id).to_vec() })
    }

    /// Filter used by the last bulk load.
    pub fn filter(&self) -> ConversationFilter {
        self.filter
    }

    /// Replace the conversation list with a bulk load result.
    ///
    /// Only summary fields come from `list`. Local threads of conversations
    /// that are still listed are kept, and a preview already advanced by a
    /// newer local message is not regressed. Threads of conversations that
    /// are no longer listed are dropped, and so is the selection if it points
    /// at one of them.
    pub fn replace_conversations(
        &mut self,
        filter: ConversationFilter,
        list: Vec<ConversationSummary>,
    ) -> Vec<StoreChange> {
        let mut summaries: Vec<ConversationSummary> = Vec::with_capacity(list.len());
        for mut summary in list {
            if summaries.iter().any(|s| s.id == summary.id) {
                tracing::debug!(conversation = %summary.id, "duplicate list entry skipped");
                continue;
            }
            if let Some(newest) = self.threads.get(&summary.id).and_then(Thread::newest)
                && is_newer(newest, &summary)
            {
                summary.record_last_message(newest);
            }
            if self.selected.as_ref() == Some(&summary.id) {
                summary.unread_count = 0;
            }
            summaries.push(summary);
        }

        self.threads.retain(|id, _| summaries.iter().any(|s| &s.id == id));
        self.summaries = summaries;
        self.filter = filter;

        let mut changes = vec![StoreChange::ConversationsReplaced { count: self.summaries.len() }];
        if let Some(selected) = &self.selected
            && !self.contains(selected)
        {
            tracing::info!(conversation = %selected, "selected conversation no longer listed");
            self.selected = None;
            changes.push(StoreChange::SelectionChanged { selected: None });
        }
        changes
    }

    /// Merge a fetched conversation and select it.
    ///
    /// Fetched messages come first, followed by any locally known messages
    /// the fetch did not include (pushes that raced the fetch), in local order.
    /// If the summary disappeared while the fetch was in flight it is
    /// re-inserted from the fetched detail.
    pub fn select_fetched(&mut self, conversation: Conversation) -> Vec<StoreChange> {
        let Conversation { mut summary, messages } = conversation;
        let id = summary.id.clone();

        let mut merged = Thread::default();
        for message in messages {
            merged.push(message);
        }
        if let Some(local) = self.threads.remove(&id) {
            for message in local.messages {
                merged.push(message);
            }
        }

        if let Some(newest) = merged.newest()
            && is_newer(newest, &summary)
        {
            summary.record_last_message(newest);
        }
        summary.unread_count = 0;

        match self.summaries.iter_mut().find(|s| s.id == id) {
            Some(existing) => *existing = summary,
            None => {
                tracing::debug!(conversation = %id, "re-listing fetched conversation");
                self.summaries.insert(0, summary);
            },
        }
        self.threads.insert(id.clone(), merged);

        self.selected = Some(id.clone());

        vec![
            StoreChange::ConversationUpdated { conversation_id: id.clone() },
            StoreChange::SelectionChanged { selected: Some(id) },
        ]
    }

    /// Idempotent append.
    ///
    /// A message whose id is already in the thread is a no-op (`None`).
    /// Otherwise the message is appended, the summary preview follows it if it
    /// is the newest, and participant messages in a conversation that is not
    /// selected bump the unread counter.
    pub fn append_message(
        &mut self,
        conversation_id: &ConversationId,
        message: Message,
    ) -> Option<StoreChange> {
        let thread = self.threads.entry(conversation_id.clone()).or_default();
        if thread.contains(&message.id) {
            tracing::debug!(
                conversation = %conversation_id,
                message = %message.id,
                "duplicate message ignored"
            );
            return None;
        }

        let selected = self.selected.as_ref() == Some(conversation_id);
        match self.summaries.iter_mut().find(|s| &s.id == conversation_id) {
            Some(summary) => {
                if is_newer(&message, summary) {
                    summary.record_last_message(&message);
                }
                if message.sender == SenderRole::Participant && !selected {
                    summary.unread_count = summary.unread_count.saturating_add(1);
                }
            },
            None => {
                tracing::debug!(
                    conversation = %conversation_id,
                    "message for unlisted conversation kept until next load"
                );
            },
        }

        let message_id = message.id.clone();
        thread.push(message);
        Some(StoreChange::MessageAppended { conversation_id: conversation_id.clone(), message_id })
    }

    /// Set the delivery status of a known message.
    ///
    /// `None` if the message is unknown or already has `status`.
    pub fn update_delivery_status(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        status: DeliveryStatus,
    ) -> Option<StoreChange> {
        let message = self.threads.get_mut(conversation_id)?.get_mut(message_id)?;
        if message.status == Some(status) {
            return None;
        }
        message.status = Some(status);
        Some(StoreChange::ConversationUpdated { conversation_id: conversation_id.clone() })
    }

    /// Change the owner of a listed conversation.
    pub fn assign(
        &mut self,
        conversation_id: &ConversationId,
        assignee: Option<Assignment>,
    ) -> Option<StoreChange> {
        let summary = self.summaries.iter_mut().find(|s| &s.id == conversation_id)?;
        if summary.assignee == assignee {
            return None;
        }
        summary.assignee = assignee;
        Some(StoreChange::ConversationUpdated { conversation_id: conversation_id.clone() })
    }

    /// Zero the unread counter of a listed conversation.
    pub fn mark_read(&mut self, conversation_id: &ConversationId) -> Option<StoreChange> {
        let summary = self.summaries.iter_mut().find(|s| &s.id == conversation_id)?;
        if summary.unread_count == 0 {
            return None;
        }
        summary.unread_count = 0;
        Some(StoreChange::ConversationUpdated { conversation_id: conversation_id.clone() })
    }

    /// Drop the selection.
    pub fn clear_selection(&mut self) -> Option<StoreChange> {
        self.selected.take().map(|_| StoreChange::SelectionChanged { selected: None })
    }

    /// Drop everything.
    pub fn reset(&mut self) -> StoreChange {
        let session = self.session.wrapping_add(1);
        *self = Self { session, ..Self::default() };
        StoreChange::Reset
    }
}

/// Whether `message` is at least as new as the summary's last message.
fn is_newer(message: &Message, summary: &ConversationSummary) -> bool {
    summary.last_message_at.is_none_or(|at| message.timestamp >= at)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use switchboard_proto::{Channel, ConversationStatus, Participant};

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn summary(id: &str, last_at: Option<i64>) -> ConversationSummary {
        ConversationSummary {
            id: ConversationId::new(id),
            channel: Channel::Telegram,
            participant: Participant {
                id: format!("p-{id}"),
                display_name: "Ana".into(),
                avatar_url: None,
            },
            status: ConversationStatus::Open,
            last_message_preview: last_at.map(|_| "server preview".into()),
            last_message_at: last_at.map(at),
            unread_count: 0,
            assignee: None,
        }
    }

    fn message(id: &str, sender: SenderRole, secs: i64) -> Message {
        Message {
            id: MessageId::new(id),
            sender,
            content: format!("content of {id}"),
            timestamp: at(secs),
            status: None,
        }
    }

    fn cid(id: &str) -> ConversationId {
        ConversationId::new(id)
    }

    fn loaded(ids: &[&str]) -> Inbox {
        let mut inbox = Inbox::new();
        inbox.replace_conversations(
            ConversationFilter::all(),
            ids.iter().map(|id| summary(id, Some(0))).collect(),
        );
        inbox
    }

    #[test]
    fn append_is_idempotent() {
        let mut inbox = loaded(&["42"]);
        let m = message("m1", SenderRole::Participant, 10);

        assert!(inbox.append_message(&cid("42"), m.clone()).is_some());
        assert!(inbox.append_message(&cid("42"), m).is_none());

        assert_eq!(inbox.messages(&cid("42")).len(), 1);
        assert_eq!(inbox.conversation(&cid("42")).unwrap().unread_count, 1);
    }

    #[test]
    fn append_updates_preview_and_selected_view() {
        let mut inbox = loaded(&["42"]);
        inbox.select_fetched(Conversation { summary: summary("42", Some(0)), messages: vec![] });

        inbox.append_message(&cid("42"), message("m1", SenderRole::Participant, 10));

        let listed = inbox.conversation(&cid("42")).unwrap().clone();
        let selected = inbox.selected().unwrap();
        assert_eq!(listed, selected.summary);
        assert_eq!(listed.last_message_preview.as_deref(), Some("content of m1"));
        // The agent is looking at it: no unread bump.
        assert_eq!(listed.unread_count, 0);
        assert_eq!(selected.messages.len(), 1);
    }

    #[test]
    fn agent_messages_do_not_count_as_unread() {
        let mut inbox = loaded(&["42"]);
        inbox.append_message(&cid("42"), message("m1", SenderRole::Agent, 10));
        assert_eq!(inbox.conversation(&cid("42")).unwrap().unread_count, 0);
    }

    #[test]
    fn late_older_message_keeps_newer_preview() {
        let mut inbox = loaded(&["42"]);
        inbox.append_message(&cid("42"), message("new", SenderRole::Participant, 20));
        inbox.append_message(&cid("42"), message("old", SenderRole::Participant, 5));

        let summary = inbox.conversation(&cid("42")).unwrap();
        assert_eq!(summary.last_message_preview.as_deref(), Some("content of new"));
        assert_eq!(inbox.messages(&cid("42")).len(), 2);
    }

    #[test]
    fn bulk_load_keeps_pushed_preview() {
        let mut inbox = loaded(&["42"]);
        inbox.append_message(&cid("42"), message("m1", SenderRole::Participant, 30));

        // Slow list response computed before the push.
        inbox.replace_conversations(ConversationFilter::all(), vec![summary("42", Some(10))]);

        let summary = inbox.conversation(&cid("42")).unwrap();
        assert_eq!(summary.last_message_at, Some(at(30)));
        assert_eq!(inbox.messages(&cid("42")).len(), 1);
    }

    #[test]
    fn bulk_load_takes_newer_server_preview() {
        let mut inbox = loaded(&["42"]);
        inbox.append_message(&cid("42"), message("m1", SenderRole::Participant, 30));

        inbox.replace_conversations(ConversationFilter::all(), vec![summary("42", Some(60))]);

        let summary = inbox.conversation(&cid("42")).unwrap();
        assert_eq!(summary.last_message_preview.as_deref(), Some("server preview"));
    }

    #[test]
    fn bulk_load_drops_vanished_selection() {
        let mut inbox = loaded(&["1", "2"]);
        inbox.select_fetched(Conversation { summary: summary("2", None), messages: vec![] });

        let changes =
            inbox.replace_conversations(ConversationFilter::all(), vec![summary("1", None)]);

        assert!(inbox.selected_id().is_none());
        assert!(inbox.thread(&cid("2")).is_none());
        assert!(changes.contains(&StoreChange::SelectionChanged { selected: None }));
    }

    #[test]
    fn bulk_load_keeps_selection_by_id() {
        let mut inbox = loaded(&["1"]);
        inbox.select_fetched(Conversation {
            summary: summary("1", None),
            messages: vec![message("m1", SenderRole::Participant, 1)],
        });

        let mut fresh = summary("1", Some(0));
        fresh.unread_count = 4;
        inbox.replace_conversations(ConversationFilter::all(), vec![fresh]);

        let selected = inbox.selected().unwrap();
        assert_eq!(selected.messages.len(), 1, "bulk load must not clobber the thread");
        assert_eq!(selected.summary.unread_count, 0);
    }

    #[test]
    fn fetch_merges_with_raced_push() {
        let mut inbox = loaded(&["42"]);
        // Push lands while the fetch is in flight.
        inbox.append_message(&cid("42"), message("m3", SenderRole::Participant, 30));

        let fetched = Conversation {
            summary: summary("42", Some(20)),
            messages: vec![
                message("m1", SenderRole::Participant, 10),
                message("m2", SenderRole::Agent, 20),
            ],
        };
        inbox.select_fetched(fetched);

        let ids: Vec<_> = inbox.messages(&cid("42")).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
        assert_eq!(inbox.conversation(&cid("42")).unwrap().last_message_at, Some(at(30)));
    }

    #[test]
    fn fetch_relists_conversation_removed_in_flight() {
        let mut inbox = loaded(&["1"]);
        inbox.replace_conversations(ConversationFilter::all(), vec![]);

        inbox.select_fetched(Conversation { summary: summary("1", None), messages: vec![] });

        assert!(inbox.contains(&cid("1")));
        assert_eq!(inbox.selected_id(), Some(&cid("1")));
    }

    #[test]
    fn push_for_unlisted_conversation_surfaces_on_load() {
        let mut inbox = loaded(&[]);
        inbox.append_message(&cid("9"), message("m1", SenderRole::Participant, 50));
        assert!(!inbox.contains(&cid("9")));

        inbox.replace_conversations(ConversationFilter::all(), vec![summary("9", Some(10))]);

        assert_eq!(inbox.messages(&cid("9")).len(), 1);
        assert_eq!(inbox.conversation(&cid("9")).unwrap().last_message_at, Some(at(50)));
    }

    #[test]
    fn status_assign_and_read_updates() {
        let mut inbox = loaded(&["42"]);
        inbox.append_message(&cid("42"), message("m1", SenderRole::Agent, 1));
        inbox.append_message(&cid("42"), message("m2", SenderRole::Participant, 2));

        assert!(
            inbox
                .update_delivery_status(&cid("42"), &MessageId::new("m1"), DeliveryStatus::Failed)
                .is_some()
        );
        assert_eq!(inbox.messages(&cid("42"))[0].status, Some(DeliveryStatus::Failed));
        assert!(
            inbox
                .update_delivery_status(&cid("42"), &MessageId::new("zz"), DeliveryStatus::Failed)
                .is_none()
        );

        let agent = Assignment { agent_id: "a1".into(), display_name: None };
        assert!(inbox.assign(&cid("42"), Some(agent.clone())).is_some());
        assert!(inbox.assign(&cid("42"), Some(agent)).is_none());

        assert!(inbox.mark_read(&cid("42")).is_some());
        assert!(inbox.mark_read(&cid("42")).is_none());
    }

    #[test]
    fn reset_drops_everything() {
        let mut inbox = loaded(&["1"]);
        inbox.select_fetched(Conversation { summary: summary("1", None), messages: vec![] });

        let session = inbox.session();
        assert_eq!(inbox.reset(), StoreChange::Reset);
        assert!(inbox.conversations().is_empty());
        assert!(inbox.selected().is_none());
        assert_eq!(inbox.session(), session + 1);
    }
}

//! Property tests over arbitrary store operation sequences.
//!
//! Operations model everything that can reach the inbox: bulk loads, fetch
//! merges, pushes (duplicates included), status and assignment events, and
//! session resets, in any order. After each step the standard invariants must
//! hold, and every message ever appended to a listed conversation must still
//! be present exactly once unless a load or reset legitimately dropped it.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use switchboard_app::Inbox;
use switchboard_harness::{
    InvariantRegistry,
    fixtures::{self, cid, mid},
};
use switchboard_proto::{
    Assignment, Conversation, ConversationFilter, DeliveryStatus, Message, SenderRole,
};

const CONVERSATIONS: [&str; 4] = ["c0", "c1", "c2", "c3"];

#[derive(Debug, Clone)]
enum StoreOp {
    Load { listed: Vec<usize>, server_at: i64 },
    Select { conversation: usize, fetched: Vec<(u8, i64)> },
    Push { conversation: usize, message: u8, at: i64, participant: bool },
    Status { conversation: usize, message: u8, failed: bool },
    Assign { conversation: usize, agent: Option<u8> },
    MarkRead { conversation: usize },
    ClearSelection,
    Reset,
}

fn store_op() -> impl Strategy<Value = StoreOp> {
    let conversation = 0..CONVERSATIONS.len();
    prop_oneof![
        1 => (prop::collection::vec(0..CONVERSATIONS.len(), 0..4), 0i64..100)
            .prop_map(|(listed, server_at)| StoreOp::Load { listed, server_at }),
        2 => (conversation.clone(), prop::collection::vec((0u8..8, 0i64..100), 0..4))
            .prop_map(|(conversation, fetched)| StoreOp::Select { conversation, fetched }),
        4 => (conversation.clone(), 0u8..8, 0i64..100, any::<bool>()).prop_map(
            |(conversation, message, at, participant)| StoreOp::Push { conversation, message, at, participant }
        ),
        1 => (conversation.clone(), 0u8..8, any::<bool>())
            .prop_map(|(conversation, message, failed)| StoreOp::Status { conversation, message, failed }),
        1 => (conversation.clone(), prop::option::of(0u8..3))
            .prop_map(|(conversation, agent)| StoreOp::Assign { conversation, agent }),
        1 => conversation.prop_map(|conversation| StoreOp::MarkRead { conversation }),
        1 => Just(StoreOp::ClearSelection),
        1 => Just(StoreOp::Reset),
    ]
}

fn message(id: u8, at: i64, participant: bool) -> Message {
    let sender = if participant { SenderRole::Participant } else { SenderRole::Agent };
    fixtures::message(&format!("m{id}"), sender, at)
}

/// Message ids expected per conversation.
#[derive(Default)]
struct Expected {
    threads: BTreeMap<usize, BTreeSet<u8>>,
}

fn apply(inbox: &mut Inbox, expected: &mut Expected, op: &StoreOp) {
    match op {
        StoreOp::Load { listed, server_at } => {
            let summaries = listed
                .iter()
                .map(|&i| {
                    let mut summary = fixtures::summary(CONVERSATIONS[i]);
                    summary.last_message_at = Some(fixtures::at(*server_at));
                    summary.last_message_preview = Some("server".into());
                    summary
                })
                .collect();
            inbox.replace_conversations(ConversationFilter::all(), summaries);
            expected.threads.retain(|i, _| listed.contains(i));
        },
        StoreOp::Select { conversation, fetched } => {
            let messages: Vec<_> = fetched.iter().map(|&(id, at)| message(id, at, true)).collect();
            let mut detail = fixtures::conversation(CONVERSATIONS[*conversation], &messages);
            detail.summary.unread_count = 3;
            inbox.select_fetched(detail);
            expected.threads.entry(*conversation).or_default().extend(fetched.iter().map(|&(id, _)| id));
        },
        StoreOp::Push { conversation, message: id, at, participant } => {
            let before = inbox.messages(&cid(CONVERSATIONS[*conversation])).len();
            let change = inbox.append_message(&cid(CONVERSATIONS[*conversation]), message(*id, *at, *participant));
            let fresh = expected.threads.entry(*conversation).or_default().insert(*id);
            assert_eq!(change.is_some(), fresh, "append must report exactly the new ids");
            let after = inbox.messages(&cid(CONVERSATIONS[*conversation])).len();
            assert_eq!(after, before + usize::from(fresh));
        },
        StoreOp::Status { conversation, message: id, failed } => {
            let status = if *failed { DeliveryStatus::Failed } else { DeliveryStatus::Confirmed };
            inbox.update_delivery_status(&cid(CONVERSATIONS[*conversation]), &mid(&format!("m{id}")), status);
        },
        StoreOp::Assign { conversation, agent } => {
            let assignee = agent.map(|a| Assignment { agent_id: format!("agent-{a}"), display_name: None });
            inbox.assign(&cid(CONVERSATIONS[*conversation]), assignee);
        },
        StoreOp::MarkRead { conversation } => {
            inbox.mark_read(&cid(CONVERSATIONS[*conversation]));
        },
        StoreOp::ClearSelection => {
            inbox.clear_selection();
        },
        StoreOp::Reset => {
            inbox.reset();
            expected.threads.clear();
        },
    }
}

fn assert_matches(inbox: &Inbox, expected: &Expected) {
    for (i, name) in CONVERSATIONS.iter().enumerate() {
        let actual: BTreeSet<u8> = inbox
            .messages(&cid(name))
            .iter()
            .filter_map(|m| m.id.as_str().strip_prefix('m')?.parse().ok())
            .collect();
        let wanted = expected.threads.get(&i).cloned().unwrap_or_default();
        assert_eq!(actual, wanted, "thread {name}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn invariants_hold_for_any_operation_sequence(ops in prop::collection::vec(store_op(), 1..40)) {
        let registry = InvariantRegistry::standard();
        let mut inbox = Inbox::new();
        let mut expected = Expected::default();

        for (step, op) in ops.iter().enumerate() {
            apply(&mut inbox, &mut expected, op);
            registry.assert_all(&inbox, &format!("at step {step} after {op:?}"));
            assert_matches(&inbox, &expected);
        }
    }

    #[test]
    fn replaying_pushes_is_idempotent(pushes in prop::collection::vec((0usize..4, 0u8..8, 0i64..100), 1..30)) {
        let mut inbox = Inbox::new();
        inbox.replace_conversations(
            ConversationFilter::all(),
            CONVERSATIONS.iter().map(|c| fixtures::summary(c)).collect(),
        );
        for &(c, id, at) in &pushes {
            inbox.append_message(&cid(CONVERSATIONS[c]), message(id, at, true));
        }
        let once: Vec<Conversation> = CONVERSATIONS
            .iter()
            .map(|c| Conversation {
                summary: inbox.conversation(&cid(c)).cloned().unwrap_or_else(|| fixtures::summary(c)),
                messages: inbox.messages(&cid(c)).to_vec(),
            })
            .collect();

        for &(c, id, at) in &pushes {
            prop_assert!(inbox.append_message(&cid(CONVERSATIONS[c]), message(id, at, true)).is_none());
        }
        for conversation in &once {
            prop_assert_eq!(inbox.messages(&conversation.summary.id), conversation.messages.as_slice());
            prop_assert_eq!(inbox.conversation(&conversation.summary.id), Some(&conversation.summary));
        }
    }
}

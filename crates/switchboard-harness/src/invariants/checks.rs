//! Standard store invariants.

use std::collections::HashSet;

use switchboard_app::Inbox;

use super::{Invariant, InvariantResult, Violation};

/// The selected conversation must be listed.
///
/// A selection pointing at a conversation missing from the list would show
/// the agent a conversation the inbox no longer has.
pub struct SelectedIsListed;

impl Invariant for SelectedIsListed {
    fn name(&self) -> &'static str {
        "selected_is_listed"
    }

    fn check(&self, inbox: &Inbox) -> InvariantResult {
        match inbox.selected_id() {
            Some(id) if !inbox.contains(id) => Err(Violation {
                invariant: self.name(),
                message: format!(
                    "selected {id} not in {:?}",
                    inbox.conversations().iter().map(|s| s.id.as_str()).collect::<Vec<_>>()
                ),
            }),
            _ => Ok(()),
        }
    }
}

/// The selected conversation must not count unread messages.
pub struct SelectedIsRead;

impl Invariant for SelectedIsRead {
    fn name(&self) -> &'static str {
        "selected_is_read"
    }

    fn check(&self, inbox: &Inbox) -> InvariantResult {
        let Some(summary) = inbox.selected_id().and_then(|id| inbox.conversation(id)) else {
            return Ok(());
        };
        if summary.unread_count == 0 {
            return Ok(());
        }
        Err(Violation {
            invariant: self.name(),
            message: format!("selected {} has {} unread", summary.id, summary.unread_count),
        })
    }
}

/// Message ids are unique within each thread.
pub struct UniqueMessageIds;

impl Invariant for UniqueMessageIds {
    fn name(&self) -> &'static str {
        "unique_message_ids"
    }

    fn check(&self, inbox: &Inbox) -> InvariantResult {
        for (conversation, thread) in inbox.threads() {
            let mut seen = HashSet::new();
            for message in thread.messages() {
                if !seen.insert(&message.id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("conversation {conversation}: message {} twice", message.id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A listed preview is never older than the newest message in its thread.
///
/// Catches a bulk load or fetch regressing a preview a push already advanced.
pub struct PreviewNotStale;

impl Invariant for PreviewNotStale {
    fn name(&self) -> &'static str {
        "preview_not_stale"
    }

    fn check(&self, inbox: &Inbox) -> InvariantResult {
        for summary in inbox.conversations() {
            let Some(newest) = inbox.thread(&summary.id).and_then(|t| t.newest()) else {
                continue;
            };
            if summary.last_message_at.is_none_or(|at| at < newest.timestamp) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "conversation {}: preview at {:?}, newest message {} at {}",
                        summary.id, summary.last_message_at, newest.id, newest.timestamp
                    ),
                });
            }
        }
        Ok(())
    }
}

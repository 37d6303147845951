//! Application layer for Switchboard
//!
//! The conversation cache and the glue that keeps it consistent with the
//! live stream and with REST responses.
//!
//! # Components
//!
//! - [`Inbox`]: Pure conversation state and its merge rules
//! - [`ConversationStore`]: Shared store (REST calls, locking, change feed)
//! - [`EventDispatcher`]: Routes decoded push events to store operations
//! - [`SyncEngine`]: Wires the credential gate, connection manager,
//!   dispatcher, and store into one session

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod change;
mod dispatcher;
mod engine;
mod error;
mod inbox;
mod store;

pub use change::StoreChange;
pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use engine::SyncEngine;
pub use error::StoreError;
pub use inbox::{Inbox, Thread};
pub use store::ConversationStore;

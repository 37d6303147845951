//! Switchboard wire types
//!
//! Data model shared by every layer of the synchronization engine, plus the
//! JSON shapes exchanged over the live event stream.
//!
//! # Components
//!
//! - [`model`]: Conversations, messages, and list filters as the REST
//!   collaborator returns them
//! - [`event`]: Server push events ([`PushEvent`]) and client frames
//!   ([`ClientFrame`])
//! - [`timestamp`]: Normalization of the timestamp formats the backend emits
//!
//! Nothing in this crate performs I/O. Decoding is total: every input either
//! produces a typed value or a [`ProtocolError`], never a panic.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod event;
pub mod model;
pub mod timestamp;

pub use errors::{ProtocolError, Result};
pub use event::{
    ClientFrame, ConversationAssigned, ConversationRead, EventKind, MessageCreated, MessageStatus,
    PushEvent,
};
pub use model::{
    Assignment, Channel, Conversation, ConversationFilter, ConversationId, ConversationStatus,
    ConversationSummary, DeliveryStatus, Message, MessageId, Participant, SenderRole,
};

//! Switchboard core
//!
//! Connection lifecycle and session plumbing, free of I/O.
//!
//! # Components
//!
//! - [`connection`]: Action-based state machine for the single live transport
//!   (connect, keepalive, fixed-delay retry, shutdown)
//! - [`credential`]: Session credential and the gate that publishes it
//! - [`subscribers`]: Registry of inbound event handlers
//! - [`env`]: Clock abstraction so drivers can run on virtual time
//!
//! Drivers (see `switchboard-client`) own the sockets and feed transport
//! events back into [`ConnectionMachine`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod credential;
pub mod env;
pub mod error;
pub mod subscribers;

pub use connection::{
    AttemptId, ConnectionAction, ConnectionConfig, ConnectionMachine, ConnectionState,
    DisconnectReason, ShutdownReason,
};
pub use credential::{Credential, CredentialGate};
pub use env::Environment;
pub use error::CredentialError;
pub use subscribers::{Subscribers, Subscription};

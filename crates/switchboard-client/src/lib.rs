//! Switchboard client
//!
//! External collaborators of the synchronization engine and the async runtime
//! that drives the connection state machine.
//!
//! # Components
//!
//! - [`api`]: REST contract ([`ConversationApi`]) and its HTTP implementation
//! - [`transport`]: Live stream contract ([`Connector`], [`Link`]) and its
//!   WebSocket implementation
//! - [`manager`]: [`ConnectionManager`], the task that owns the live link
//! - [`config`]: Endpoints and timing
//!
//! The contracts are traits so tests can swap in scripted doubles without a
//! network.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod manager;
pub mod system_env;
pub mod transport;

pub use api::{ApiError, ConversationApi, DEFAULT_REQUEST_TIMEOUT, HttpApi};
pub use config::ClientConfig;
pub use manager::ConnectionManager;
pub use system_env::SystemEnv;
pub use transport::{Connector, Link, LinkEvent, TransportError, WsConnector, WsLink};

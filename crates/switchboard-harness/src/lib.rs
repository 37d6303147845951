//! Deterministic test harness for Switchboard.
//!
//! In-memory implementations of the REST and live-stream contracts, so the
//! whole engine runs in one process on tokio's paused clock with no network.
//!
//! # Test doubles
//!
//! - [`FakeApi`]: conversation backend with per-operation failure and latency
//!   injection and a call log
//! - [`SimConnector`]: scripted stream connector; each accepted link has a
//!   [`LinkHandle`] for playing the server side
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties of the store that must hold
//! after any sequence of operations. Use [`InvariantRegistry::standard()`]
//! for the full set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fake_api;
pub mod fixtures;
pub mod invariants;
pub mod sim_transport;

pub use fake_api::{ApiCall, FakeApi, Op};
pub use invariants::{
    Invariant, InvariantRegistry, InvariantResult, PreviewNotStale, SelectedIsListed,
    SelectedIsRead, UniqueMessageIds, Violation,
};
pub use sim_transport::{LinkHandle, SimConnector, SimLink};

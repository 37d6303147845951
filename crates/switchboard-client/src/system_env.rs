//! Production [`Environment`] on the tokio clock.
//!
//! Uses `tokio::time::Instant` rather than `std::time::Instant` so a paused
//! tokio runtime (`start_paused`) advances the connection runtime's clock
//! together with its sleeps.

use std::time::Duration;

use switchboard_core::Environment;

/// Production environment using the tokio clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

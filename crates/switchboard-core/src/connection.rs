//! Live stream connection state machine.
//!
//! Owns the lifecycle of the single live transport: opening it, keeping it
//! alive, and re-opening it after a drop. Uses the action pattern: methods take
//! time as input and return actions for the driver to execute. The machine
//! never touches a socket.
//!
//! # State Machine
//!
//! ```text
//!            connect()            opened()
//! ┌──────┐ ──────────> ┌────────────┐ ──────> ┌──────┐
//! │ Idle │             │ Connecting │         │ Open │ ── tick: keepalive
//! └──────┘ <─┐         └────────────┘         └──────┘
//!    ^       │  close()       │ abnormal close   │
//!    │       │  credential    │ / failure        │ abnormal close / failure
//!    │       │  cleared       ↓                  ↓
//!    │       │         ┌───────────────┐ <───────┘
//!    │       └──────── │ RetryPending  │
//!    │  normal close   └───────────────┘ ── tick after retry delay:
//!    └─ (1000)                                 back to Connecting
//! ```
//!
//! # Invariants
//!
//! - At most one transport attempt is live. Every attempt gets a fresh
//!   [`AttemptId`]; events tagged with any other id are ignored, so a late
//!   close from a replaced transport cannot arm a retry or tear down the
//!   current one.
//! - At most one retry is pending. The retry deadline lives inside the phase,
//!   so there is no separate timer that could be armed twice.
//! - After `close()` or a cleared credential the machine is `Idle` and stays
//!   there until the next explicit `connect()`.

use std::{fmt, ops::Sub, time::Duration};

use crate::credential::Credential;

/// Delay between a lost connection and the next attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Interval between keepalive frames while open.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Interval at which the driver calls [`ConnectionMachine::tick`].
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// WebSocket close code for a deliberate, normal shutdown.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Identifies one transport attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl AttemptId {
    /// Raw sequence number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a transport went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed deliberately (code 1000). No retry.
    Normal,
    /// Peer or network dropped the connection.
    Abnormal {
        /// Close code, if the peer sent one
        code: Option<u16>,
    },
    /// Transport error while connecting or while open.
    Failed {
        /// Error description
        error: String,
    },
}

impl DisconnectReason {
    /// Classify a close frame.
    pub fn from_close_code(code: Option<u16>) -> Self {
        match code {
            Some(NORMAL_CLOSE_CODE) => Self::Normal,
            code => Self::Abnormal { code },
        }
    }

    /// Whether this disconnect should be followed by a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

/// Why the machine asked the driver to close the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A consumer called `close()`.
    Requested,
    /// The session credential was cleared.
    CredentialCleared,
    /// The session credential was replaced by a different one.
    CredentialChanged,
}

impl ShutdownReason {
    /// Close frame reason text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "client shutdown",
            Self::CredentialCleared => "logged out",
            Self::CredentialChanged => "credential changed",
        }
    }
}

/// Actions returned by the connection state machine.
///
/// The driver executes these:
/// - `Open`: start connecting a transport tagged with `attempt`
/// - `SendKeepalive`: send a keepalive frame on the transport for `attempt`
/// - `Close`: close the transport for `attempt` (or abandon it while still
///   connecting)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a new transport.
    Open {
        /// Tag for every event this transport produces
        attempt: AttemptId,
        /// Credential presented once during the handshake
        credential: Credential,
    },

    /// Send a keepalive on the open transport.
    SendKeepalive {
        /// Transport to send on
        attempt: AttemptId,
    },

    /// Close the transport.
    Close {
        /// Transport to close
        attempt: AttemptId,
        /// Why it is being closed
        reason: ShutdownReason,
    },
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport and no retry pending.
    #[default]
    Idle,
    /// Transport open requested, not yet confirmed.
    Connecting,
    /// Transport usable.
    Open,
    /// Transport lost; a retry is scheduled.
    RetryPending,
}

impl ConnectionState {
    /// Whether a consumer should show a "reconnecting" indicator.
    ///
    /// True while a retry is pending or an attempt is in flight.
    pub fn is_reconnecting(self) -> bool {
        matches!(self, Self::RetryPending | Self::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::RetryPending => "retry-pending",
        })
    }
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Fixed delay before re-opening a lost transport
    pub retry_delay: Duration,
    /// Keepalive interval while open
    pub keepalive_interval: Duration,
    /// How often the driver ticks the machine (should be well below both
    /// intervals above)
    pub tick_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase<I> {
    Idle,
    Connecting { attempt: AttemptId },
    Open { attempt: AttemptId, last_keepalive: I },
    RetryPending { since: I },
}

/// Connection state machine.
///
/// Pure: no I/O, no clock. Generic over the instant type so tests can drive it
/// with virtual time.
#[derive(Debug, Clone)]
pub struct ConnectionMachine<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    phase: Phase<I>,
    config: ConnectionConfig,
    next_attempt: u64,
    /// Attempts started by the retry path since the last successful open.
    reconnect_attempts: u32,
}

impl<I> ConnectionMachine<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a machine in [`ConnectionState::Idle`].
    pub fn new(config: ConnectionConfig) -> Self {
        Self { phase: Phase::Idle, config, next_attempt: 0, reconnect_attempts: 0 }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle => ConnectionState::Idle,
            Phase::Connecting { .. } => ConnectionState::Connecting,
            Phase::Open { .. } => ConnectionState::Open,
            Phase::RetryPending { .. } => ConnectionState::RetryPending,
        }
    }

    /// Attempt that is currently connecting or open.
    #[must_use]
    pub fn active_attempt(&self) -> Option<AttemptId> {
        match self.phase {
            Phase::Connecting { attempt } | Phase::Open { attempt, .. } => Some(attempt),
            Phase::Idle | Phase::RetryPending { .. } => None,
        }
    }

    /// Whether `attempt` is the open transport.
    #[must_use]
    pub fn is_open(&self, attempt: AttemptId) -> bool {
        matches!(self.phase, Phase::Open { attempt: a, .. } if a == attempt)
    }

    /// Retry attempts since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Request a connection.
    ///
    /// No-op while connecting or open, and without a credential. While a
    /// retry is pending the retry is cancelled and the attempt starts now.
    pub fn connect(&mut self, credential: Option<&Credential>, _now: I) -> Vec<ConnectionAction> {
        let Some(credential) = credential else {
            tracing::debug!("connect ignored: no credential");
            return Vec::new();
        };

        match self.phase {
            Phase::Connecting { attempt } | Phase::Open { attempt, .. } => {
                tracing::debug!(%attempt, state = %self.state(), "connect ignored: already active");
                Vec::new()
            },
            Phase::Idle | Phase::RetryPending { .. } => vec![self.start_attempt(credential)],
        }
    }

    /// Transport for `attempt` finished its handshake.
    ///
    /// Ignored unless `attempt` is the one currently connecting. The driver
    /// must discard a transport whose attempt is not open afterwards (see
    /// [`Self::is_open`]).
    pub fn opened(&mut self, attempt: AttemptId, now: I) -> Vec<ConnectionAction> {
        match self.phase {
            Phase::Connecting { attempt: current } if current == attempt => {
                tracing::info!(%attempt, retries = self.reconnect_attempts, "connection open");
                self.phase = Phase::Open { attempt, last_keepalive: now };
                self.reconnect_attempts = 0;
            },
            _ => {
                tracing::debug!(%attempt, state = %self.state(), "stale open ignored");
            },
        }
        Vec::new()
    }

    /// Transport for `attempt` closed or failed.
    ///
    /// Arms a retry unless the close was normal or no credential is present.
    /// Ignored for any attempt other than the active one.
    pub fn disconnected(
        &mut self,
        attempt: AttemptId,
        reason: &DisconnectReason,
        credential_present: bool,
        now: I,
    ) -> Vec<ConnectionAction> {
        if self.active_attempt() != Some(attempt) {
            tracing::debug!(%attempt, ?reason, state = %self.state(), "stale disconnect ignored");
            return Vec::new();
        }

        if !reason.is_retryable() {
            tracing::info!(%attempt, "connection closed normally, not retrying");
            self.phase = Phase::Idle;
        } else if !credential_present {
            tracing::info!(%attempt, ?reason, "connection lost without credential, not retrying");
            self.phase = Phase::Idle;
        } else {
            tracing::warn!(
                %attempt,
                ?reason,
                retry_in = ?self.config.retry_delay,
                "connection lost, retry scheduled"
            );
            self.phase = Phase::RetryPending { since: now };
        }

        Vec::new()
    }

    /// Periodic maintenance: keepalives while open, retry when due.
    pub fn tick(&mut self, credential: Option<&Credential>, now: I) -> Vec<ConnectionAction> {
        match self.phase {
            Phase::Open { attempt, last_keepalive } => {
                if now - last_keepalive >= self.config.keepalive_interval {
                    self.phase = Phase::Open { attempt, last_keepalive: now };
                    vec![ConnectionAction::SendKeepalive { attempt }]
                } else {
                    Vec::new()
                }
            },
            Phase::RetryPending { since } if now - since >= self.config.retry_delay => {
                match credential {
                    Some(credential) => {
                        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                        vec![self.start_attempt(credential)]
                    },
                    None => {
                        tracing::info!("retry dropped: credential gone");
                        self.phase = Phase::Idle;
                        Vec::new()
                    },
                }
            },
            Phase::Idle | Phase::Connecting { .. } | Phase::RetryPending { .. } => Vec::new(),
        }
    }

    /// Tear down any transport and cancel any pending retry.
    ///
    /// The machine stays idle until the next `connect()`.
    pub fn close(&mut self, reason: ShutdownReason) -> Vec<ConnectionAction> {
        let previous = std::mem::replace(&mut self.phase, Phase::Idle);
        self.reconnect_attempts = 0;

        match previous {
            Phase::Connecting { attempt } | Phase::Open { attempt, .. } => {
                tracing::info!(%attempt, reason = reason.as_str(), "closing connection");
                vec![ConnectionAction::Close { attempt, reason }]
            },
            Phase::RetryPending { .. } => {
                tracing::info!(reason = reason.as_str(), "pending retry cancelled");
                Vec::new()
            },
            Phase::Idle => Vec::new(),
        }
    }

    /// The session credential was cleared. Same as `close()`, without retry.
    pub fn credential_cleared(&mut self) -> Vec<ConnectionAction> {
        self.close(ShutdownReason::CredentialCleared)
    }

    /// The session credential was replaced while a session may be live.
    ///
    /// Any transport or pending retry belongs to the old credential: it is
    /// torn down and a fresh attempt starts with `credential`. No-op while
    /// idle.
    pub fn credential_changed(&mut self, credential: &Credential, now: I) -> Vec<ConnectionAction> {
        if matches!(self.phase, Phase::Idle) {
            return Vec::new();
        }
        let mut actions = self.close(ShutdownReason::CredentialChanged);
        actions.extend(self.connect(Some(credential), now));
        actions
    }

    fn start_attempt(&mut self, credential: &Credential) -> ConnectionAction {
        self.next_attempt += 1;
        let attempt = AttemptId(self.next_attempt);
        tracing::info!(%attempt, "opening connection");
        self.phase = Phase::Connecting { attempt };
        ConnectionAction::Open { attempt, credential: credential.clone() }
    }
}

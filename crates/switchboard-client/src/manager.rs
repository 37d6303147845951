//! Async connection runtime.
//!
//! [`ConnectionManager`] is a handle to a background task that owns the
//! [`ConnectionMachine`], the active [`Link`], and the subscriber registry.
//! The task multiplexes four event sources:
//!
//! - consumer commands (`connect`, `close`)
//! - credential changes from the [`CredentialGate`] (cleared: close; replaced
//!   by a different one: reconnect with it)
//! - connect outcomes and inbound link events
//! - a periodic tick driving keepalives and retries
//!
//! and executes the actions the machine returns. Connects run in their own
//! task so a slow handshake never blocks commands; the outcome comes back
//! tagged with its attempt id and the machine discards stale ones.
//!
//! Inbound text frames are delivered to subscribers on the runtime task, one
//! at a time, in the order the link received them.

use std::sync::Arc;

use switchboard_core::{
    AttemptId, ConnectionAction, ConnectionConfig, ConnectionMachine, ConnectionState, Credential,
    CredentialGate, DisconnectReason, Environment, ShutdownReason, Subscribers, Subscription,
};
use switchboard_proto::ClientFrame;
use tokio::{
    sync::{mpsc, watch},
    task::AbortHandle,
};

use crate::transport::{Connector, Link, LinkEvent, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Connect,
    Close,
}

type ConnectOutcome<L> = (AttemptId, Result<L, TransportError>);

/// Handle to the connection runtime.
///
/// Dropping every clone of the handle stops the runtime and closes the link.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    subscribers: Subscribers<str>,
}

impl ConnectionManager {
    /// Start the runtime on the current tokio runtime.
    ///
    /// The manager starts idle; call [`Self::connect`] to open the link.
    pub fn spawn<C, E>(connector: C, gate: CredentialGate, env: E, config: ConnectionConfig) -> Self
    where
        C: Connector,
        E: Environment,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let subscribers = Subscribers::new();

        let mut credentials = gate.subscribe();
        let session = credentials.borrow_and_update().clone();
        let task = ManagerTask {
            machine: ConnectionMachine::new(config),
            connector: Arc::new(connector),
            credentials,
            session,
            gate,
            env,
            commands: commands_rx,
            outcomes_tx,
            outcomes: outcomes_rx,
            link: None,
            pending_connect: None,
            subscribers: subscribers.clone(),
            state: state_tx,
        };
        tokio::spawn(task.run());

        Self { commands: commands_tx, state: state_rx, subscribers }
    }

    /// Open the link if it is not already connecting or open.
    ///
    /// A no-op without a credential.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Tear down the link, cancel any retry, and drop every subscriber.
    ///
    /// The manager stays idle until the next [`Self::connect`].
    pub fn close(&self) {
        self.subscribers.clear();
        self.send(Command::Close);
    }

    /// Receive every inbound text frame.
    ///
    /// Safe to call before any connection exists; never affects the
    /// connection lifecycle.
    pub fn subscribe<F>(&self, handler: F) -> Subscription<str>
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!(?command, "connection runtime already stopped");
        }
    }
}

struct ManagerTask<C: Connector, E: Environment> {
    machine: ConnectionMachine<E::Instant>,
    connector: Arc<C>,
    gate: CredentialGate,
    credentials: watch::Receiver<Option<Credential>>,
    // Last credential observed on `credentials`.
    session: Option<Credential>,
    env: E,
    commands: mpsc::UnboundedReceiver<Command>,
    outcomes_tx: mpsc::UnboundedSender<ConnectOutcome<C::Link>>,
    outcomes: mpsc::UnboundedReceiver<ConnectOutcome<C::Link>>,
    link: Option<(AttemptId, C::Link)>,
    pending_connect: Option<(AttemptId, AbortHandle)>,
    subscribers: Subscribers<str>,
    state: watch::Sender<ConnectionState>,
}

async fn next_link_event<L: Link>(link: Option<&mut (AttemptId, L)>) -> (AttemptId, LinkEvent) {
    match link {
        Some((attempt, link)) => (*attempt, link.next_event().await),
        None => std::future::pending().await,
    }
}

impl<C: Connector, E: Environment> ManagerTask<C, E> {
    async fn run(mut self) {
        let env = self.env.clone();
        let interval = self.machine.config().tick_interval;
        let mut tick = Box::pin(env.sleep(interval));

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => {
                        let credential = self.gate.current();
                        let actions = self.machine.connect(credential.as_ref(), env.now());
                        self.execute(actions).await;
                    },
                    Some(Command::Close) => {
                        let actions = self.machine.close(ShutdownReason::Requested);
                        self.execute(actions).await;
                    },
                    None => break,
                },
                Ok(()) = self.credentials.changed() => {
                    let current = self.credentials.borrow_and_update().clone();
                    let actions = match &current {
                        None => self.machine.credential_cleared(),
                        Some(next) if self.session.as_ref() != Some(next) => {
                            tracing::info!("credential replaced, reconnecting");
                            self.machine.credential_changed(next, env.now())
                        },
                        Some(_) => Vec::new(),
                    };
                    self.session = current;
                    self.execute(actions).await;
                },
                Some((attempt, outcome)) = self.outcomes.recv() => {
                    self.handle_connect_outcome(attempt, outcome).await;
                },
                (attempt, event) = next_link_event(self.link.as_mut()) => {
                    self.handle_link_event(attempt, event).await;
                },
                () = &mut tick => {
                    let credential = self.gate.current();
                    let actions = self.machine.tick(credential.as_ref(), env.now());
                    self.execute(actions).await;
                    tick.set(env.sleep(interval));
                },
            }

            self.publish_state();
        }

        tracing::debug!("connection runtime stopping");
        let actions = self.machine.close(ShutdownReason::Requested);
        self.execute(actions).await;
        self.publish_state();
    }

    async fn handle_connect_outcome(
        &mut self,
        attempt: AttemptId,
        outcome: Result<C::Link, TransportError>,
    ) {
        if self.pending_connect.as_ref().is_some_and(|(a, _)| *a == attempt) {
            self.pending_connect = None;
        }

        match outcome {
            Ok(mut link) => {
                let actions = self.machine.opened(attempt, self.env.now());
                if self.machine.is_open(attempt) {
                    self.link = Some((attempt, link));
                } else {
                    link.close("superseded").await;
                }
                self.execute(actions).await;
            },
            Err(error) => {
                if error.is_unauthorized() {
                    tracing::warn!(%attempt, "stream rejected credential, ending session");
                    self.gate.clear();
                } else {
                    tracing::warn!(%attempt, %error, "connect failed");
                }
                let reason = DisconnectReason::Failed { error: error.to_string() };
                self.disconnected(attempt, &reason).await;
            },
        }
    }

    async fn handle_link_event(&mut self, attempt: AttemptId, event: LinkEvent) {
        match event {
            LinkEvent::Text(text) => {
                let delivered = self.subscribers.deliver(&text);
                tracing::trace!(%attempt, delivered, "inbound frame delivered");
            },
            LinkEvent::Closed { code, reason } => {
                self.link = None;
                tracing::info!(%attempt, ?code, reason = %reason, "link closed by peer");
                self.disconnected(attempt, &DisconnectReason::from_close_code(code)).await;
            },
            LinkEvent::Error(error) => {
                self.link = None;
                tracing::warn!(%attempt, error = %error, "link failed");
                self.disconnected(attempt, &DisconnectReason::Failed { error }).await;
            },
        }
    }

    async fn disconnected(&mut self, attempt: AttemptId, reason: &DisconnectReason) {
        let present = self.gate.is_present();
        let actions = self.machine.disconnected(attempt, reason, present, self.env.now());
        self.execute(actions).await;
    }

    async fn execute(&mut self, initial: Vec<ConnectionAction>) {
        let mut pending = initial;

        while !pending.is_empty() {
            for action in std::mem::take(&mut pending) {
                match action {
                    ConnectionAction::Open { attempt, credential } => {
                        self.start_connect(attempt, credential);
                    },
                    ConnectionAction::SendKeepalive { attempt } => {
                        pending.extend(self.send_keepalive(attempt).await);
                    },
                    ConnectionAction::Close { attempt, reason } => {
                        self.close_attempt(attempt, reason).await;
                    },
                }
            }
        }
    }

    fn start_connect(&mut self, attempt: AttemptId, credential: Credential) {
        let connector = Arc::clone(&self.connector);
        let outcomes = self.outcomes_tx.clone();
        let handle = tokio::spawn(async move {
            let outcome = connector.connect(&credential).await;
            // The runtime may have stopped; nothing left to report to.
            let _ = outcomes.send((attempt, outcome));
        });

        let previous = self.pending_connect.replace((attempt, handle.abort_handle()));
        if let Some((stale, previous)) = previous {
            tracing::debug!(attempt = %stale, "abandoning stale connect");
            previous.abort();
        }
    }

    async fn send_keepalive(&mut self, attempt: AttemptId) -> Vec<ConnectionAction> {
        let Some((current, link)) = self.link.as_mut() else {
            return Vec::new();
        };
        if *current != attempt {
            return Vec::new();
        }

        let frame = match ClientFrame::Ping.encode() {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%error, "keepalive encode failed");
                return Vec::new();
            },
        };

        match link.send_text(frame).await {
            Ok(()) => {
                tracing::trace!(%attempt, "keepalive sent");
                Vec::new()
            },
            Err(error) => {
                tracing::warn!(%attempt, %error, "keepalive failed, dropping link");
                self.link = None;
                let reason = DisconnectReason::Failed { error: error.to_string() };
                let present = self.gate.is_present();
                self.machine.disconnected(attempt, &reason, present, self.env.now())
            },
        }
    }

    async fn close_attempt(&mut self, attempt: AttemptId, reason: ShutdownReason) {
        if let Some((connecting, handle)) = self.pending_connect.take() {
            if connecting == attempt {
                handle.abort();
            } else {
                self.pending_connect = Some((connecting, handle));
            }
        }

        if let Some((current, mut link)) = self.link.take() {
            if current == attempt {
                link.close(reason.as_str()).await;
            } else {
                self.link = Some((current, link));
            }
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

//! Engine wiring.
//!
//! [`SyncEngine`] connects the pieces for one session:
//!
//! ```text
//! CredentialGate ──> ConnectionManager ──frames──> EventDispatcher ──> ConversationStore
//!        │                                                                   ▲
//!        └────────────── cleared: reset ─────────────────────────────────────┘
//! ```
//!
//! A credential being set opens the live connection; a credential being
//! cleared (logout, or any authentication failure) closes it and drops all
//! conversation state. Replacing the credential with a different one does
//! both: the old user's state is dropped and the connection reopens with the
//! new token. The dispatcher stays subscribed across sessions, so a
//! later login resumes delivery.

use std::sync::Arc;

use switchboard_client::{
    ApiError, ClientConfig, ConnectionManager, ConversationApi, Connector, HttpApi, SystemEnv,
    WsConnector,
};
use switchboard_core::{
    ConnectionConfig, ConnectionState, Credential, CredentialError, CredentialGate, Environment,
};
use tokio::task::JoinHandle;

use crate::{dispatcher::EventDispatcher, store::ConversationStore};

/// One running synchronization engine.
///
/// Dropping the engine stops the session watcher and, once the last
/// [`ConnectionManager`] clone is gone, the connection runtime.
#[derive(Debug)]
pub struct SyncEngine {
    store: ConversationStore,
    connection: ConnectionManager,
    gate: CredentialGate,
    watcher: JoinHandle<()>,
}

impl SyncEngine {
    /// Start the engine on the current tokio runtime.
    ///
    /// Connects immediately if `gate` already holds a credential.
    pub fn start<C, E>(
        api: Arc<dyn ConversationApi>,
        connector: C,
        gate: CredentialGate,
        env: E,
        config: ConnectionConfig,
    ) -> Self
    where
        C: Connector,
        E: Environment,
    {
        let store = ConversationStore::new(api, gate.clone());
        let connection = ConnectionManager::spawn(connector, gate.clone(), env, config);

        let dispatcher = EventDispatcher::new(store.clone());
        // Lives until `close`; survives credential loss.
        let _subscription = connection.subscribe(move |frame| {
            dispatcher.dispatch(frame);
        });

        let watcher = tokio::spawn(watch_session(gate.clone(), connection.clone(), store.clone()));

        Self { store, connection, gate, watcher }
    }

    /// Start the engine against real HTTP and WebSocket endpoints.
    ///
    /// # Errors
    ///
    /// - `ApiError::InvalidUrl` if the REST base URL is unusable
    /// - `ApiError::Transport` if the HTTP client cannot be built
    pub fn from_config(config: &ClientConfig, gate: CredentialGate) -> Result<Self, ApiError> {
        let api = HttpApi::new(&config.api_url, gate.clone(), config.request_timeout)?;
        let connector = WsConnector::new(config.stream_url.clone());
        Ok(Self::start(Arc::new(api), connector, gate, SystemEnv::new(), config.connection.clone()))
    }

    /// The conversation store.
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// The live connection.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The credential gate.
    pub fn gate(&self) -> &CredentialGate {
        &self.gate
    }

    /// Install a credential; the connection opens in the background.
    ///
    /// Logging in as someone else while a session is live ends that session
    /// first.
    ///
    /// # Errors
    ///
    /// - See [`Credential::new`]
    pub fn login(&self, token: &str) -> Result<(), CredentialError> {
        self.gate.set(Credential::new(token)?);
        Ok(())
    }

    /// End the session: drop the credential, close the connection, and clear
    /// conversation state.
    pub fn logout(&self) {
        if !self.gate.clear() {
            tracing::debug!("logout without a session");
        }
    }

    /// Close the connection for good and stop reacting to credential changes.
    ///
    /// Drops every stream subscriber, the dispatcher included.
    pub fn shutdown(&self) {
        self.watcher.abort();
        self.connection.close();
        tracing::info!("sync engine shut down");
    }

    /// Wait until the connection is idle and its transport closed.
    ///
    /// After [`Self::shutdown`] this resolves once the close frame went out.
    pub async fn closed(&self) {
        let mut state = self.connection.watch_state();
        // A stopped runtime has nothing left to close.
        let _ = state.wait_for(|s| *s == ConnectionState::Idle).await;
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

async fn watch_session(gate: CredentialGate, connection: ConnectionManager, store: ConversationStore) {
    let mut credentials = gate.subscribe();

    let mut session = credentials.borrow_and_update().clone();
    if session.is_some() {
        connection.connect();
    }

    while credentials.changed().await.is_ok() {
        let current = credentials.borrow_and_update().clone();
        match (&session, &current) {
            (_, None) => {
                tracing::info!("session ended, dropping conversation state");
                store.reset();
            },
            (Some(previous), Some(next)) if previous != next => {
                tracing::info!("credential replaced, dropping conversation state");
                store.reset();
                connection.connect();
            },
            (_, Some(_)) => {
                tracing::debug!("session started, connecting");
                connection.connect();
            },
        }
        session = current;
    }
}

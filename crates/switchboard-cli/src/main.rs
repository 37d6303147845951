//! Switchboard operator console.
//!
//! Runs the sync engine against a real backend and logs inbox activity.
//!
//! # Usage
//!
//! ```bash
//! # Follow the inbox, opening one conversation
//! SWITCHBOARD_TOKEN=... switchboard watch --channel whatsapp --select 42
//!
//! # Send one message
//! switchboard --token ... send --conversation 42 "On my way"
//! ```

mod error;

use std::time::Duration;

use clap::{Parser, Subcommand};
use error::CliError;
use switchboard_app::{ConversationStore, StoreChange, SyncEngine};
use switchboard_client::{ClientConfig, config::{DEFAULT_API_URL, DEFAULT_STREAM_URL}};
use switchboard_core::{ConnectionState, CredentialGate};
use switchboard_proto::{Channel, ConversationFilter, ConversationId, ConversationStatus};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Switchboard inbox console
#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(about = "Real-time inbox sync engine console")]
#[command(version)]
struct Args {
    /// REST base URL
    #[arg(long, env = "SWITCHBOARD_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Live stream URL
    #[arg(long, env = "SWITCHBOARD_STREAM_URL", default_value = DEFAULT_STREAM_URL)]
    stream_url: String,

    /// Bearer token for the session
    #[arg(long, env = "SWITCHBOARD_TOKEN", hide_env_values = true)]
    token: String,

    /// REST request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the inbox until Ctrl-C
    Watch {
        /// Only list conversations from this channel
        #[arg(long)]
        channel: Option<Channel>,

        /// Only list conversations with this status
        #[arg(long)]
        status: Option<ConversationStatus>,

        /// Open this conversation after loading
        #[arg(long)]
        select: Option<String>,
    },

    /// Send one message and exit
    Send {
        /// Target conversation
        #[arg(long)]
        conversation: String,

        /// Message text
        text: String,
    },
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_url: self.api_url.clone(),
            stream_url: self.stream_url.clone(),
            request_timeout: Duration::from_secs(self.timeout_secs),
            ..ClientConfig::default()
        }
    }
}

/// How long to wait for the connection to close on exit.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let gate = CredentialGate::with_token(&args.token)?;
    let engine = SyncEngine::from_config(&args.client_config(), gate)?;
    tracing::info!(api = %args.api_url, stream = %args.stream_url, "switchboard starting");

    let result = match args.command {
        Command::Watch { channel, status, select } => {
            watch(&engine, ConversationFilter { channel, status }, select.map(ConversationId::new))
                .await
        },
        Command::Send { conversation, text } => {
            send(engine.store(), &ConversationId::new(conversation), &text).await
        },
    };

    engine.shutdown();
    if tokio::time::timeout(CLOSE_GRACE, engine.closed()).await.is_err() {
        tracing::warn!("connection did not close in time");
    }
    result
}

async fn watch(
    engine: &SyncEngine,
    filter: ConversationFilter,
    select: Option<ConversationId>,
) -> Result<(), CliError> {
    let store = engine.store();
    let mut changes = store.subscribe_changes();
    let mut state = engine.connection().watch_state();

    let listed = store.load_conversations(filter).await?;
    for summary in &listed {
        tracing::info!(
            conversation = %summary.id,
            channel = summary.channel.as_str(),
            status = summary.status.as_str(),
            participant = %summary.participant.display_name,
            unread = summary.unread_count,
            preview = summary.last_message_preview.as_deref().unwrap_or(""),
            "conversation"
        );
    }

    if let Some(id) = select {
        let conversation = store.select_conversation(&id).await?;
        for message in &conversation.messages {
            tracing::info!(
                conversation = %id,
                message = %message.id,
                sender = ?message.sender,
                at = %message.timestamp,
                content = %message.content,
                "message"
            );
        }
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal?;
                tracing::info!("interrupted, closing connection");
                return Ok(());
            },
            change = changes.recv() => match change {
                Ok(StoreChange::Reset) if !engine.gate().is_present() => {
                    return Err(CliError::SessionEnded);
                },
                Ok(change) => log_change(store, &change),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "change feed lagged");
                },
                Err(RecvError::Closed) => return Ok(()),
            },
            Ok(()) = state.changed() => {
                let current = *state.borrow_and_update();
                if current == ConnectionState::Open {
                    tracing::info!(state = %current, "stream connected");
                } else if current.is_reconnecting() {
                    tracing::warn!(state = %current, "reconnecting");
                } else {
                    tracing::info!(state = %current, "stream idle");
                }
            },
        }
    }
}

fn log_change(store: &ConversationStore, change: &StoreChange) {
    match change {
        StoreChange::ConversationsReplaced { count } => {
            tracing::info!(count, "conversation list replaced");
        },
        StoreChange::SelectionChanged { selected } => {
            tracing::info!(selected = ?selected.as_ref().map(ConversationId::as_str), "selection changed");
        },
        StoreChange::MessageAppended { conversation_id, message_id } => {
            let message = store.messages(conversation_id).into_iter().find(|m| &m.id == message_id);
            match message {
                Some(message) => tracing::info!(
                    conversation = %conversation_id,
                    message = %message_id,
                    sender = ?message.sender,
                    content = %message.content,
                    "new message"
                ),
                None => tracing::info!(conversation = %conversation_id, message = %message_id, "new message"),
            }
        },
        StoreChange::ConversationUpdated { conversation_id } => {
            if let Some(summary) = store.conversation(conversation_id) {
                tracing::info!(
                    conversation = %conversation_id,
                    unread = summary.unread_count,
                    assignee = summary.assignee.as_ref().map_or("", |a| a.agent_id.as_str()),
                    "conversation updated"
                );
            }
        },
        StoreChange::Reset => tracing::info!("store reset"),
    }
}

async fn send(store: &ConversationStore, id: &ConversationId, text: &str) -> Result<(), CliError> {
    store.load_conversations(ConversationFilter::all()).await?;
    let message = store.send_message(id, text).await?;
    tracing::info!(conversation = %id, message = %message.id, at = %message.timestamp, "message sent");
    Ok(())
}

//! Scripted live-stream transport.
//!
//! [`SimConnector`] hands out in-memory [`SimLink`]s and keeps a
//! [`LinkHandle`] for each one, so a test can play the server: push frames,
//! close with a code, fail the link, and inspect what the client sent.
//! Connect attempts are accepted unless a refusal was queued.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use switchboard_client::{Connector, Link, LinkEvent, TransportError};
use switchboard_core::Credential;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct LinkRecord {
    sent: Vec<String>,
    closed_by_client: Option<String>,
    ended_by_server: bool,
}

impl LinkRecord {
    fn is_live(&self) -> bool {
        self.closed_by_client.is_none() && !self.ended_by_server
    }
}

#[derive(Default)]
struct Network {
    refusals: VecDeque<TransportError>,
    latency: Option<Duration>,
    attempts: Vec<Credential>,
    links: Vec<LinkHandle>,
}

/// Scripted [`Connector`].
///
/// Clones share one network; keep a clone to drive the server side after
/// handing the connector to the engine.
#[derive(Clone, Default)]
pub struct SimConnector {
    network: Arc<Mutex<Network>>,
}

impl SimConnector {
    /// Connector that accepts every attempt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next connect attempt with `error`.
    pub fn refuse_next(&self, error: TransportError) {
        self.lock().refusals.push_back(error);
    }

    /// Delay every connect attempt by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Number of connect attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.lock().attempts.len()
    }

    /// Credentials presented by each attempt.
    pub fn credentials(&self) -> Vec<Credential> {
        self.lock().attempts.clone()
    }

    /// Number of links handed out.
    pub fn links(&self) -> usize {
        self.lock().links.len()
    }

    /// Handle of the `index`-th accepted link.
    pub fn link(&self, index: usize) -> Option<LinkHandle> {
        self.lock().links.get(index).cloned()
    }

    /// Handle of the most recently accepted link.
    pub fn latest(&self) -> Option<LinkHandle> {
        self.lock().links.last().cloned()
    }

    /// Number of links that neither side has closed.
    pub fn live_links(&self) -> usize {
        self.lock().links.iter().filter(|l| l.is_live()).count()
    }

    fn lock(&self) -> MutexGuard<'_, Network> {
        self.network.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connector for SimConnector {
    type Link = SimLink;

    async fn connect(&self, credential: &Credential) -> Result<SimLink, TransportError> {
        let (latency, refusal) = {
            let mut network = self.lock();
            network.attempts.push(credential.clone());
            (network.latency, network.refusals.pop_front())
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = refusal {
            tracing::debug!(%error, "refusing connect attempt");
            return Err(error);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let record = Arc::new(Mutex::new(LinkRecord::default()));
        let handle = LinkHandle { events: events_tx, record: Arc::clone(&record) };
        self.lock().links.push(handle);

        Ok(SimLink { events: events_rx, record })
    }
}

/// Client end of a scripted link.
pub struct SimLink {
    events: mpsc::UnboundedReceiver<LinkEvent>,
    record: Arc<Mutex<LinkRecord>>,
}

impl SimLink {
    fn record(&self) -> MutexGuard<'_, LinkRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Link for SimLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let mut record = self.record();
        if !record.is_live() {
            return Err(TransportError::Send("link closed".into()));
        }
        record.sent.push(text);
        Ok(())
    }

    async fn next_event(&mut self) -> LinkEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => LinkEvent::Closed { code: None, reason: "server gone".into() },
        }
    }

    async fn close(&mut self, reason: &str) {
        self.record().closed_by_client.get_or_insert_with(|| reason.to_owned());
    }
}

/// Server end of a scripted link.
#[derive(Clone)]
pub struct LinkHandle {
    events: mpsc::UnboundedSender<LinkEvent>,
    record: Arc<Mutex<LinkRecord>>,
}

impl LinkHandle {
    /// Deliver a text frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        self.emit(LinkEvent::Text(frame.into()));
    }

    /// Close the link from the server side with `code`.
    pub fn close(&self, code: u16) {
        self.record().ended_by_server = true;
        self.emit(LinkEvent::Closed { code: Some(code), reason: String::new() });
    }

    /// Fail the link from the server side.
    pub fn fail(&self, error: &str) {
        self.record().ended_by_server = true;
        self.emit(LinkEvent::Error(error.to_owned()));
    }

    /// Frames the client sent on this link.
    pub fn sent(&self) -> Vec<String> {
        self.record().sent.clone()
    }

    /// Reason the client gave when closing, if it did.
    pub fn closed_by_client(&self) -> Option<String> {
        self.record().closed_by_client.clone()
    }

    /// Whether neither side has closed the link.
    pub fn is_live(&self) -> bool {
        self.record().is_live()
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("client end already dropped");
        }
    }

    fn record(&self) -> MutexGuard<'_, LinkRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

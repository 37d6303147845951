//! Live stream transport.
//!
//! [`Connector`] opens one authenticated [`Link`]; the connection runtime
//! owns the link and never exposes it to subscribers. [`WsConnector`] is the
//! WebSocket implementation: the credential is sent once, as an
//! `Authorization` header on the upgrade request.

use std::future::Future;

use futures::{SinkExt, StreamExt};
use switchboard_core::Credential;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderValue, StatusCode, header::AUTHORIZATION},
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

/// Transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Server refused the credential during the handshake.
    #[error("handshake rejected: not authenticated")]
    Unauthorized,

    /// Frame could not be sent.
    #[error("send failed: {0}")]
    Send(String),
}

impl TransportError {
    /// Whether this failure means the session credential is no longer valid.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Something that happened on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Inbound text frame.
    Text(String),
    /// The peer closed the link, or the stream ended.
    Closed {
        /// Close code, if the peer sent one
        code: Option<u16>,
        /// Close reason text
        reason: String,
    },
    /// The link failed.
    Error(String),
}

/// One open, authenticated, message-oriented connection.
///
/// After `next_event` returns [`LinkEvent::Closed`] or [`LinkEvent::Error`]
/// the link is finished and is dropped by the runtime.
pub trait Link: Send + 'static {
    /// Send a text frame.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait for the next inbound event.
    ///
    /// Must be cancel-safe: the runtime drops this future whenever another
    /// event source wins a `select!`.
    fn next_event(&mut self) -> impl Future<Output = LinkEvent> + Send;

    /// Close the link. Best effort.
    fn close(&mut self, reason: &str) -> impl Future<Output = ()> + Send;
}

/// Opens links.
pub trait Connector: Send + Sync + 'static {
    /// Link type produced by this connector.
    type Link: Link;

    /// Open a link authenticated with `credential`.
    fn connect(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// WebSocket [`Connector`].
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for the stream at `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self, credential: &Credential) -> Result<WsLink, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid stream url: {e}")))?;

        let header = HeaderValue::from_str(&credential.bearer())
            .map_err(|e| TransportError::Connect(format!("invalid credential header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        let (stream, _response) =
            tokio_tungstenite::connect_async(request).await.map_err(classify_handshake)?;

        Ok(WsLink { stream })
    }
}

fn classify_handshake(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response)
            if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
        {
            TransportError::Unauthorized
        },
        other => TransportError::Connect(other.to_string()),
    }
}

/// WebSocket [`Link`].
pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Link for WsLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text.into())).await.map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_event(&mut self) -> LinkEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return LinkEvent::Text(text.as_str().to_owned()),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return LinkEvent::Text(text),
                    Err(_) => tracing::debug!(len = bytes.len(), "non-utf8 binary frame dropped"),
                },
                // Control frames are answered by tungstenite itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {},
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => LinkEvent::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.as_str().to_owned(),
                        },
                        None => LinkEvent::Closed { code: None, reason: String::new() },
                    };
                },
                Some(Err(e)) => return LinkEvent::Error(e.to_string()),
                None => return LinkEvent::Closed { code: None, reason: "stream ended".into() },
            }
        }
    }

    async fn close(&mut self, reason: &str) {
        let frame = CloseFrame { code: CloseCode::Normal, reason: reason.to_owned().into() };
        if let Err(e) = self.stream.close(Some(frame)).await {
            tracing::debug!(error = %e, "close handshake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_url_is_a_connect_error() {
        let connector = WsConnector::new("not a url");
        let credential = Credential::new("t").unwrap();
        assert!(matches!(
            connector.connect(&credential).await,
            Err(TransportError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let connector = WsConnector::new("ws://127.0.0.1:9/stream");
        let credential = Credential::new("t").unwrap();
        assert!(matches!(
            connector.connect(&credential).await,
            Err(TransportError::Connect(_))
        ));
    }
}

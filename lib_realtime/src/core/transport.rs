//! # Socket Transport
//!
//! The seam between the connection state machine and the physical socket.
//! `ConnectionManager` only ever talks to a [`Connector`] (which opens
//! sessions) and the [`Transport`] it returns, so the reconnect loop can be
//! driven by a scripted fake in tests and by tokio-tungstenite in production.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::protocol::ABNORMAL_CLOSURE;

/// Close code reported when the peer sent a close frame without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Errors raised by a transport or connector.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The real-time URL could not be built from the configured base.
    #[error("invalid real-time url: {0}")]
    InvalidUrl(String),

    /// TCP, TLS or WebSocket handshake failure.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The server answered the upgrade request with a non-101 HTTP status.
    #[error("handshake rejected with HTTP status {status}")]
    Rejected {
        /// HTTP status of the rejection.
        status: u16,
    },

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Reading from the socket failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

impl TransportError {
    /// True for handshake rejections that mean the token was refused.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, TransportError::Rejected { status: 401 | 403 })
    }
}

/// What a transport hands back from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// A text frame.
    Text(String),
    /// A protocol-level ping or pong. Carries no payload for the router but
    /// proves the peer is alive.
    Heartbeat,
    /// The peer closed the connection.
    Closed {
        /// Close code (1006 when none was received).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// One open socket session.
#[async_trait]
pub trait Transport: Send {
    /// Writes one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Waits for the next inbound event. `None` means the stream ended
    /// without a close frame. Must be cancel safe.
    async fn recv(&mut self) -> Option<Result<WireEvent, TransportError>>;

    /// Starts a normal-closure shutdown.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens sessions against a URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Session type produced by this connector.
    type Transport: Transport + 'static;

    /// Performs the opening handshake.
    async fn connect(&self, url: &Url) -> Result<Self::Transport, TransportError>;
}

/// Builds `<base>?token=<bearer>` with the token percent-encoded.
///
/// Existing query parameters on the base are kept; an existing `token`
/// parameter is replaced.
pub fn build_url(base: &str, token: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(base).map_err(|e| TransportError::InvalidUrl(format!("{base}: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "{base}: unsupported scheme '{other}'"
            )))
        }
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "token")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut().clear().extend_pairs(kept).append_pair("token", token);
    Ok(url)
}

/// URL with the token query value masked, for logs.
pub fn redact(url: &Url) -> String {
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "token" { "***".to_string() } else { value.into_owned() };
            (key.into_owned(), value)
        })
        .collect();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A [`Transport`] backed by tokio-tungstenite.
pub struct WsTransport {
    ws: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.ws
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<WireEvent, TransportError>> {
        loop {
            let next = self.ws.next().await?;
            return Some(match next {
                Ok(WsMessage::Text(text)) => Ok(WireEvent::Text(text.to_string())),
                Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Ok(WireEvent::Text(text)),
                    Err(_) => {
                        log::debug!("WsTransport: skipping non UTF-8 binary frame ({} bytes)", bytes.len());
                        continue;
                    }
                },
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => Ok(WireEvent::Heartbeat),
                Ok(WsMessage::Close(frame)) => Ok(match frame {
                    Some(frame) => WireEvent::Closed {
                        code: u16::from(frame.code),
                        reason: frame.reason.to_string(),
                    },
                    None => WireEvent::Closed {
                        code: NO_STATUS_RECEIVED,
                        reason: String::new(),
                    },
                }),
                Ok(WsMessage::Frame(_)) => continue,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(WireEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: "connection closed".to_string(),
                }),
                Err(e) => Err(TransportError::ReceiveFailed(e.to_string())),
            });
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        };
        self.ws
            .close(Some(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Connector that opens [`WsTransport`] sessions with `connect_async`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, url: &Url) -> Result<Self::Transport, TransportError> {
        match connect_async(url.as_str()).await {
            Ok((ws, _response)) => Ok(WsTransport { ws }),
            Err(WsError::Http(response)) => Err(TransportError::Rejected {
                status: response.status().as_u16(),
            }),
            Err(e) => Err(TransportError::ConnectFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_appends_encoded_token() {
        let url = build_url("wss://lms.example.com/api/v1/ws/notifications", "a b+c").unwrap();
        assert_eq!(url.path(), "/api/v1/ws/notifications");
        let token: Vec<_> = url.query_pairs().filter(|(k, _)| k == "token").collect();
        assert_eq!(token.len(), 1);
        assert_eq!(token[0].1, "a b+c");
    }

    #[test]
    fn build_url_replaces_existing_token_and_keeps_other_params() {
        let url = build_url("ws://localhost:8000/ws?v=2&token=old", "new").unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![("v".to_string(), "2".to_string()), ("token".to_string(), "new".to_string())]
        );
    }

    #[test]
    fn build_url_rejects_bad_input() {
        assert!(matches!(build_url("not a url", "t"), Err(TransportError::InvalidUrl(_))));
        assert!(matches!(
            build_url("http://localhost/ws", "t"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn redact_masks_token_only() {
        let url = build_url("ws://localhost/ws?v=2", "secret").unwrap();
        let shown = redact(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.contains("v=2"));
    }

    #[test]
    fn auth_rejection_statuses() {
        assert!(TransportError::Rejected { status: 401 }.is_auth_rejection());
        assert!(TransportError::Rejected { status: 403 }.is_auth_rejection());
        assert!(!TransportError::Rejected { status: 500 }.is_auth_rejection());
        assert!(!TransportError::ConnectFailed("refused".into()).is_auth_rejection());
    }
}

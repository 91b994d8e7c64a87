//! One WebSocket connection per turn, driven as a task on the connection
//! worker's runtime.
//!
//! The task owns the socket. The session talks to it through a [`Link`] and
//! hears back through [`ConnectionEvent`]s tagged with the connection's id,
//! so events from a superseded connection can be recognised and dropped.

use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::{SynthesizerConfig, SUBSCRIPTION_KEY_HEADER};
use crate::error::Error;
use crate::proxy;

/// How long to wait for the server to answer our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Identifies one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a connection task reports back to the connection worker.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    Opened { id: ConnectionId },
    Message { id: ConnectionId, message: Message },
    Closed { id: ConnectionId },
    Failed { id: ConnectionId, error: Error },
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outbound {
    Text(String),
    Close,
}

/// Sending half of a connection.
#[derive(Debug)]
pub(crate) struct Link {
    id: ConnectionId,
    outbound: UnboundedSender<Outbound>,
}

impl Link {
    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a text frame for sending.
    pub(crate) fn send_text(&self, text: String) -> Result<(), Error> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| Error::ConnectionFailed(format!("connection {} already ended", self.id)))
    }

    /// Asks the task to close with a normal-closure code.
    pub(crate) fn close(&self) {
        debug!(connection = %self.id, "Closing connection");
        let _ = self.outbound.send(Outbound::Close);
    }

    /// A link whose outbound side is read by the caller instead of a socket.
    #[cfg(test)]
    pub(crate) fn detached(id: u64) -> (Self, UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId(id),
                outbound,
            },
            rx,
        )
    }
}

/// Spawns the connection task on the current runtime.
pub(crate) fn open(
    id: ConnectionId,
    config: SynthesizerConfig,
    events: UnboundedSender<ConnectionEvent>,
) -> Link {
    let (outbound, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_connection(id, config, rx, events));
    Link { id, outbound }
}

async fn run_connection(
    id: ConnectionId,
    config: SynthesizerConfig,
    mut outbound: UnboundedReceiver<Outbound>,
    events: UnboundedSender<ConnectionEvent>,
) {
    let ws = match timeout(config.connect_timeout, connect(&config)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(error)) => {
            warn!(connection = %id, error = %error, "WebSocket connect failed");
            let _ = events.send(ConnectionEvent::Failed { id, error });
            return;
        }
        Err(_) => {
            warn!(
                connection = %id,
                timeout = ?config.connect_timeout,
                "WebSocket connect timed out"
            );
            let _ = events.send(ConnectionEvent::Failed {
                id,
                error: Error::ConnectionTimeout,
            });
            return;
        }
    };

    info!(connection = %id, "WebSocket connected");
    let (mut write, mut read) = ws.split();
    let _ = events.send(ConnectionEvent::Opened { id });

    let mut closing = false;
    let close_deadline = sleep(Duration::MAX);
    tokio::pin!(close_deadline);

    let outcome = loop {
        tokio::select! {
            command = outbound.recv(), if !closing => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        break Err(Error::WebSocket(e));
                    }
                }
                Some(Outbound::Close) | None => {
                    closing = true;
                    close_deadline.as_mut().reset(Instant::now() + CLOSE_GRACE);
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!(connection = %id, error = %e, "Close frame not sent");
                        break Ok(());
                    }
                }
            },
            _ = &mut close_deadline, if closing => {
                debug!(connection = %id, "Server did not answer close");
                break Ok(());
            }
            message = read.next() => match message {
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                    let _ = events.send(ConnectionEvent::Message { id, message });
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(connection = %id, frame = ?frame, "Received close");
                }
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
                | None => break Ok(()),
                Some(Err(e)) if closing => {
                    debug!(connection = %id, error = %e, "Error while closing");
                    break Ok(());
                }
                Some(Err(e)) => break Err(Error::WebSocket(e)),
            },
        }
    };

    match outcome {
        Ok(()) => {
            info!(connection = %id, "WebSocket closed");
            let _ = events.send(ConnectionEvent::Closed { id });
        }
        Err(error) => {
            warn!(connection = %id, error = %error, "WebSocket failed");
            let _ = events.send(ConnectionEvent::Failed { id, error });
        }
    }
}

async fn connect(config: &SynthesizerConfig) -> Result<WsStream, Error> {
    let url = config.endpoint_url()?;
    let mut request = url.as_str().into_client_request()?;
    if !config.subscription_key.is_empty() {
        let name = HeaderName::from_bytes(SUBSCRIPTION_KEY_HEADER.as_bytes())
            .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
        let value = HeaderValue::from_str(&config.subscription_key)
            .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
        request.headers_mut().insert(name, value);
    }

    info!(host = ?url.host_str(), path = %url.path(), "WebSocket connecting");
    let (ws, _) = match proxy::proxy_for_url(&url) {
        Some(proxy) => {
            let host = url
                .host_str()
                .ok_or_else(|| Error::ConnectionFailed("endpoint has no host".to_string()))?;
            let port = url.port_or_known_default().unwrap_or(443);
            let stream = proxy::tunnel(&proxy, host, port).await?;
            tokio_tungstenite::client_async_tls(request, stream).await?
        }
        None => tokio_tungstenite::connect_async(request).await?,
    };
    Ok(ws)
}

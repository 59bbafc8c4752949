//! Connection seam between the session and the recognition server.
//!
//! A [`Connection`] is a pair of bounded queues. The production
//! [`WsConnector`] pumps them to and from a WebSocket with two tasks; tests
//! hand out the far ends directly through [`Connection::pair`].

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Messages buffered per direction on a WebSocket connection.
const DEFAULT_QUEUE_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("no answer from the server within {0:?}")]
    Timeout(std::time::Duration),
}

/// Result of a fire-and-forget send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Queue full; the message was discarded.
    Dropped,
    NotConnected,
}

/// One live connection. The channel is closed once `inbound` yields `None`.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
}

/// The server side of a [`Connection::pair`].
#[derive(Debug)]
pub struct Peer {
    pub to_client: mpsc::Sender<String>,
    pub from_client: mpsc::Receiver<String>,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        Self { outbound, inbound }
    }

    /// An in-memory connection and its far end.
    pub fn pair(capacity: usize) -> (Connection, Peer) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        (
            Connection::new(out_tx, in_rx),
            Peer {
                to_client: in_tx,
                from_client: out_rx,
            },
        )
    }

    /// Queue a text message without waiting.
    pub fn try_send(&self, text: String) -> SendOutcome {
        match self.outbound.try_send(text) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::NotConnected,
        }
    }

    /// Next inbound text message, or `None` once the connection is gone.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}

/// Opens connections to the recognition server.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &Url) -> impl Future<Output = Result<Connection, TransportError>> + Send;
}

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    queue_depth: usize,
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &Url) -> impl Future<Output = Result<Connection, TransportError>> + Send {
        let url = url.clone();
        let depth = self.queue_depth;
        async move {
            let (ws, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
            tracing::debug!(
                host = url.host_str().unwrap_or_default(),
                path = url.path(),
                status = %response.status(),
                "websocket handshake complete"
            );

            let (mut sink, mut stream) = ws.split();
            let (out_tx, mut out_rx) = mpsc::channel::<String>(depth);
            let (in_tx, in_rx) = mpsc::channel::<String>(depth);

            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::warn!(error = %e, "websocket send failed");
                        return;
                    }
                }
                // Every sender is gone: the client closed the channel.
                let _ = sink.send(Message::Close(None)).await;
            });

            tokio::spawn(async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            if in_tx.send(text).await.is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(frame)) => {
                            tracing::info!(?frame, "server closed the channel");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "websocket receive failed");
                            break;
                        }
                    }
                }
            });

            Ok(Connection::new(out_tx, in_rx))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_both_ways() {
        let (mut conn, mut peer) = Connection::pair(2);
        assert_eq!(conn.try_send("up".into()), SendOutcome::Sent);
        assert_eq!(peer.from_client.recv().await.as_deref(), Some("up"));

        peer.to_client.send("down".into()).await.unwrap();
        assert_eq!(conn.recv().await.as_deref(), Some("down"));
    }

    #[tokio::test]
    async fn test_try_send_drops_when_full() {
        let (conn, _peer) = Connection::pair(1);
        assert_eq!(conn.try_send("a".into()), SendOutcome::Sent);
        assert_eq!(conn.try_send("b".into()), SendOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_peer_drop_closes_connection() {
        let (mut conn, peer) = Connection::pair(1);
        drop(peer);
        assert_eq!(conn.recv().await, None);
        assert_eq!(conn.try_send("late".into()), SendOutcome::NotConnected);
    }
}

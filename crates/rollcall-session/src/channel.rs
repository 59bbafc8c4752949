//! Supervises the attendance channel: one connection at a time, reconnects
//! on unexpected closes while retrying is wanted, decodes inbound messages.
//! Every connect, first one included, is bounded by the policy's
//! `connect_timeout`.

use crate::reconnect::{ChannelState, Decision, ReconnectPolicy, Reconnector};
use crate::transport::{Connection, Connector, SendOutcome, TransportError};
use rollcall_core::{decode_server_message, CourseId, ProtocolError, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

/// Something the controller has to react to.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A reconnect attempt succeeded.
    Connected,
    Message(ServerMessage),
    Malformed(ProtocolError),
    Reconnecting { attempt: u32, delay: Duration },
    /// The channel closed and will not be retried.
    Closed,
    /// The reconnect budget is spent.
    ConnectionLost { attempts: u32 },
}

pub struct ChannelSupervisor<C> {
    connector: Arc<C>,
    connect_timeout: Duration,
    reconnector: Reconnector,
    target: Option<(CourseId, Url)>,
    connection: Option<Connection>,
    pending: Option<JoinHandle<Result<Connection, TransportError>>>,
    retry_at: Option<Instant>,
    retry_wanted: bool,
}

impl<C: Connector> ChannelSupervisor<C> {
    pub fn new(connector: C, policy: ReconnectPolicy) -> Self {
        Self {
            connector: Arc::new(connector),
            connect_timeout: policy.connect_timeout,
            reconnector: Reconnector::new(policy),
            target: None,
            connection: None,
            pending: None,
            retry_at: None,
            retry_wanted: false,
        }
    }

    /// Connect to `url` for `course_id`, replacing any current connection.
    pub async fn open(&mut self, course_id: CourseId, url: Url) -> Result<(), TransportError> {
        self.close();
        self.reconnector.on_connect_started();
        match connect_within(self.connector.as_ref(), &url, self.connect_timeout).await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.reconnector.on_connected();
                self.target = Some((course_id, url));
                tracing::info!(course = %course_id, "attendance channel open");
                Ok(())
            }
            Err(e) => {
                self.reconnector.on_connect_failed(false);
                tracing::warn!(course = %course_id, error = %e, "attendance channel failed to open");
                Err(e)
            }
        }
    }

    /// Close on request. Never retried.
    pub fn close(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.retry_at = None;
        if self.connection.take().is_some() {
            tracing::info!("attendance channel closed");
        }
        self.target = None;
        self.reconnector.disconnect();
    }

    /// Whether unexpected closes should be retried.
    pub fn set_retry(&mut self, wanted: bool) {
        self.retry_wanted = wanted;
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Course of the current or reconnecting channel.
    pub fn course_id(&self) -> Option<CourseId> {
        self.target.as_ref().map(|(course_id, _)| *course_id)
    }

    pub fn state(&self) -> ChannelState {
        self.reconnector.state()
    }

    /// Fire-and-forget send. Nothing is queued while disconnected.
    pub fn try_send(&self, text: String) -> SendOutcome {
        match &self.connection {
            Some(connection) => connection.try_send(text),
            None => SendOutcome::NotConnected,
        }
    }

    /// Wait for the next event. Pends forever while idle.
    ///
    /// Cancel safe: dropping the future loses no state.
    pub async fn next_event(&mut self) -> ChannelEvent {
        loop {
            if let Some(connection) = self.connection.as_mut() {
                return match connection.recv().await {
                    Some(text) => match decode_server_message(&text) {
                        Ok(msg) => {
                            if matches!(msg, ServerMessage::FaceData(_)) {
                                self.reconnector.on_recognition();
                            }
                            ChannelEvent::Message(msg)
                        }
                        Err(e) => ChannelEvent::Malformed(e),
                    },
                    None => {
                        self.connection = None;
                        tracing::warn!(course = ?self.course_id(), "attendance channel dropped");
                        let decision = self.reconnector.on_closed(self.retry_wanted);
                        self.apply(decision)
                    }
                };
            }

            if let Some(pending) = self.pending.as_mut() {
                let result = pending.await;
                self.pending = None;
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(join) => Err(TransportError::Connect(join.to_string())),
                };
                return match outcome {
                    Ok(connection) => {
                        self.connection = Some(connection);
                        self.reconnector.on_connected();
                        tracing::info!(course = ?self.course_id(), "attendance channel reconnected");
                        ChannelEvent::Connected
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reconnect attempt failed");
                        let decision = self.reconnector.on_connect_failed(self.retry_wanted);
                        self.apply(decision)
                    }
                };
            }

            if let Some(at) = self.retry_at {
                tokio::time::sleep_until(at).await;
                self.retry_at = None;
                self.spawn_connect();
                continue;
            }

            return std::future::pending().await;
        }
    }

    fn spawn_connect(&mut self) {
        let Some((course_id, url)) = self.target.clone() else {
            self.reconnector.disconnect();
            return;
        };
        self.reconnector.on_connect_started();
        tracing::info!(course = %course_id, state = ?self.reconnector.state(), "reconnecting");
        let connector = Arc::clone(&self.connector);
        let limit = self.connect_timeout;
        self.pending = Some(tokio::spawn(async move {
            connect_within(connector.as_ref(), &url, limit).await
        }));
    }

    fn apply(&mut self, decision: Decision) -> ChannelEvent {
        match decision {
            Decision::Retry { attempt, delay } => {
                self.retry_at = Some(Instant::now() + delay);
                ChannelEvent::Reconnecting { attempt, delay }
            }
            Decision::GiveUp { attempts } => {
                tracing::error!(attempts, "reconnect budget exhausted");
                self.target = None;
                ChannelEvent::ConnectionLost { attempts }
            }
            Decision::Idle => {
                self.target = None;
                ChannelEvent::Closed
            }
        }
    }
}

async fn connect_within<C: Connector>(
    connector: &C,
    url: &Url,
    limit: Duration,
) -> Result<Connection, TransportError> {
    tokio::time::timeout(limit, connector.connect(url))
        .await
        .map_err(|_| TransportError::Timeout(limit))?
}

//! Session controller.
//!
//! One tokio task owns the [`SessionState`], the capture worker, the frame
//! ticker and the channel supervisor. Callers talk to it through a cloneable
//! [`SessionHandle`]; everything the operator should hear about arrives as a
//! [`SessionNotice`] on the receiver returned by [`spawn_session`].

use crate::channel::{ChannelEvent, ChannelSupervisor};
use crate::config::Config;
use crate::error::AttendanceError;
use crate::reconnect::ChannelState;
use crate::transport::{Connector, SendOutcome};
use chrono::{DateTime, Utc};
use rollcall_core::overlay::{self, OverlayItem};
use rollcall_core::{
    AttendanceTally, CourseId, FaceObservation, FrameMessage, FrameSize, PresenceRecord,
    RosterEntry, SessionEvent, SessionState, SessionStatus,
};
use rollcall_hw::{CameraError, CaptureDevice, CaptureWorker, FrameEncoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    /// The channel was closed on request while the session ran.
    Disconnected,
    ConnectionLost,
}

/// Operator-facing events.
#[derive(Debug)]
pub enum SessionNotice {
    ChannelConnected { course_id: CourseId },
    Reconnecting { attempt: u32, delay: Duration },
    ChannelClosed,
    ServerReady,
    SessionStarted { course_id: CourseId },
    Recognized(PresenceRecord),
    ServerError(String),
    Error(AttendanceError),
    SessionStopped { reason: StopReason, present: usize },
}

/// Point-in-time view of the session for display.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub course_id: Option<CourseId>,
    pub started_at: Option<DateTime<Utc>>,
    pub frames_sent: u64,
    pub server_ready: bool,
    pub channel: ChannelState,
    pub camera_active: bool,
    pub present: Vec<PresenceRecord>,
    pub observations: Vec<FaceObservation>,
    pub tally: Option<AttendanceTally>,
}

enum Command {
    Connect {
        course_id: CourseId,
        token: String,
        reply: oneshot::Sender<Result<(), AttendanceError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Start {
        course_id: CourseId,
        reply: oneshot::Sender<Result<(), AttendanceError>>,
    },
    Stop {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Overlay {
        display: FrameSize,
        reply: oneshot::Sender<Vec<OverlayItem>>,
    },
    LoadRoster {
        roster: Vec<RosterEntry>,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the session controller task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AttendanceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| AttendanceError::ControllerClosed)?;
        reply_rx.await.map_err(|_| AttendanceError::ControllerClosed)
    }

    /// Open the attendance channel for a course.
    pub async fn connect(&self, course_id: CourseId, token: impl Into<String>) -> Result<(), AttendanceError> {
        let token = token.into();
        self.request(|reply| Command::Connect {
            course_id,
            token,
            reply,
        })
        .await?
    }

    /// Close the channel; stops a running session first.
    pub async fn disconnect(&self) -> Result<(), AttendanceError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Acquire the camera and start sending frames.
    pub async fn start(&self, course_id: CourseId) -> Result<(), AttendanceError> {
        self.request(|reply| Command::Start { course_id, reply }).await?
    }

    /// Stop the session. Returns `false` if none was running.
    ///
    /// The camera is released before this returns.
    pub async fn stop(&self) -> Result<bool, AttendanceError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, AttendanceError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Overlay geometry for the latest observations on a display of the given size.
    pub async fn overlay(&self, display: FrameSize) -> Result<Vec<OverlayItem>, AttendanceError> {
        self.request(|reply| Command::Overlay { display, reply }).await
    }

    pub async fn load_roster(&self, roster: Vec<RosterEntry>) -> Result<(), AttendanceError> {
        self.request(|reply| Command::LoadRoster { roster, reply }).await
    }

    /// Stop everything and end the controller task.
    pub async fn shutdown(&self) -> Result<(), AttendanceError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Spawn the controller task.
pub fn spawn_session<D, C>(
    config: Config,
    device: D,
    connector: C,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionNotice>)
where
    D: CaptureDevice,
    C: Connector,
{
    let (tx, rx) = mpsc::channel(16);
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let controller = SessionController {
        encoder: FrameEncoder::new(config.frame_width, config.frame_height, config.jpeg_quality),
        state: SessionState::new(config.tracker_config()),
        channel: ChannelSupervisor::new(connector, config.reconnect_policy()),
        device: Arc::new(device),
        capture: None,
        ticker: None,
        commands: rx,
        notices: notice_tx,
        config,
    };
    tokio::spawn(controller.run());
    (SessionHandle { tx }, notice_rx)
}

struct SessionController<D, C> {
    config: Config,
    device: Arc<D>,
    encoder: FrameEncoder,
    state: SessionState,
    channel: ChannelSupervisor<C>,
    capture: Option<CaptureWorker>,
    ticker: Option<Interval>,
    commands: mpsc::Receiver<Command>,
    notices: mpsc::UnboundedSender<SessionNotice>,
}

impl<D: CaptureDevice, C: Connector> SessionController<D, C> {
    async fn run(mut self) {
        tracing::info!("session controller started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                event = self.channel.next_event() => self.handle_channel_event(event).await,
                _ = next_tick(&mut self.ticker) => self.on_tick(),
            }
        }
        tracing::info!("session controller exiting");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                course_id,
                token,
                reply,
            } => {
                let result = self.connect(course_id, &token).await;
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::Start { course_id, reply } => {
                let result = self.start(course_id).await;
                if let Err(e) = &result {
                    tracing::warn!(course = %course_id, error = %e, "session failed to start");
                }
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                let stopped = self.stop(StopReason::Requested).await;
                let _ = reply.send(stopped);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Overlay { display, reply } => {
                let items = overlay::render(self.state.observations(), self.config.frame_size(), display);
                let _ = reply.send(items);
            }
            Command::LoadRoster { roster, reply } => {
                tracing::info!(students = roster.len(), "roster loaded");
                self.state.set_roster(roster);
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.teardown().await;
                let _ = reply.send(());
            }
        }
    }

    async fn connect(&mut self, course_id: CourseId, token: &str) -> Result<(), AttendanceError> {
        if self.state.is_active() {
            return Err(AttendanceError::AlreadyActive(
                self.state.course_id().unwrap_or(course_id),
            ));
        }
        let url = self.config.channel_url(course_id, token)?;
        self.state.channel_reset();
        self.channel.open(course_id, url).await?;
        self.notify(SessionNotice::ChannelConnected { course_id });
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.stop(StopReason::Disconnected).await;
        self.channel.close();
        self.state.channel_reset();
        self.notify(SessionNotice::ChannelClosed);
    }

    async fn start(&mut self, course_id: CourseId) -> Result<(), AttendanceError> {
        if self.state.is_active() {
            return Err(AttendanceError::AlreadyActive(
                self.state.course_id().unwrap_or(course_id),
            ));
        }
        if !self.channel.is_open() || self.channel.course_id() != Some(course_id) {
            return Err(AttendanceError::NoActiveChannel(course_id));
        }
        self.state.begin(course_id)?;

        let device = Arc::clone(&self.device);
        let source = match tokio::task::spawn_blocking(move || device.open()).await {
            Ok(Ok(source)) => source,
            Ok(Err(e)) => {
                self.state.abort();
                return Err(AttendanceError::CameraUnavailable(e));
            }
            Err(join) => {
                self.state.abort();
                return Err(AttendanceError::CameraUnavailable(CameraError::CaptureFailed(
                    join.to_string(),
                )));
            }
        };
        let worker = match CaptureWorker::spawn(source, self.config.capture_fps) {
            Ok(worker) => worker,
            Err(e) => {
                self.state.abort();
                return Err(AttendanceError::CameraUnavailable(e));
            }
        };

        self.state.activate(Utc::now())?;
        self.capture = Some(worker);

        let mut ticker = tokio::time::interval(self.config.send_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        self.channel.set_retry(true);

        tracing::info!(
            course = %course_id,
            interval_ms = self.config.send_interval_ms,
            "session started"
        );
        self.notify(SessionNotice::SessionStarted { course_id });
        Ok(())
    }

    /// Cancel the ticker and release the camera. Idempotent.
    async fn stop(&mut self, reason: StopReason) -> bool {
        self.ticker = None;
        self.release_camera().await;
        self.channel.set_retry(false);

        let stopped = self.state.stop();
        if stopped {
            let present = self.state.ledger().len();
            tracing::info!(
                course = ?self.state.course_id(),
                ?reason,
                present,
                frames = self.state.frames_sent(),
                "session stopped"
            );
            self.notify(SessionNotice::SessionStopped { reason, present });
        }
        stopped
    }

    /// Join the capture thread off the runtime; returns once the device is closed.
    async fn release_camera(&mut self) {
        let Some(mut capture) = self.capture.take() else {
            return;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || capture.stop()).await {
            tracing::error!(error = %e, "camera release did not complete cleanly");
        }
    }

    async fn teardown(&mut self) {
        self.stop(StopReason::Requested).await;
        self.channel.close();
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.state.status(),
            course_id: self.state.course_id(),
            started_at: self.state.started_at(),
            frames_sent: self.state.frames_sent(),
            server_ready: self.state.server_ready(),
            channel: self.channel.state(),
            camera_active: self.capture.is_some(),
            present: self.state.ledger().snapshot().to_vec(),
            observations: self.state.observations().to_vec(),
            tally: self.state.tally(),
        }
    }

    fn on_tick(&mut self) {
        if !self.state.is_active() {
            return;
        }
        if !self.channel.is_open() {
            tracing::debug!(channel = ?self.channel.state(), "channel not open, skipping tick");
            return;
        }
        let Some(frame) = self.capture.as_ref().and_then(|c| c.take_latest()) else {
            tracing::debug!("no new frame, skipping tick");
            return;
        };

        let sequence = self.state.frames_sent() + 1;
        let encoded = match self.encoder.encode(&frame, sequence) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, sequence, "frame encoding failed, skipping tick");
                return;
            }
        };
        let message = FrameMessage {
            image: encoded.to_base64(),
        };

        match self.channel.try_send(message.to_json()) {
            SendOutcome::Sent => {
                self.state.next_sequence();
                tracing::trace!(sequence, bytes = encoded.jpeg.len(), "frame sent");
            }
            SendOutcome::Dropped => tracing::debug!(sequence, "send queue full, frame dropped"),
            SendOutcome::NotConnected => tracing::debug!(sequence, "channel gone, frame dropped"),
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                if let Some(course_id) = self.channel.course_id() {
                    self.notify(SessionNotice::ChannelConnected { course_id });
                }
            }
            ChannelEvent::Message(msg) => {
                for event in self.state.apply_message(&msg, Utc::now()) {
                    match event {
                        SessionEvent::Ready => {
                            tracing::info!(course = ?self.state.course_id(), "server ready");
                            self.notify(SessionNotice::ServerReady);
                        }
                        SessionEvent::Recognized(record) => {
                            self.notify(SessionNotice::Recognized(record));
                        }
                        SessionEvent::ServerError(message) => {
                            tracing::warn!(%message, "server reported an error");
                            self.notify(SessionNotice::ServerError(message));
                        }
                    }
                }
            }
            ChannelEvent::Malformed(e) => {
                tracing::warn!(error = %e, "dropping malformed server message");
                self.notify(SessionNotice::Error(AttendanceError::MalformedMessage(e)));
            }
            ChannelEvent::Reconnecting { attempt, delay } => {
                self.state.channel_reset();
                self.notify(SessionNotice::Reconnecting { attempt, delay });
            }
            ChannelEvent::Closed => {
                self.state.channel_reset();
                self.notify(SessionNotice::ChannelClosed);
            }
            ChannelEvent::ConnectionLost { attempts } => {
                self.state.channel_reset();
                self.notify(SessionNotice::Error(AttendanceError::ConnectionLost { attempts }));
                self.stop(StopReason::ConnectionLost).await;
            }
        }
    }

    fn notify(&self, notice: SessionNotice) {
        // The receiver going away only means nobody is listening.
        let _ = self.notices.send(notice);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

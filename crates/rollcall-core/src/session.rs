//! Explicit, owned session state.
//!
//! The controller threads one [`SessionState`] through every operation; all
//! presence bookkeeping lives here so it can be exercised without a camera,
//! a socket, or a runtime.

use crate::ledger::PresenceLedger;
use crate::protocol::ServerMessage;
use crate::tracker::{ObservationTracker, TrackerConfig};
use crate::types::{AttendanceTally, CourseId, FaceObservation, PresenceRecord, RosterEntry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Starting,
    Active,
    Stopped,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("a session is already active for course {0}")]
    AlreadyActive(CourseId),
    #[error("a session is already starting")]
    AlreadyStarting,
    #[error("cannot activate a session that is {0:?}")]
    NotStarting(SessionStatus),
}

/// Outcome of applying a server message, for the controller to surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Ready,
    Recognized(PresenceRecord),
    ServerError(String),
}

#[derive(Debug, Clone)]
pub struct SessionState {
    course_id: Option<CourseId>,
    status: SessionStatus,
    started_at: Option<DateTime<Utc>>,
    frames_sent: u64,
    server_ready: bool,
    ledger: PresenceLedger,
    tracker: ObservationTracker,
    roster: Option<Vec<RosterEntry>>,
}

impl SessionState {
    pub fn new(tracker_config: TrackerConfig) -> Self {
        Self {
            course_id: None,
            status: SessionStatus::Idle,
            started_at: None,
            frames_sent: 0,
            server_ready: false,
            ledger: PresenceLedger::new(),
            tracker: ObservationTracker::new(tracker_config),
            roster: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn course_id(&self) -> Option<CourseId> {
        self.course_id
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn server_ready(&self) -> bool {
        self.server_ready
    }

    pub fn ledger(&self) -> &PresenceLedger {
        &self.ledger
    }

    pub fn tracker(&self) -> &ObservationTracker {
        &self.tracker
    }

    pub fn observations(&self) -> &[FaceObservation] {
        self.tracker.observations()
    }

    pub fn roster(&self) -> Option<&[RosterEntry]> {
        self.roster.as_deref()
    }

    /// Install the course roster; names on it become resolvable.
    pub fn set_roster(&mut self, roster: Vec<RosterEntry>) {
        self.tracker.seed_roster(&roster);
        self.roster = Some(roster);
    }

    /// Present/absent counts, once a roster is known.
    pub fn tally(&self) -> Option<AttendanceTally> {
        self.roster.as_deref().map(|roster| self.ledger.tally(roster))
    }

    /// Idle/Stopped → Starting.
    pub fn begin(&mut self, course_id: CourseId) -> Result<(), TransitionError> {
        match self.status {
            SessionStatus::Active => Err(TransitionError::AlreadyActive(
                self.course_id.unwrap_or(course_id),
            )),
            SessionStatus::Starting => Err(TransitionError::AlreadyStarting),
            SessionStatus::Idle | SessionStatus::Stopped => {
                self.course_id = Some(course_id);
                self.status = SessionStatus::Starting;
                Ok(())
            }
        }
    }

    /// Starting → Active. Presence and observation state start empty.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != SessionStatus::Starting {
            return Err(TransitionError::NotStarting(self.status));
        }
        self.ledger.reset();
        self.tracker.clear();
        self.frames_sent = 0;
        self.started_at = Some(now);
        self.status = SessionStatus::Active;
        Ok(())
    }

    /// Starting → Idle, when acquiring resources failed.
    pub fn abort(&mut self) {
        if self.status == SessionStatus::Starting {
            self.status = SessionStatus::Idle;
        }
    }

    /// Active/Starting → Stopped. Returns `false` (and does nothing) otherwise.
    ///
    /// The ledger is left readable until the next [`activate`](Self::activate).
    pub fn stop(&mut self) -> bool {
        match self.status {
            SessionStatus::Active | SessionStatus::Starting => {
                self.status = SessionStatus::Stopped;
                self.tracker.clear();
                true
            }
            SessionStatus::Idle | SessionStatus::Stopped => false,
        }
    }

    /// Sequence number for the next transmitted frame.
    pub fn next_sequence(&mut self) -> u64 {
        self.frames_sent += 1;
        self.frames_sent
    }

    /// The channel dropped; the server will announce readiness again.
    pub fn channel_reset(&mut self) {
        self.server_ready = false;
    }

    /// Apply one decoded server message.
    pub fn apply_message(&mut self, msg: &ServerMessage, now: DateTime<Utc>) -> Vec<SessionEvent> {
        match msg {
            ServerMessage::SessionReady => {
                self.server_ready = true;
                vec![SessionEvent::Ready]
            }
            ServerMessage::FaceData(data) => {
                if !self.is_active() {
                    tracing::debug!(status = ?self.status, "face_data outside an active session");
                    return Vec::new();
                }
                self.tracker
                    .apply(data, &mut self.ledger, now)
                    .into_iter()
                    .map(SessionEvent::Recognized)
                    .collect()
            }
            ServerMessage::Error { message } => vec![SessionEvent::ServerError(message.clone())],
            ServerMessage::Unknown => {
                tracing::debug!("ignoring unknown server message kind");
                Vec::new()
            }
        }
    }
}

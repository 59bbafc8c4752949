//! rollcall-core: attendance bookkeeping independent of camera and network.
//!
//! Decodes recognition responses, tracks faces across consecutive responses,
//! keeps the per-session presence ledger and maps face boxes onto a display.

pub mod ledger;
pub mod overlay;
pub mod protocol;
pub mod session;
pub mod tracker;
pub mod types;

pub use ledger::PresenceLedger;
pub use protocol::{decode_server_message, FaceData, FrameMessage, ProtocolError, ServerMessage};
pub use session::{SessionEvent, SessionState, SessionStatus, TransitionError};
pub use tracker::{ObservationTracker, TrackerConfig};
pub use types::{
    AttendanceTally, CourseId, FaceBox, FaceObservation, FrameSize, ObservationStatus,
    PresenceRecord, RosterEntry, StudentId,
};

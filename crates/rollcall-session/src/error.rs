use rollcall_core::{CourseId, ProtocolError, TransitionError};
use rollcall_hw::CameraError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Errors surfaced by the session controller.
#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[from] CameraError),
    #[error("no open attendance channel for course {0}")]
    NoActiveChannel(CourseId),
    #[error("connection lost after {attempts} reconnect attempts")]
    ConnectionLost { attempts: u32 },
    #[error("malformed server message: {0}")]
    MalformedMessage(#[from] ProtocolError),
    #[error("a session is already active for course {0}")]
    AlreadyActive(CourseId),
    #[error("invalid session transition: {0}")]
    Transition(TransitionError),
    #[error("channel error: {0}")]
    Transport(#[from] TransportError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("session controller exited")]
    ControllerClosed,
}

impl From<TransitionError> for AttendanceError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::AlreadyActive(course_id) => AttendanceError::AlreadyActive(course_id),
            other => AttendanceError::Transition(other),
        }
    }
}

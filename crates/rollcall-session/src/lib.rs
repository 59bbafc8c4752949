//! rollcall-session: runs an attendance session against the recognition server.
//!
//! The [`controller`] owns the session and is driven through a
//! [`SessionHandle`]. The [`channel`] module keeps the attendance channel
//! alive within a fixed reconnect budget, and [`api`] talks to the course
//! REST service for rosters and reports.

pub mod api;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod reconnect;
pub mod transport;

#[cfg(test)]
mod testing;

pub use api::{ApiError, CourseSummary, ExportArtifact, RosterClient};
pub use config::{Config, ConfigError};
pub use controller::{spawn_session, SessionHandle, SessionNotice, SessionSnapshot, StopReason};
pub use error::AttendanceError;
pub use reconnect::{ChannelState, ReconnectPolicy};
pub use transport::{Connector, TransportError, WsConnector};

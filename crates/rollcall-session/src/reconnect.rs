//! Reconnect bookkeeping for the attendance channel.
//!
//! [`Reconnector`] owns no sockets or timers; the channel supervisor reports
//! what happened and acts on the returned [`Decision`]. The budget counts
//! reconnect attempts. An attempt fails when connecting fails or times out, or
//! when the new connection closes before it carried a recognition response.
//! Only a recognition response proves the link and refills the budget:
//! `session_ready` and `error` are sent by servers that are about to drop the
//! connection again.

use serde::Serialize;
use std::time::Duration;

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Longest wait for a single connect, first one included.
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Observable state of the attendance channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Disconnected,
    /// `attempt` is 0 for the first connection, 1.. for reconnects.
    Connecting { attempt: u32 },
    Connected,
    /// Waiting out the delay before reconnect `attempt`.
    Backoff { attempt: u32 },
}

/// What the supervisor should do after a connection failed or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { attempt: u32, delay: Duration },
    /// The budget is spent; report the loss once and stay disconnected.
    GiveUp { attempts: u32 },
    /// Nobody needs the channel; stay disconnected quietly.
    Idle,
}

#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    state: ChannelState,
    failed: u32,
    reconnecting: bool,
    proven: bool,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ChannelState::Disconnected,
            failed: 0,
            reconnecting: false,
            proven: false,
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed
    }

    pub fn on_connect_started(&mut self) {
        let attempt = if self.reconnecting { self.failed + 1 } else { 0 };
        self.state = ChannelState::Connecting { attempt };
    }

    pub fn on_connected(&mut self) {
        self.state = ChannelState::Connected;
        self.proven = false;
    }

    /// The server answered a frame: the link works.
    pub fn on_recognition(&mut self) {
        self.proven = true;
        self.failed = 0;
        self.reconnecting = false;
    }

    /// A connect attempt failed or timed out.
    pub fn on_connect_failed(&mut self, retry_wanted: bool) -> Decision {
        if !self.reconnecting {
            // A first connection that fails is reported to the caller directly.
            self.reset();
            return Decision::Idle;
        }
        self.failed += 1;
        self.decide(retry_wanted)
    }

    /// An established connection closed without being asked to.
    pub fn on_closed(&mut self, retry_wanted: bool) -> Decision {
        if self.reconnecting && !self.proven {
            self.failed += 1;
        } else {
            self.reconnecting = true;
            self.failed = 0;
        }
        self.decide(retry_wanted)
    }

    /// The channel was closed on request; never retried.
    pub fn disconnect(&mut self) {
        self.reset();
    }

    fn decide(&mut self, retry_wanted: bool) -> Decision {
        if !retry_wanted {
            self.reset();
            return Decision::Idle;
        }
        if self.failed >= self.policy.max_attempts {
            let attempts = self.failed;
            self.reset();
            return Decision::GiveUp { attempts };
        }
        let attempt = self.failed + 1;
        self.state = ChannelState::Backoff { attempt };
        Decision::Retry {
            attempt,
            delay: self.policy.delay,
        }
    }

    fn reset(&mut self) {
        self.state = ChannelState::Disconnected;
        self.failed = 0;
        self.reconnecting = false;
        self.proven = false;
    }
}

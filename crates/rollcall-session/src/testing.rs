//! In-memory camera and connector used by the session tests.

use crate::transport::{Connection, Connector, Peer, TransportError};
use rollcall_hw::{CameraError, CaptureDevice, CaptureSource, Frame};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Hands out in-memory connections until `successes` is used up, then
/// refuses, or never answers when built with [`ScriptedConnector::stalling`].
pub struct ScriptedConnector {
    successes: usize,
    stall: bool,
    attempts: Arc<AtomicUsize>,
    peers: mpsc::UnboundedSender<Peer>,
}

pub type Scripted = (ScriptedConnector, mpsc::UnboundedReceiver<Peer>, Arc<AtomicUsize>);

impl ScriptedConnector {
    pub fn new(successes: usize) -> Scripted {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            successes,
            stall: false,
            attempts: Arc::clone(&attempts),
            peers: tx,
        };
        (connector, rx, attempts)
    }

    pub fn stalling(successes: usize) -> Scripted {
        let (mut connector, rx, attempts) = Self::new(successes);
        connector.stall = true;
        (connector, rx, attempts)
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, _url: &Url) -> impl Future<Output = Result<Connection, TransportError>> + Send {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        let result = if n < self.successes {
            let (connection, peer) = Connection::pair(4);
            let _ = self.peers.send(peer);
            Some(Ok(connection))
        } else if self.stall {
            None
        } else {
            Some(Err(TransportError::Connect("refused".into())))
        };
        async move {
            match result {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }
}

/// Camera that produces flat grey 64x48 frames and counts open handles.
#[derive(Clone, Default)]
pub struct FakeDevice {
    pub live: Arc<AtomicUsize>,
    pub fail: bool,
}

impl FakeDevice {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for FakeDevice {
    type Source = FakeSource;

    fn open(&self) -> Result<FakeSource, CameraError> {
        if self.fail {
            return Err(CameraError::PermissionDenied("/dev/video9".into()));
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSource {
            live: Arc::clone(&self.live),
            sequence: 0,
        })
    }
}

pub struct FakeSource {
    live: Arc<AtomicUsize>,
    sequence: u32,
}

impl CaptureSource for FakeSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.sequence += 1;
        Frame::from_rgb(vec![90; 64 * 48 * 3], 64, 48, self.sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

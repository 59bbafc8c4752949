//! Capture worker: owns a [`CaptureSource`] on a dedicated OS thread and
//! keeps only the most recent frame.
//!
//! The thread is the single owner of the device. [`CaptureWorker::stop`]
//! (or dropping the worker) wakes the thread from its frame-rate pause and
//! joins it, which drops the source and releases the camera before returning.
//! The only wait left is a frame read already in progress.

use crate::camera::{CameraError, CaptureSource};
use crate::frame::Frame;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Pause after a failed capture before trying again.
const ERROR_BACKOFF: Duration = Duration::from_millis(200);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock cannot leave a half-written value here.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Stop request the capture thread can sleep on.
#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn raise(&self) {
        *lock(&self.stopped) = true;
        self.wake.notify_all();
    }

    fn is_raised(&self) -> bool {
        *lock(&self.stopped)
    }

    /// Sleep for `pause` or until stopped. Returns whether stop was requested.
    fn wait(&self, pause: Duration) -> bool {
        let guard = lock(&self.stopped);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, pause, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }
}

/// Handle to a running capture thread.
pub struct CaptureWorker {
    stop: Arc<StopSignal>,
    latest: Arc<Mutex<Option<Frame>>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    /// Move `source` onto a new thread and start capturing at most `max_fps` frames per second.
    pub fn spawn<S: CaptureSource>(mut source: S, max_fps: u32) -> Result<Self, CameraError> {
        let stop = Arc::new(StopSignal::default());
        let latest = Arc::new(Mutex::new(None));
        let period = Duration::from_secs(1) / max_fps.max(1);

        let thread = {
            let stop = Arc::clone(&stop);
            let latest = Arc::clone(&latest);
            std::thread::Builder::new()
                .name("rollcall-capture".into())
                .spawn(move || {
                    tracing::info!(?period, "capture thread started");
                    let mut failures = 0u32;
                    while !stop.is_raised() {
                        let began = Instant::now();
                        let pause = match source.next_frame() {
                            Ok(frame) => {
                                failures = 0;
                                *lock(&latest) = Some(frame);
                                period.saturating_sub(began.elapsed())
                            }
                            Err(e) => {
                                failures += 1;
                                tracing::warn!(error = %e, failures, "frame capture failed");
                                ERROR_BACKOFF
                            }
                        };
                        if stop.wait(pause) {
                            break;
                        }
                    }
                    drop(source);
                    tracing::info!("capture thread exiting");
                })
                .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?
        };

        Ok(Self {
            stop,
            latest,
            thread: Some(thread),
        })
    }

    /// Take the most recent frame, if one arrived since the last call.
    pub fn take_latest(&self) -> Option<Frame> {
        lock(&self.latest).take()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop capturing and wait for the device to be released.
    ///
    /// Blocks for at most one frame read; async callers run it on a blocking thread.
    pub fn stop(&mut self) {
        self.stop.raise();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
        lock(&self.latest).take();
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        frames: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
    }

    impl CaptureSource for CountingSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            let n = self.frames.fetch_add(1, Ordering::SeqCst) as u32;
            Frame::from_rgb(vec![0; 2 * 2 * 3], 2, 2, n).map_err(|e| CameraError::CaptureFailed(e.to_string()))
        }
    }

    impl Drop for CountingSource {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct FailingSource;

    impl CaptureSource for FailingSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            Err(CameraError::CaptureFailed("unplugged".into()))
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_worker_publishes_latest_frame() {
        let frames = Arc::new(AtomicUsize::new(0));
        let live = Arc::new(AtomicUsize::new(1));
        let source = CountingSource {
            frames: Arc::clone(&frames),
            live: Arc::clone(&live),
        };
        let mut worker = CaptureWorker::spawn(source, 100).unwrap();

        wait_for(|| frames.load(Ordering::SeqCst) >= 2);
        let frame = worker.take_latest();
        assert!(frame.is_some());

        worker.stop();
        assert!(!worker.is_running());
        assert_eq!(live.load(Ordering::SeqCst), 0, "source must be dropped by stop()");
        assert!(worker.take_latest().is_none());
    }

    #[test]
    fn test_take_latest_consumes() {
        let frames = Arc::new(AtomicUsize::new(0));
        let live = Arc::new(AtomicUsize::new(1));
        let worker = CaptureWorker::spawn(
            CountingSource {
                frames: Arc::clone(&frames),
                live: Arc::clone(&live),
            },
            1,
        )
        .unwrap();

        wait_for(|| frames.load(Ordering::SeqCst) >= 1);
        wait_for(|| worker.take_latest().is_some());
        // At 1 fps, nothing new arrives right away.
        assert!(worker.take_latest().is_none());
        drop(worker);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_source_keeps_running() {
        let mut worker = CaptureWorker::spawn(FailingSource, 10).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(worker.take_latest().is_none());
        assert!(worker.is_running());
        worker.stop();
    }

    #[test]
    fn test_stop_interrupts_frame_rate_pause() {
        let frames = Arc::new(AtomicUsize::new(0));
        let live = Arc::new(AtomicUsize::new(1));
        let mut worker = CaptureWorker::spawn(
            CountingSource {
                frames: Arc::clone(&frames),
                live: Arc::clone(&live),
            },
            1,
        )
        .unwrap();
        wait_for(|| frames.load(Ordering::SeqCst) >= 1);

        let began = Instant::now();
        worker.stop();
        assert!(began.elapsed() < Duration::from_millis(500), "stop waited {:?}", began.elapsed());
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_interrupts_error_backoff() {
        let mut worker = CaptureWorker::spawn(FailingSource, 10).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let began = Instant::now();
        worker.stop();
        assert!(began.elapsed() < ERROR_BACKOFF);
    }
}

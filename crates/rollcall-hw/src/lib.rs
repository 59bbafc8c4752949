//! rollcall-hw: camera capture and frame encoding.
//!
//! Provides V4L2-based camera access, a capture thread that keeps the latest
//! frame, and the JPEG encoder that prepares frames for transmission.

pub mod camera;
pub mod capture;
pub mod encoder;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureDevice, CaptureSource, PixelFormat, V4lDevice};
pub use capture::CaptureWorker;
pub use encoder::{EncodeError, EncodedFrame, FrameEncoder};
pub use frame::Frame;

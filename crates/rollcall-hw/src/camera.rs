//! Capture devices. [`Camera`] drives a V4L2 node through the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Number of mmap buffers queued with the driver.
const STREAM_BUFFERS: u32 = 4;

/// Highest `/dev/videoN` index probed by [`Camera::list_devices`].
const MAX_VIDEO_NODES: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("not a video capture device")]
    StreamingNotSupported,
}

/// A capture-capable V4L2 node found on this machine.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera may hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    const TABLE: [(PixelFormat, &'static [u8; 4]); 3] = [
        (PixelFormat::Yuyv, b"YUYV"),
        (PixelFormat::Mjpeg, b"MJPG"),
        (PixelFormat::Grey, b"GREY"),
    ];

    pub fn fourcc(self) -> FourCC {
        let (_, code) = Self::TABLE
            .iter()
            .find(|(format, _)| *format == self)
            .copied()
            .unwrap_or((PixelFormat::Yuyv, b"YUYV"));
        FourCC::new(code)
    }

    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(_, code)| FourCC::new(code) == fourcc)
            .map(|(format, _)| *format)
    }
}

/// Something that yields camera frames one at a time.
///
/// Dropping the source releases the underlying device.
pub trait CaptureSource: Send + 'static {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Opens capture sources on demand. Opening may block (device permissions).
pub trait CaptureDevice: Send + Sync + 'static {
    type Source: CaptureSource;

    fn open(&self) -> Result<Self::Source, CameraError>;
}

/// A V4L2 device path plus the resolution to request from it.
#[derive(Debug, Clone)]
pub struct V4lDevice {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

impl CaptureDevice for V4lDevice {
    type Source = Camera;

    fn open(&self) -> Result<Camera, CameraError> {
        Camera::open(&self.path, self.width, self.height)
    }
}

/// An open V4L2 camera. The mmap stream is created on the first frame.
pub struct Camera {
    // Declared before `device` so buffers are unmapped before the fd closes.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub pixel_format: PixelFormat,
}

fn open_node(path: &str) -> Result<Device, CameraError> {
    if !Path::new(path).exists() {
        return Err(CameraError::DeviceNotFound(path.to_string()));
    }
    Device::with_path(path).map_err(|e| {
        let text = e.to_string();
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            CameraError::PermissionDenied(format!("{path}: {e}"))
        } else if text.contains("busy") || text.contains("EBUSY") {
            CameraError::DeviceBusy
        } else {
            CameraError::DeviceNotFound(format!("{path}: {e}"))
        }
    })
}

impl Camera {
    /// Open `device_path` and ask for YUYV at roughly `width`x`height`.
    ///
    /// Drivers that only offer MJPG or GREY are accepted; anything else fails.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        let device = open_node(device_path)?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("capability query: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut wanted = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("reading format: {e}")))?;
        wanted.fourcc = PixelFormat::Yuyv.fourcc();
        wanted.width = width;
        wanted.height = height;
        let granted = device
            .set_format(&wanted)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("setting format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(granted.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "driver offered {:?}; only YUYV, MJPG and GREY are handled",
                granted.fourcc
            ))
        })?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = granted.width,
            height = granted.height,
            format = ?pixel_format,
            "camera ready"
        );

        Ok(Self {
            stream: None,
            device,
            width: granted.width,
            height: granted.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    fn to_rgb(&self, raw: &[u8]) -> Result<Vec<u8>, CameraError> {
        let (w, h) = (self.width, self.height);
        let rgb = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(raw, w, h).map_err(|e| e.to_string()),
            PixelFormat::Grey => frame::grey_to_rgb(raw, w, h).map_err(|e| e.to_string()),
            PixelFormat::Mjpeg => image::load_from_memory_with_format(raw, image::ImageFormat::Jpeg)
                .map_err(|e| e.to_string())
                .and_then(|img| {
                    let img = img.to_rgb8();
                    if img.dimensions() == (w, h) {
                        Ok(img.into_raw())
                    } else {
                        Err(format!("MJPG frame is {:?}, expected {w}x{h}", img.dimensions()))
                    }
                }),
        };
        rgb.map_err(|reason| {
            CameraError::CaptureFailed(format!("{:?} conversion: {reason}", self.pixel_format))
        })
    }

    /// Capture-capable devices among `/dev/video0` .. `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_VIDEO_NODES)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

impl CaptureSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| CameraError::CaptureFailed(format!("mmap stream: {e}")))?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("stream not initialised".into()));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue: {e}")))?;
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let (raw, sequence) = (buf[..used].to_vec(), meta.sequence);

        let rgb = self.to_rgb(&raw)?;
        Frame::from_rgb(rgb, self.width, self.height, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.device_path, "releasing camera");
    }
}

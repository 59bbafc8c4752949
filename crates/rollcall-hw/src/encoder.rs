//! Frame encoder: downsample to the transmission size and encode as JPEG.

use crate::frame::Frame;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height} RGB")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// One frame ready for transmission.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
    pub jpeg: Vec<u8>,
}

impl EncodedFrame {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.jpeg)
    }
}

/// Resizes frames to a fixed size and JPEG-encodes them.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    width: u32,
    height: u32,
    quality: u8,
}

impl FrameEncoder {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width,
            height,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn encode(&self, frame: &Frame, sequence: u64) -> Result<EncodedFrame, EncodeError> {
        let expected = frame.width as usize * frame.height as usize * 3;
        let source: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(frame.width, frame.height, frame.data.as_slice()).ok_or(
                EncodeError::InvalidFrame {
                    width: frame.width,
                    height: frame.height,
                    expected,
                    actual: frame.data.len(),
                },
            )?;

        let resized = imageops::resize(&source, self.width, self.height, FilterType::Triangle);

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(&resized)?;

        tracing::trace!(sequence, bytes = jpeg.len(), "frame encoded");

        Ok(EncodedFrame {
            width: self.width,
            height: self.height,
            sequence,
            jpeg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let data = (0..width * height)
            .flat_map(|i| {
                let v = (i % 256) as u8;
                [v, 255 - v, v / 2]
            })
            .collect();
        Frame::from_rgb(data, width, height, 0).unwrap()
    }

    #[test]
    fn test_encode_downsamples_to_target() {
        let encoder = FrameEncoder::new(320, 240, 80);
        let encoded = encoder.encode(&gradient(640, 480), 7).unwrap();

        assert_eq!(encoded.sequence, 7);
        assert_eq!((encoded.width, encoded.height), (320, 240));
        let decoded = image::load_from_memory(&encoded.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
    }

    #[test]
    fn test_encode_output_is_jpeg() {
        let encoded = FrameEncoder::new(32, 24, 90).encode(&gradient(64, 48), 1).unwrap();
        assert_eq!(&encoded.jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_base64_roundtrip() {
        let encoded = FrameEncoder::new(32, 24, 90).encode(&gradient(32, 24), 1).unwrap();
        let text = encoded.to_base64();
        let bytes = base64::engine::general_purpose::STANDARD.decode(text).unwrap();
        assert_eq!(bytes, encoded.jpeg);
    }

    #[test]
    fn test_invalid_frame_is_rejected() {
        let frame = Frame {
            data: vec![0; 10],
            width: 4,
            height: 4,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        };
        let err = FrameEncoder::new(32, 24, 80).encode(&frame, 1).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidFrame { expected: 48, actual: 10, .. }));
    }

    #[test]
    fn test_quality_is_clamped() {
        let encoder = FrameEncoder::new(8, 8, 0);
        assert!(encoder.encode(&gradient(8, 8), 1).is_ok());
    }
}

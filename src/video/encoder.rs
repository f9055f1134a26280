//! JPEG frame encoder
//!
//! Camera frames that are already JPEG (MJPEG devices) pass through after a
//! marker check. Uncompressed formats are converted to RGB where needed and
//! encoded with the `image` crate.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

use super::format::{PixelFormat, Resolution};
use super::frame::{is_valid_jpeg, RawFrame};

/// Default JPEG quality
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("unsupported pixel format for JPEG encoding: {0}")]
    UnsupportedFormat(PixelFormat),

    #[error("{format} data too small for {resolution}: {actual} < {expected}")]
    SizeMismatch {
        format: PixelFormat,
        resolution: Resolution,
        expected: usize,
        actual: usize,
    },

    #[error("invalid JPEG frame from camera ({0} bytes)")]
    InvalidJpeg(usize),

    #[error("JPEG encoding failed: {0}")]
    Image(String),
}

/// Turns a raw camera frame into a compressed image
///
/// Implementations must be pure: a failure only affects the frame passed in.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &RawFrame) -> Result<Bytes, EncodeError>;
}

/// JPEG encoder backed by the `image` crate
#[derive(Debug, Clone)]
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    /// Create with specific quality (clamped to 1-100)
    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    fn compress(
        &self,
        pixels: &[u8],
        resolution: Resolution,
        color: ExtendedColorType,
    ) -> Result<Bytes, EncodeError> {
        let mut out = Vec::with_capacity(pixels.len() / 8);
        let mut encoder = ImageJpegEncoder::new_with_quality(&mut out, self.quality);
        encoder
            .encode(pixels, resolution.width, resolution.height, color)
            .map_err(|e| EncodeError::Image(e.to_string()))?;
        Ok(Bytes::from(out))
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::with_quality(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &RawFrame) -> Result<Bytes, EncodeError> {
        if frame.format.is_compressed() {
            if !is_valid_jpeg(frame.data()) {
                return Err(EncodeError::InvalidJpeg(frame.len()));
            }
            return Ok(frame.data_bytes());
        }

        let resolution = frame.resolution;
        let expected = frame
            .format
            .frame_size(resolution)
            .ok_or(EncodeError::UnsupportedFormat(frame.format))?;
        if expected == 0 || frame.len() < expected {
            return Err(EncodeError::SizeMismatch {
                format: frame.format,
                resolution,
                expected,
                actual: frame.len(),
            });
        }
        // Drivers may pad the buffer, only the leading image is used
        let data = &frame.data()[..expected];

        match frame.format {
            PixelFormat::Rgb24 => self.compress(data, resolution, ExtendedColorType::Rgb8),
            PixelFormat::Grey => self.compress(data, resolution, ExtendedColorType::L8),
            PixelFormat::Bgr24 => {
                let rgb = bgr_to_rgb(data);
                self.compress(&rgb, resolution, ExtendedColorType::Rgb8)
            }
            PixelFormat::Yuyv => {
                let rgb = yuyv_to_rgb(data);
                self.compress(&rgb, resolution, ExtendedColorType::Rgb8)
            }
            PixelFormat::Mjpeg | PixelFormat::Jpeg => unreachable!("handled above"),
        }
    }
}

fn bgr_to_rgb(bgr: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(bgr.len());
    for px in bgr.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    rgb
}

/// YUYV 4:2:2 to packed RGB24 (BT.601 limited range)
fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for chunk in yuyv.chunks_exact(4) {
        let u = chunk[1] as i32 - 128;
        let v = chunk[3] as i32 - 128;
        for y in [chunk[0], chunk[2]] {
            let c = 298 * (y as i32 - 16);
            rgb.push(clamp_u8((c + 409 * v + 128) >> 8));
            rgb.push(clamp_u8((c - 100 * u - 208 * v + 128) >> 8));
            rgb.push(clamp_u8((c + 516 * u + 128) >> 8));
        }
    }
    rgb
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_rgb(res: Resolution) -> RawFrame {
        RawFrame::new(
            vec![200u8; res.pixels() as usize * 3],
            res,
            PixelFormat::Rgb24,
        )
    }

    #[test]
    fn test_encode_rgb_produces_jpeg() {
        let encoder = JpegEncoder::default();
        let jpeg = encoder.encode(&solid_rgb(Resolution::new(64, 48))).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_mjpeg_passthrough() {
        let mut data = vec![0xFF, 0xD8];
        data.extend(vec![0x11u8; 300]);
        data.extend([0xFF, 0xD9]);
        let frame = RawFrame::new(data.clone(), Resolution::VGA, PixelFormat::Mjpeg);

        let out = JpegEncoder::default().encode(&frame).unwrap();
        assert_eq!(&out[..], &data[..]);
    }

    #[test]
    fn test_corrupt_mjpeg_rejected() {
        let frame = RawFrame::new(vec![0u8; 300], Resolution::VGA, PixelFormat::Mjpeg);
        assert_eq!(
            JpegEncoder::default().encode(&frame),
            Err(EncodeError::InvalidJpeg(300))
        );
    }

    #[test]
    fn test_short_frame_rejected() {
        let res = Resolution::new(8, 8);
        let frame = RawFrame::new(vec![0u8; 10], res, PixelFormat::Yuyv);
        assert!(matches!(
            JpegEncoder::default().encode(&frame),
            Err(EncodeError::SizeMismatch {
                expected: 128,
                actual: 10,
                ..
            })
        ));
    }

    #[test]
    fn test_encode_yuyv_and_grey() {
        let res = Resolution::new(16, 8);
        let encoder = JpegEncoder::with_quality(50);

        let yuyv = RawFrame::new(vec![128u8; 16 * 8 * 2], res, PixelFormat::Yuyv);
        assert!(encoder.encode(&yuyv).is_ok());

        let grey = RawFrame::new(vec![64u8; 16 * 8], res, PixelFormat::Grey);
        assert!(encoder.encode(&grey).is_ok());
    }

    #[test]
    fn test_yuyv_conversion_white_and_black() {
        // Y=235 is white, Y=16 is black in limited range
        let rgb = yuyv_to_rgb(&[235, 128, 16, 128]);
        assert_eq!(&rgb[..3], &[255, 255, 255]);
        assert_eq!(&rgb[3..], &[0, 0, 0]);
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(JpegEncoder::with_quality(0).quality(), 1);
        assert_eq!(JpegEncoder::with_quality(255).quality(), 100);
    }
}

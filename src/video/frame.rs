//! Frame data structures
//!
//! [`RawFrame`] is what a camera hands over, [`Frame`] is the encoded JPEG
//! that gets cached and fanned out to viewers.

use bytes::Bytes;
use std::time::{Duration, Instant};

use super::format::{PixelFormat, Resolution};

/// Minimum size of a plausible JPEG (SOI + headers + EOI)
const MIN_JPEG_SIZE: usize = 125;

/// A frame as read from the camera, before encoding
#[derive(Debug, Clone)]
pub struct RawFrame {
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format of `data`
    pub format: PixelFormat,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>, resolution: Resolution, format: PixelFormat) -> Self {
        Self {
            data: data.into(),
            resolution,
            format,
        }
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get frame data as Bytes (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An encoded JPEG frame
///
/// Cloning is cheap: the payload is reference counted, so every subscriber
/// queue shares one allocation.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Bytes,
    /// Capture sequence number, strictly increasing per server
    pub sequence: u64,
    /// Timestamp when frame was published
    pub capture_ts: Instant,
}

impl Frame {
    pub fn new(data: Bytes, sequence: u64) -> Self {
        Self {
            data,
            sequence,
            capture_ts: Instant::now(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Time since the frame was published
    pub fn age(&self) -> Duration {
        self.capture_ts.elapsed()
    }
}

/// Validate JPEG frame data (SOI marker at start, EOI or padding at end)
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    if data.len() < MIN_JPEG_SIZE {
        return false;
    }

    let start_marker = ((data[0] as u16) << 8) | data[1] as u16;
    if start_marker != 0xFFD8 {
        return false;
    }

    let end = data.len();
    let end_marker = ((data[end - 2] as u16) << 8) | data[end - 1] as u16;

    // Some UVC cameras pad the buffer after EOI
    matches!(end_marker, 0xFFD9 | 0xD900 | 0x0000)
}

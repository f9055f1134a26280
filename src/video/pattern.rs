//! Synthetic test-pattern camera
//!
//! Produces scrolling colour bars in RGB24 so the whole pipeline can run on
//! machines without a capture device.

use tracing::debug;

use super::camera::{CameraError, CameraSource};
use super::format::{PixelFormat, Resolution};
use super::frame::RawFrame;

/// SMPTE-ish bar colours
const BARS: [[u8; 3]; 8] = [
    [192, 192, 192],
    [192, 192, 0],
    [0, 192, 192],
    [0, 192, 0],
    [192, 0, 192],
    [192, 0, 0],
    [0, 0, 192],
    [16, 16, 16],
];

/// Pixels the bars move per frame
const SCROLL_STEP: u32 = 4;

pub struct TestPatternCamera {
    resolution: Resolution,
    device_count: u32,
    opened: Option<u32>,
    frame_counter: u64,
}

impl TestPatternCamera {
    /// `device_count` devices are "present": opening an index at or beyond it fails
    pub fn new(resolution: Resolution, device_count: u32) -> Self {
        Self {
            resolution,
            device_count,
            opened: None,
            frame_counter: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let width = self.resolution.width.max(1);
        let height = self.resolution.height as usize;
        let offset = ((self.frame_counter as u32).wrapping_mul(SCROLL_STEP)) % width;

        let mut row = Vec::with_capacity(width as usize * 3);
        for x in 0..width {
            let pos = (x + offset) % width;
            let bar = (pos as usize * BARS.len()) / width as usize;
            row.extend_from_slice(&BARS[bar]);
        }

        let mut data = Vec::with_capacity(row.len() * height);
        for _ in 0..height {
            data.extend_from_slice(&row);
        }
        data
    }
}

impl CameraSource for TestPatternCamera {
    fn name(&self) -> &str {
        "pattern"
    }

    fn open(&mut self, index: u32) -> Result<(), CameraError> {
        self.close();

        if index >= self.device_count {
            return Err(CameraError::Open {
                index,
                reason: format!("no such device ({} pattern devices)", self.device_count),
            });
        }

        self.opened = Some(index);
        self.frame_counter = 0;
        debug!("Test pattern camera {} opened at {}", index, self.resolution);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        if self.opened.is_none() {
            return Err(CameraError::NotOpen);
        }

        let data = self.render();
        self.frame_counter = self.frame_counter.wrapping_add(1);
        Ok(RawFrame::new(data, self.resolution, PixelFormat::Rgb24))
    }

    fn close(&mut self) {
        self.opened = None;
    }

    fn is_open(&self) -> bool {
        self.opened.is_some()
    }

    fn device_index(&self) -> Option<u32> {
        self.opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_out_of_range_fails() {
        let mut cam = TestPatternCamera::new(Resolution::QVGA, 1);
        assert!(matches!(cam.open(1), Err(CameraError::Open { index: 1, .. })));
        assert!(!cam.is_open());
        assert!(cam.open(0).is_ok());
        assert_eq!(cam.device_index(), Some(0));
    }

    #[test]
    fn test_read_requires_open() {
        let mut cam = TestPatternCamera::new(Resolution::QVGA, 1);
        assert_eq!(cam.read_frame().unwrap_err(), CameraError::NotOpen);
    }

    #[test]
    fn test_frames_scroll() {
        let mut cam = TestPatternCamera::new(Resolution::new(64, 8), 1);
        cam.open(0).unwrap();
        let a = cam.read_frame().unwrap();
        let b = cam.read_frame().unwrap();
        assert_eq!(a.len(), 64 * 8 * 3);
        assert_eq!(a.format, PixelFormat::Rgb24);
        assert_ne!(a.data(), b.data());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut cam = TestPatternCamera::new(Resolution::QVGA, 2);
        cam.close();
        cam.open(1).unwrap();
        // Re-open releases the previous handle
        cam.open(0).unwrap();
        assert_eq!(cam.device_index(), Some(0));
        cam.close();
        cam.close();
        assert!(!cam.is_open());
    }
}

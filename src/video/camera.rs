//! Camera source abstraction
//!
//! A [`CameraSource`] owns one device handle. Opening while a handle is
//! already open releases the old one first, and closing is always safe.
//! Read failures are transient: the capture loop decides how to retry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::format::{PixelFormat, Resolution};
use super::frame::RawFrame;
use super::pattern::TestPatternCamera;

/// Camera open/read failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("error opening video capture device {index}: {reason}")]
    Open { index: u32, reason: String },

    #[error("failed to read frame from camera: {0}")]
    Read(String),

    #[error("camera returned an empty frame")]
    EmptyFrame,

    #[error("camera is not open")]
    NotOpen,

    #[error("camera backend not supported: {0}")]
    Unsupported(String),
}

/// A capture device that can be opened by index and read one frame at a time
///
/// Implementations are driven from the blocking thread pool, so `read_frame`
/// may block for up to one device frame period.
pub trait CameraSource: Send {
    /// Human readable backend name (for logs)
    fn name(&self) -> &str;

    /// Open the device with the given index, releasing any open handle first
    fn open(&mut self, index: u32) -> Result<(), CameraError>;

    /// Read a single frame
    fn read_frame(&mut self) -> Result<RawFrame, CameraError>;

    /// Release the device. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Index of the currently open device
    fn device_index(&self) -> Option<u32>;
}

/// Camera backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// Synthetic colour bars, no hardware needed
    #[default]
    Pattern,
    /// V4L2 device at /dev/video{index}
    V4l,
}

impl std::fmt::Display for CameraBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackend::Pattern => write!(f, "pattern"),
            CameraBackend::V4l => write!(f, "v4l"),
        }
    }
}

impl std::str::FromStr for CameraBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pattern" | "test-pattern" => Ok(CameraBackend::Pattern),
            "v4l" | "v4l2" => Ok(CameraBackend::V4l),
            _ => Err(format!("Unknown camera backend: {}", s)),
        }
    }
}

/// Parameters requested from the device when it is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraSettings {
    pub resolution: Resolution,
    pub format: PixelFormat,
    /// Requested device frame rate (0 = driver default)
    pub fps: u32,
    /// Number of devices the pattern backend pretends to have
    pub pattern_devices: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::VGA,
            format: PixelFormat::Mjpeg,
            fps: 30,
            pattern_devices: 1,
        }
    }
}

/// Build an (unopened) camera for the selected backend
pub fn create_camera(backend: CameraBackend, settings: CameraSettings) -> Box<dyn CameraSource> {
    match backend {
        CameraBackend::Pattern => Box::new(TestPatternCamera::new(
            settings.resolution,
            settings.pattern_devices,
        )),
        #[cfg(feature = "v4l")]
        CameraBackend::V4l => Box::new(super::v4l2_camera::V4lCamera::new(settings)),
        #[cfg(not(feature = "v4l"))]
        CameraBackend::V4l => Box::new(UnsupportedCamera::new(
            "v4l support was not compiled in (enable the `v4l` feature)",
        )),
    }
}

/// Placeholder for a backend that is not available in this build
///
/// Every open fails, which leaves the server running in its degraded
/// "no camera" state instead of refusing to start.
pub struct UnsupportedCamera {
    reason: String,
}

impl UnsupportedCamera {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl CameraSource for UnsupportedCamera {
    fn name(&self) -> &str {
        "unsupported"
    }

    fn open(&mut self, _index: u32) -> Result<(), CameraError> {
        Err(CameraError::Unsupported(self.reason.clone()))
    }

    fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        Err(CameraError::NotOpen)
    }

    fn close(&mut self) {}

    fn is_open(&self) -> bool {
        false
    }

    fn device_index(&self) -> Option<u32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("v4l2".parse::<CameraBackend>().unwrap(), CameraBackend::V4l);
        assert_eq!(
            "Pattern".parse::<CameraBackend>().unwrap(),
            CameraBackend::Pattern
        );
        assert!("gocv".parse::<CameraBackend>().is_err());
    }

    #[test]
    fn test_unsupported_camera_never_opens() {
        let mut cam = UnsupportedCamera::new("nope");
        assert!(matches!(cam.open(0), Err(CameraError::Unsupported(_))));
        assert!(!cam.is_open());
        cam.close();
        cam.close();
    }

    #[cfg(not(feature = "v4l"))]
    #[test]
    fn test_v4l_backend_without_feature() {
        let mut cam = create_camera(CameraBackend::V4l, CameraSettings::default());
        assert!(matches!(cam.open(0), Err(CameraError::Unsupported(_))));
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::video::{CameraBackend, CameraSettings, PixelFormat, Resolution};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Capture device settings
    pub camera: CameraConfig,
    /// Capture loop settings
    pub capture: CaptureConfig,
    /// Viewer queue settings
    pub stream: StreamConfig,
    /// Stream server HTTP settings
    pub web: WebConfig,
    /// Static viewer page server settings
    pub viewer: ViewerConfig,
}

impl AppConfig {
    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.camera.resolution().is_valid() {
            return Err(AppError::Config(format!(
                "camera resolution {} is out of range (16x16 to 15360x8640)",
                self.camera.resolution()
            )));
        }
        if self.capture.interval_ms == 0 {
            return Err(AppError::Config(
                "capture.interval_ms must be greater than 0".to_string(),
            ));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(AppError::Config(format!(
                "capture.jpeg_quality must be 1-100, got {}",
                self.capture.jpeg_quality
            )));
        }
        if self.stream.queue_capacity == 0 {
            return Err(AppError::Config(
                "stream.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.stream.write_buffer_bytes < 1024 {
            return Err(AppError::Config(
                "stream.write_buffer_bytes must be at least 1024".to_string(),
            ));
        }
        if self.web.http_port == 0 || self.viewer.port == 0 {
            return Err(AppError::Config("ports must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture backend
    pub backend: CameraBackend,
    /// Device index opened at startup (/dev/video{index} for v4l)
    pub index: u32,
    /// Requested resolution width
    pub width: u32,
    /// Requested resolution height
    pub height: u32,
    /// Requested pixel format
    pub format: PixelFormat,
    /// Requested device frame rate
    pub fps: u32,
    /// Number of devices the pattern backend exposes
    pub pattern_devices: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: CameraBackend::Pattern,
            index: 0,
            width: 640,
            height: 480,
            format: PixelFormat::Mjpeg,
            fps: 30,
            pattern_devices: 1,
        }
    }
}

impl CameraConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn settings(&self) -> CameraSettings {
        CameraSettings {
            resolution: self.resolution(),
            format: self.format,
            fps: self.fps,
            pattern_devices: self.pattern_devices,
        }
    }
}

/// Capture loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Delay between capture ticks
    pub interval_ms: u64,
    /// Pause after a failed camera read
    pub read_backoff_ms: u64,
    /// JPEG quality for uncompressed camera formats (1-100)
    pub jpeg_quality: u8,
    /// Clear the reported error once frames flow again
    pub clear_error_on_frame: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: 33,
            read_backoff_ms: 100,
            jpeg_quality: 80,
            clear_error_on_frame: false,
        }
    }
}

impl CaptureConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }
}

/// Viewer queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Frames buffered per viewer before it is dropped as too slow
    pub queue_capacity: usize,
    /// Bytes buffered between a session and its HTTP response body
    pub write_buffer_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            write_buffer_bytes: 256 * 1024,
        }
    }
}

/// Stream server HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub http_port: u16,
    /// Directory served at `/` (skipped when missing)
    pub static_dir: Option<String>,
    /// Allow cross-origin requests
    pub cors: bool,
    /// Start capturing as soon as the server is up
    pub autostart: bool,
    /// Grace period for open connections on shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
            static_dir: Some("static".to_string()),
            cors: true,
            autostart: true,
            shutdown_timeout_secs: 5,
        }
    }
}

/// Static viewer server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Directory holding the viewer page
    pub static_dir: String,
    pub shutdown_timeout_secs: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8081,
            static_dir: "viewer".to_string(),
            shutdown_timeout_secs: 5,
        }
    }
}

//! Video capture module
//!
//! Camera backends, raw/encoded frame types and the JPEG encoder.

pub mod camera;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod pattern;

#[cfg(feature = "v4l")]
pub mod v4l2_camera;

#[cfg(test)]
pub(crate) mod testing;

pub use camera::{create_camera, CameraBackend, CameraError, CameraSettings, CameraSource};
pub use encoder::{EncodeError, FrameEncoder, JpegEncoder};
pub use format::{PixelFormat, Resolution};
pub use frame::{Frame, RawFrame};
pub use pattern::TestPatternCamera;

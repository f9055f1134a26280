//! V4L2 camera backend
//!
//! Opens `/dev/video{index}` with memory-mapped buffers.

use bytes::Bytes;
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use super::camera::{CameraError, CameraSettings, CameraSource};
use super::format::{PixelFormat, Resolution};
use super::frame::RawFrame;

/// Number of mmap capture buffers (small for low latency)
const BUFFER_COUNT: u32 = 2;
/// Minimum valid frame size (bytes)
const MIN_FRAME_SIZE: usize = 128;

struct OpenDevice {
    index: u32,
    resolution: Resolution,
    format: PixelFormat,
    // Declared before `_device` so the buffers are unmapped first
    stream: Stream<'static>,
    _device: Device,
}

pub struct V4lCamera {
    settings: CameraSettings,
    handle: Option<OpenDevice>,
}

impl V4lCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            handle: None,
        }
    }

    fn open_device(&self, index: u32) -> Result<OpenDevice, CameraError> {
        let open_err = |reason: String| CameraError::Open { index, reason };

        let device = Device::new(index as usize).map_err(|e| open_err(e.to_string()))?;

        let mut fmt = device.format().map_err(|e| open_err(e.to_string()))?;
        fmt.width = self.settings.resolution.width;
        fmt.height = self.settings.resolution.height;
        fmt.fourcc = self.settings.format.to_fourcc();
        let actual = device
            .set_format(&fmt)
            .map_err(|e| open_err(e.to_string()))?;

        let format = PixelFormat::from_fourcc(actual.fourcc)
            .ok_or_else(|| open_err(format!("unsupported negotiated format {}", actual.fourcc)))?;
        let resolution = Resolution::new(actual.width, actual.height);

        if self.settings.fps > 0 {
            if let Err(e) = device.set_params(&Parameters::with_fps(self.settings.fps)) {
                warn!("Failed to set {} fps on /dev/video{}: {}", self.settings.fps, index, e);
            }
        }

        let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| open_err(format!("failed to create capture stream: {}", e)))?;

        info!(
            "Opened /dev/video{} at {} {} (requested {} {})",
            index, resolution, format, self.settings.resolution, self.settings.format
        );

        Ok(OpenDevice {
            index,
            resolution,
            format,
            stream,
            _device: device,
        })
    }
}

impl CameraSource for V4lCamera {
    fn name(&self) -> &str {
        "v4l"
    }

    fn open(&mut self, index: u32) -> Result<(), CameraError> {
        self.close();
        self.handle = Some(self.open_device(index)?);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        let dev = self.handle.as_mut().ok_or(CameraError::NotOpen)?;

        let (buf, meta) = dev
            .stream
            .next()
            .map_err(|e| CameraError::Read(e.to_string()))?;

        // Use actual bytes used, not buffer size
        let used = (meta.bytesused as usize).min(buf.len());
        if used < MIN_FRAME_SIZE {
            return Err(CameraError::EmptyFrame);
        }

        Ok(RawFrame::new(
            Bytes::copy_from_slice(&buf[..used]),
            dev.resolution,
            dev.format,
        ))
    }

    fn close(&mut self) {
        if let Some(dev) = self.handle.take() {
            info!("Released /dev/video{}", dev.index);
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn device_index(&self) -> Option<u32> {
        self.handle.as_ref().map(|d| d.index)
    }
}

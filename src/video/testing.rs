//! Scripted camera for tests
//!
//! The test keeps a [`CameraScript`] handle while the server owns the boxed
//! camera, so reads can be made to fail or panic after startup.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::camera::{CameraError, CameraSource};
use super::format::{PixelFormat, Resolution};
use super::frame::RawFrame;

/// What the next `read_frame` call does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStep {
    /// Return a valid MJPEG frame
    Frame,
    /// Return a read error
    Fail,
    /// Return an MJPEG buffer the encoder rejects
    Corrupt,
    /// Panic inside the read
    Panic,
}

#[derive(Default)]
struct ScriptState {
    missing: bool,
    opened: Option<u32>,
    steps: VecDeque<ReadStep>,
    opens: usize,
    closes: usize,
    reads: usize,
}

#[derive(Clone, Default)]
pub struct CameraScript {
    state: Arc<Mutex<ScriptState>>,
}

impl CameraScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A script whose device is absent: every open fails
    pub fn missing() -> Self {
        let script = Self::new();
        script.set_missing(true);
        script
    }

    pub fn camera(&self) -> Box<dyn CameraSource> {
        Box::new(ScriptedCamera {
            script: self.clone(),
        })
    }

    pub fn set_missing(&self, missing: bool) {
        self.state.lock().missing = missing;
    }

    /// Queue read outcomes; once the queue runs dry every read succeeds
    pub fn push(&self, steps: impl IntoIterator<Item = ReadStep>) {
        self.state.lock().steps.extend(steps);
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }
}

/// A small but well-formed JPEG-looking payload tagged with `tag`
pub fn jpeg_payload(tag: u8) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];
    data.extend(std::iter::repeat(tag).take(160));
    data.extend([0xFF, 0xD9]);
    data
}

struct ScriptedCamera {
    script: CameraScript,
}

impl CameraSource for ScriptedCamera {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&mut self, index: u32) -> Result<(), CameraError> {
        let mut state = self.script.state.lock();
        state.opened = None;
        state.opens += 1;
        if state.missing {
            return Err(CameraError::Open {
                index,
                reason: "device not present".to_string(),
            });
        }
        state.opened = Some(index);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        let step = {
            let mut state = self.script.state.lock();
            if state.opened.is_none() {
                return Err(CameraError::NotOpen);
            }
            state.reads += 1;
            state.steps.pop_front().unwrap_or(ReadStep::Frame)
        };

        match step {
            ReadStep::Frame => Ok(RawFrame::new(
                jpeg_payload(0x42),
                Resolution::QVGA,
                PixelFormat::Mjpeg,
            )),
            ReadStep::Fail => Err(CameraError::Read("scripted failure".to_string())),
            ReadStep::Corrupt => Ok(RawFrame::new(
                vec![0u8; 200],
                Resolution::QVGA,
                PixelFormat::Mjpeg,
            )),
            ReadStep::Panic => panic!("scripted camera panic"),
        }
    }

    fn close(&mut self) {
        let mut state = self.script.state.lock();
        if state.opened.take().is_some() {
            state.closes += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.script.state.lock().opened.is_some()
    }

    fn device_index(&self) -> Option<u32> {
        self.script.state.lock().opened
    }
}

//! Capture loop
//!
//! One loop per running server. Each tick reads a frame from the camera,
//! encodes it and publishes it. The blocking part of a tick runs on the
//! blocking pool and is awaited before the next tick is scheduled, so ticks
//! never overlap and cancellation is observed between ticks.

use serde::Serialize;
use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::registry::BroadcastReport;
use super::server::{CaptureError, Shared};
use crate::video::CameraError;
use crate::warn_throttled;

/// Default delay between capture ticks (about 30 fps)
pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_millis(33);

/// Default pause after a failed camera read
pub const DEFAULT_READ_BACKOFF: Duration = Duration::from_millis(100);

const READ_ERROR_KEY: &str = "camera_read";
const ENCODE_ERROR_KEY: &str = "frame_encode";

/// Lifecycle of a capture loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePhase {
    /// Spawned, waiting for the start signal
    WaitingForStart,
    /// Ticking
    Running,
    /// Exited (also reported before the first start)
    Stopped,
}

impl std::fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapturePhase::WaitingForStart => write!(f, "waiting_for_start"),
            CapturePhase::Running => write!(f, "running"),
            CapturePhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// No camera bound, nothing to read
    NoCamera,
    ReadFailed,
    EncodeFailed,
    /// Frame captured after the server stopped running, not published
    Discarded,
    Published(BroadcastReport),
}

/// Read, encode and publish one frame. Blocking.
///
/// The camera mutex is released before the state lock is taken, so a slow
/// read never stalls viewers attaching or detaching.
pub(crate) fn capture_tick(shared: &Shared) -> TickOutcome {
    let read = {
        let mut camera = shared.camera.lock();
        if !camera.is_open() {
            return TickOutcome::NoCamera;
        }
        camera.read_frame()
    };

    let raw = match read.and_then(|frame| {
        if frame.is_empty() {
            Err(CameraError::EmptyFrame)
        } else {
            Ok(frame)
        }
    }) {
        Ok(raw) => raw,
        Err(e) => {
            warn_throttled!(shared.throttler, READ_ERROR_KEY, "Camera read failed: {}", e);
            shared.record_error(e.into());
            return TickOutcome::ReadFailed;
        }
    };

    let data = match shared.encoder.encode(&raw) {
        Ok(data) => data,
        Err(e) => {
            warn_throttled!(shared.throttler, ENCODE_ERROR_KEY, "Failed to encode frame: {}", e);
            shared.record_error(e.into());
            return TickOutcome::EncodeFailed;
        }
    };

    if !shared.throttler.is_empty() {
        shared.throttler.clear(READ_ERROR_KEY);
        shared.throttler.clear(ENCODE_ERROR_KEY);
    }

    let mut state = shared.state.write();
    if !state.running {
        return TickOutcome::Discarded;
    }
    if shared.options.clear_error_on_frame {
        state.last_error = None;
    }
    let (_, report) = state.broadcaster.publish(data);
    TickOutcome::Published(report)
}

/// Owner's handle on a spawned capture loop
pub(crate) struct CaptureHandle {
    cancel: CancellationToken,
    start: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CaptureHandle {
    /// Spawn a loop in `WaitingForStart`; it does nothing until [`begin`](Self::begin)
    pub(crate) fn spawn(shared: Arc<Shared>) -> Self {
        let cancel = CancellationToken::new();
        let (start_tx, start_rx) = oneshot::channel();

        shared.active_loops.fetch_add(1, Ordering::SeqCst);
        shared.set_phase(CapturePhase::WaitingForStart);

        let capture = CaptureLoop {
            shared,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(capture.run(start_rx));

        Self {
            cancel,
            start: Some(start_tx),
            task,
        }
    }

    pub(crate) fn begin(&mut self) {
        if let Some(start) = self.start.take() {
            let _ = start.send(());
        }
    }

    /// Cancel the loop and wait until it has exited
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Capture loop task failed: {}", e);
        }
    }
}

struct CaptureLoop {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl CaptureLoop {
    async fn run(self, start: oneshot::Receiver<()>) {
        let started = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            signal = start => signal.is_ok(),
        };

        if started {
            self.shared.set_phase(CapturePhase::Running);
            info!(
                "Capture loop started ({}ms interval)",
                self.shared.options.capture_interval.as_millis()
            );
            self.tick_until_cancelled().await;
        }

        self.shared.set_phase(CapturePhase::Stopped);
        self.shared.active_loops.fetch_sub(1, Ordering::SeqCst);
        info!("Capture loop stopped");
    }

    async fn tick_until_cancelled(&self) {
        let mut ticker = tokio::time::interval(self.shared.options.capture_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let shared = self.shared.clone();
            let outcome = match tokio::task::spawn_blocking(move || capture_tick(&shared)).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let reason = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        "capture task cancelled".to_string()
                    };
                    error!("Capture tick panicked: {}", reason);
                    self.shared.capture_died(CaptureError::Panicked(reason));
                    return;
                }
            };

            match outcome {
                TickOutcome::ReadFailed => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.shared.options.read_backoff) => {}
                    }
                }
                TickOutcome::Published(report) if report.evicted > 0 => {
                    debug!(
                        "Frame delivered to {} viewer(s), evicted {}",
                        report.delivered, report.evicted
                    );
                }
                other => trace!("Capture tick: {:?}", other),
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Stream server
//!
//! [`StreamServer`] owns the camera, the capture loop and the set of
//! attached viewers, and exposes the start/stop lifecycle on top of them.
//!
//! Locking: the camera sits behind its own mutex so a blocking read never
//! holds the state lock. Code that needs both takes the camera first.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::broadcaster::FrameBroadcaster;
use super::capture::{
    CaptureHandle, CapturePhase, DEFAULT_CAPTURE_INTERVAL, DEFAULT_READ_BACKOFF,
};
use super::registry::{SubscriberId, SubscriberInfo, DEFAULT_QUEUE_CAPACITY};
use super::subscription::Subscription;
use crate::config::AppConfig;
use crate::utils::LogThrottler;
use crate::video::{create_camera, CameraError, CameraSource, EncodeError, Frame, FrameEncoder, JpegEncoder};

/// Most recent capture-side failure, reported by health checks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("capture loop panicked: {0}")]
    Panicked(String),
}

/// Attach refused
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    #[error("Camera not available")]
    Unavailable,
}

/// Tunables for the capture loop and viewer queues
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub capture_interval: Duration,
    pub read_backoff: Duration,
    pub queue_capacity: usize,
    /// Clear the recorded error as soon as a frame is published again.
    /// When false only a successful camera open clears it.
    pub clear_error_on_frame: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            capture_interval: DEFAULT_CAPTURE_INTERVAL,
            read_backoff: DEFAULT_READ_BACKOFF,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            clear_error_on_frame: false,
        }
    }
}

impl StreamOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            capture_interval: config.capture.interval(),
            read_backoff: config.capture.read_backoff(),
            queue_capacity: config.stream.queue_capacity,
            clear_error_on_frame: config.capture.clear_error_on_frame,
        }
    }
}

/// Health snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub running: bool,
    /// Last recorded error, empty when there is none
    pub error: String,
    pub subscriber_count: usize,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.running && self.error.is_empty()
    }
}

/// Detailed status for the control API
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub running: bool,
    pub phase: CapturePhase,
    pub camera: String,
    pub camera_index: Option<u32>,
    pub queue_capacity: usize,
    pub frames_published: u64,
    pub subscribers_evicted: u64,
    pub last_frame_age_ms: Option<u64>,
    pub last_error: Option<String>,
    pub subscribers: Vec<SubscriberInfo>,
}

pub(crate) struct ServerState {
    pub(crate) running: bool,
    pub(crate) last_error: Option<CaptureError>,
    /// Index of the bound camera, `None` when no camera is usable
    pub(crate) camera_index: Option<u32>,
    pub(crate) broadcaster: FrameBroadcaster,
}

/// State shared between the server, its capture loop and its viewers
pub(crate) struct Shared {
    pub(crate) state: RwLock<ServerState>,
    pub(crate) camera: Mutex<Box<dyn CameraSource>>,
    pub(crate) encoder: Arc<dyn FrameEncoder>,
    pub(crate) options: StreamOptions,
    pub(crate) throttler: LogThrottler,
    pub(crate) active_loops: AtomicUsize,
    camera_name: String,
    phase: watch::Sender<CapturePhase>,
}

impl Shared {
    pub(crate) fn new(
        camera: Box<dyn CameraSource>,
        encoder: Arc<dyn FrameEncoder>,
        options: StreamOptions,
    ) -> Self {
        let (phase, _) = watch::channel(CapturePhase::Stopped);
        Self {
            state: RwLock::new(ServerState {
                running: false,
                last_error: None,
                camera_index: None,
                broadcaster: FrameBroadcaster::new(options.queue_capacity),
            }),
            camera_name: camera.name().to_string(),
            camera: Mutex::new(camera),
            encoder,
            options,
            throttler: LogThrottler::with_secs(5),
            active_loops: AtomicUsize::new(0),
            phase,
        }
    }

    /// Returns false if already running
    pub(crate) fn mark_running(&self) -> bool {
        let mut state = self.state.write();
        !std::mem::replace(&mut state.running, true)
    }

    /// Returns false if already stopped
    pub(crate) fn mark_stopped(&self) -> bool {
        let mut state = self.state.write();
        std::mem::replace(&mut state.running, false)
    }

    /// Open (or reopen) the camera. Blocking.
    pub(crate) fn open_camera(&self, index: u32) -> Result<(), CameraError> {
        let mut camera = self.camera.lock();
        let result = camera.open(index);

        let mut state = self.state.write();
        match &result {
            Ok(()) => {
                state.camera_index = Some(index);
                state.last_error = None;
                info!("Opened {} camera {}", camera.name(), index);
            }
            Err(e) => {
                state.camera_index = None;
                state.last_error = Some(e.clone().into());
                warn!("Failed to open camera {}: {}", index, e);
            }
        }
        result
    }

    /// Close the camera. Blocking.
    pub(crate) fn release_camera(&self) {
        let mut camera = self.camera.lock();
        camera.close();
        self.state.write().camera_index = None;
    }

    pub(crate) fn record_error(&self, error: CaptureError) {
        self.state.write().last_error = Some(error);
    }

    /// The capture loop hit something it cannot recover from
    pub(crate) fn capture_died(&self, error: CaptureError) {
        let mut state = self.state.write();
        state.running = false;
        state.last_error = Some(error);
    }

    /// A panic belongs to the loop that died, not to the camera
    pub(crate) fn clear_panicked(&self) {
        let mut state = self.state.write();
        if matches!(state.last_error, Some(CaptureError::Panicked(_))) {
            state.last_error = None;
        }
    }

    pub(crate) fn detach(&self, id: SubscriberId) -> bool {
        let removed = self.state.write().broadcaster.unsubscribe(id);
        if removed {
            debug!("{} detached", id);
        }
        removed
    }

    pub(crate) fn set_phase(&self, phase: CapturePhase) {
        self.phase.send_replace(phase);
    }

    pub(crate) fn phase(&self) -> CapturePhase {
        *self.phase.borrow()
    }

    pub(crate) fn phase_watch(&self) -> watch::Receiver<CapturePhase> {
        self.phase.subscribe()
    }
}

/// Camera MJPEG broadcaster with start/stop lifecycle
pub struct StreamServer {
    shared: Arc<Shared>,
    /// Serializes start, stop and camera (re)opening
    capture: tokio::sync::Mutex<Option<CaptureHandle>>,
}

impl StreamServer {
    pub fn new(
        camera: Box<dyn CameraSource>,
        encoder: Arc<dyn FrameEncoder>,
        options: StreamOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(camera, encoder, options)),
            capture: tokio::sync::Mutex::new(None),
        }
    }

    /// Build the camera backend and encoder selected in `config`
    pub fn from_config(config: &AppConfig) -> Self {
        let camera = create_camera(config.camera.backend, config.camera.settings());
        let encoder = Arc::new(JpegEncoder::with_quality(config.capture.jpeg_quality));
        Self::new(camera, encoder, StreamOptions::from_config(config))
    }

    /// Start capturing. Idempotent.
    ///
    /// The capture loop is launched even when the camera cannot be opened;
    /// the open error is returned and the server keeps running without a
    /// camera until [`open_camera`](Self::open_camera) succeeds.
    pub async fn start(&self, index: u32) -> Result<(), CameraError> {
        let mut capture = self.capture.lock().await;

        if !self.shared.mark_running() {
            debug!("Stream server already running");
            return Ok(());
        }

        // A loop that died on its own is still parked here
        if let Some(stale) = capture.take() {
            stale.shutdown().await;
        }
        self.shared.clear_panicked();

        let mut handle = CaptureHandle::spawn(self.shared.clone());
        handle.begin();
        *capture = Some(handle);
        info!("Stream server started");

        if self.camera_bound() {
            return Ok(());
        }
        self.open_blocking(index).await
    }

    /// Stop capturing, release the camera and close every viewer. Idempotent.
    pub async fn stop(&self) {
        let mut capture = self.capture.lock().await;

        let was_running = self.shared.mark_stopped();
        let handle = capture.take();
        if !was_running && handle.is_none() {
            debug!("Stream server not running");
            return;
        }

        if let Some(handle) = handle {
            handle.shutdown().await;
        }

        let shared = self.shared.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || shared.release_camera()).await {
            warn!("Failed to release camera: {}", e);
        }

        let closed = self.shared.state.write().broadcaster.close_all();
        info!("Stream server stopped, closed {} viewer(s)", closed);
    }

    /// Open or reopen the camera by index
    ///
    /// On success the recorded error is cleared. On failure the server is
    /// left without a camera and the error is recorded.
    pub async fn open_camera(&self, index: u32) -> Result<(), CameraError> {
        let _guard = self.capture.lock().await;
        self.open_blocking(index).await
    }

    async fn open_blocking(&self, index: u32) -> Result<(), CameraError> {
        let shared = self.shared.clone();
        match tokio::task::spawn_blocking(move || shared.open_camera(index)).await {
            Ok(result) => result,
            Err(e) => Err(CameraError::Open {
                index,
                reason: e.to_string(),
            }),
        }
    }

    /// Register a new viewer
    pub fn attach(&self) -> Result<Subscription, AttachError> {
        let subscriber = {
            let mut state = self.shared.state.write();
            if state.camera_index.is_none() {
                return Err(AttachError::Unavailable);
            }
            state.broadcaster.subscribe()
        };
        info!("{} attached", subscriber.id);
        Ok(Subscription::new(subscriber, self.shared.clone()))
    }

    /// Remove a viewer. Idempotent, returns false for unknown ids.
    pub fn detach(&self, id: SubscriberId) -> bool {
        self.shared.detach(id)
    }

    pub fn health(&self) -> HealthStatus {
        let state = self.shared.state.read();
        HealthStatus {
            running: state.running,
            error: state
                .last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default(),
            subscriber_count: state.broadcaster.subscriber_count(),
        }
    }

    pub fn stats(&self) -> StreamStats {
        let phase = self.shared.phase();
        let state = self.shared.state.read();
        StreamStats {
            running: state.running,
            phase,
            camera: self.shared.camera_name.clone(),
            camera_index: state.camera_index,
            queue_capacity: state.broadcaster.queue_capacity(),
            frames_published: state.broadcaster.frames_published(),
            subscribers_evicted: state.broadcaster.evicted_total(),
            last_frame_age_ms: state
                .broadcaster
                .latest()
                .map(|f| f.age().as_millis() as u64),
            last_error: state.last_error.as_ref().map(|e| e.to_string()),
            subscribers: state.broadcaster.subscribers(),
        }
    }

    /// Most recently published frame
    pub fn latest_frame(&self) -> Option<Frame> {
        self.shared.state.read().broadcaster.latest().cloned()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.read().running
    }

    pub fn camera_bound(&self) -> bool {
        self.shared.state.read().camera_index.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.read().broadcaster.subscriber_count()
    }

    pub fn capture_phase(&self) -> CapturePhase {
        self.shared.phase()
    }

    pub fn phase_watch(&self) -> watch::Receiver<CapturePhase> {
        self.shared.phase_watch()
    }

    #[cfg(test)]
    pub(crate) fn active_capture_loops(&self) -> usize {
        self.shared.active_loops.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::testing::{CameraScript, ReadStep};

    fn server_with(script: &CameraScript, options: StreamOptions) -> StreamServer {
        StreamServer::new(script.camera(), Arc::new(JpegEncoder::default()), options)
    }

    fn fast_options() -> StreamOptions {
        StreamOptions {
            capture_interval: Duration::from_millis(5),
            read_backoff: Duration::from_millis(10),
            queue_capacity: 32,
            clear_error_on_frame: false,
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let script = CameraScript::new();
        let server = server_with(&script, fast_options());

        server.stop().await;
        assert_eq!(script.closes(), 0);

        server.start(0).await.unwrap();
        server.start(0).await.unwrap();
        assert!(server.is_running());
        assert_eq!(server.active_capture_loops(), 1);
        assert_eq!(script.opens(), 1);

        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());
        assert!(!server.camera_bound());
        assert_eq!(server.active_capture_loops(), 0);
        assert_eq!(server.capture_phase(), CapturePhase::Stopped);
        assert_eq!(script.closes(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_starts_spawn_one_loop() {
        let script = CameraScript::new();
        let server = server_with(&script, fast_options());

        let (a, b, c) = tokio::join!(server.start(0), server.start(0), server.start(0));
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(server.active_capture_loops(), 1);

        server.stop().await;
        assert_eq!(server.active_capture_loops(), 0);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let script = CameraScript::new();
        let server = server_with(&script, fast_options());

        server.start(0).await.unwrap();
        server.stop().await;
        server.start(0).await.unwrap();
        assert!(server.camera_bound());
        assert_eq!(server.active_capture_loops(), 1);
        assert_eq!(script.opens(), 2);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_start_without_camera_runs_degraded() {
        let script = CameraScript::missing();
        let server = server_with(&script, fast_options());

        let err = server.start(0).await.unwrap_err();
        assert!(matches!(err, CameraError::Open { index: 0, .. }));

        let health = server.health();
        assert!(health.running);
        assert!(!health.error.is_empty());
        assert_eq!(health.subscriber_count, 0);
        assert!(!health.is_healthy());

        assert_eq!(server.attach().err(), Some(AttachError::Unavailable));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_open_camera_later_clears_error() {
        let script = CameraScript::missing();
        let server = server_with(&script, fast_options());
        assert!(server.start(0).await.is_err());

        script.set_missing(false);
        server.open_camera(0).await.unwrap();
        assert!(server.health().is_healthy());

        let mut sub = server.attach().unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), sub.next_frame())
            .await
            .unwrap();
        assert!(frame.is_some());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_viewers_receive_frames_in_order() {
        let script = CameraScript::new();
        let server = server_with(&script, fast_options());
        server.start(0).await.unwrap();

        let mut a = server.attach().unwrap();
        let mut b = server.attach().unwrap();
        assert_eq!(server.subscriber_count(), 2);

        for sub in [&mut a, &mut b] {
            let mut last = 0;
            for _ in 0..10 {
                let frame = tokio::time::timeout(Duration::from_secs(5), sub.next_frame())
                    .await
                    .unwrap()
                    .expect("queue closed early");
                assert!(frame.sequence > last);
                last = frame.sequence;
            }
        }

        server.stop().await;
        assert!(a.next_frame().await.is_none());
        assert!(b.next_frame().await.is_none());
        assert_eq!(server.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_attach_is_primed_with_latest_frame() {
        let script = CameraScript::new();
        let server = server_with(&script, fast_options());
        server.start(0).await.unwrap();
        wait_until(|| server.latest_frame().is_some()).await;

        let mut sub = server.attach().unwrap();
        let first = sub.try_next_frame().expect("primed frame");
        assert!(first.sequence >= 1);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_detach_and_drop() {
        let script = CameraScript::new();
        let server = server_with(&script, fast_options());
        server.open_camera(0).await.unwrap();

        let sub = server.attach().unwrap();
        let id = sub.id();
        assert!(server.detach(id));
        assert!(!server.detach(id));
        assert!(sub.is_closed());
        drop(sub);

        let other = server.attach().unwrap();
        assert_eq!(server.subscriber_count(), 1);
        drop(other);
        assert_eq!(server.subscriber_count(), 0);

        let explicit = server.attach().unwrap();
        let explicit_id = explicit.id();
        explicit.detach();
        assert_eq!(server.subscriber_count(), 0);
        assert!(!server.detach(explicit_id));
    }

    #[tokio::test]
    async fn test_stalled_viewer_is_closed() {
        let script = CameraScript::new();
        let server = server_with(
            &script,
            StreamOptions {
                queue_capacity: 2,
                ..fast_options()
            },
        );
        server.start(0).await.unwrap();

        let mut stalled = server.attach().unwrap();
        wait_until(|| stalled.is_closed()).await;
        assert!(stalled.next_frame().await.is_none());
        assert_eq!(server.subscriber_count(), 0);
        assert!(server.stats().subscribers_evicted >= 1);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_read_failure_then_recovery() {
        let script = CameraScript::new();
        script.push([ReadStep::Fail, ReadStep::Fail]);
        let server = server_with(&script, fast_options());
        server.start(0).await.unwrap();

        wait_until(|| server.latest_frame().is_some()).await;
        let health = server.health();
        assert!(health.running);
        assert!(health.error.contains("failed to read frame"));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_read_failure_clears_with_option() {
        let script = CameraScript::new();
        script.push([ReadStep::Fail]);
        let server = server_with(
            &script,
            StreamOptions {
                clear_error_on_frame: true,
                ..fast_options()
            },
        );
        server.start(0).await.unwrap();

        wait_until(|| script.reads() >= 2 && server.latest_frame().is_some()).await;
        assert!(server.health().is_healthy());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_capture_panic_stops_loop() {
        let script = CameraScript::new();
        script.push([ReadStep::Panic]);
        let server = server_with(&script, fast_options());
        server.start(0).await.unwrap();

        wait_until(|| !server.is_running()).await;
        let mut phase = server.phase_watch();
        tokio::time::timeout(
            Duration::from_secs(5),
            phase.wait_for(|p| *p == CapturePhase::Stopped),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(server.health().error.contains("panicked"));

        // Stop still releases the camera
        server.stop().await;
        assert_eq!(script.closes(), 1);

        server.start(0).await.unwrap();
        assert_eq!(server.active_capture_loops(), 1);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_restart_after_panic_clears_error() {
        let script = CameraScript::new();
        script.push([ReadStep::Panic]);
        let server = server_with(&script, fast_options());
        server.start(0).await.unwrap();

        wait_until(|| !server.is_running()).await;
        assert!(server.health().error.contains("panicked"));
        assert!(server.camera_bound());

        // Camera stays bound, so start does not reopen it
        server.start(0).await.unwrap();
        assert_eq!(script.opens(), 1);
        let health = server.health();
        assert!(health.running);
        assert!(health.error.is_empty());
        assert!(health.is_healthy());

        let published = server.stats().frames_published;
        wait_until(|| server.stats().frames_published > published).await;
        assert!(server.health().error.is_empty());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stats() {
        let script = CameraScript::new();
        let server = server_with(&script, fast_options());
        server.start(0).await.unwrap();
        let _sub = server.attach().unwrap();

        let stats = server.stats();
        assert!(stats.running);
        assert_eq!(stats.camera, "scripted");
        assert_eq!(stats.camera_index, Some(0));
        assert_eq!(stats.subscribers.len(), 1);
        assert!(stats.last_error.is_none());
        server.stop().await;
    }
}

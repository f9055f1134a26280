//! MJPEG streaming
//!
//! - [`StreamServer`]: lifecycle controller owning camera and capture loop
//! - [`FrameBroadcaster`]: latest-frame cache and fan-out
//! - [`ClientRegistry`]: bounded per-viewer queues with eviction
//! - [`StreamSession`]: writes one viewer's frames as multipart parts

pub mod broadcaster;
pub mod capture;
pub mod registry;
pub mod server;
pub mod session;
pub mod subscription;

pub use broadcaster::FrameBroadcaster;
pub use capture::CapturePhase;
pub use registry::{BroadcastReport, ClientRegistry, SubscriberId, SubscriberInfo};
pub use server::{AttachError, CaptureError, HealthStatus, StreamOptions, StreamServer, StreamStats};
pub use session::{SessionEnd, SessionReport, StreamSession, STREAM_CONTENT_TYPE};
pub use subscription::Subscription;

//! MJPEG viewer session
//!
//! Writes a viewer's frames as `multipart/x-mixed-replace` parts until the
//! viewer goes away, its queue closes or a write fails. Each part is
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```
//!
//! and is flushed before the next frame is awaited.

use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::SubscriberId;
use super::subscription::Subscription;

/// Response content type for the MJPEG stream (boundary `frame`)
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The viewer's connection went away
    Disconnected,
    /// The queue was closed by eviction, detach or server stop
    QueueClosed,
    /// Writing to the viewer failed
    WriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub id: SubscriberId,
    pub end: SessionEnd,
    pub frames_written: u64,
}

/// One viewer connection
pub struct StreamSession {
    subscription: Subscription,
}

impl StreamSession {
    pub fn new(subscription: Subscription) -> Self {
        Self { subscription }
    }

    pub fn id(&self) -> SubscriberId {
        self.subscription.id()
    }

    /// Pump frames into `writer` until `disconnect` fires, the queue closes
    /// or a write fails. The viewer is detached when this returns.
    pub async fn run<W>(mut self, mut writer: W, disconnect: CancellationToken) -> SessionReport
    where
        W: AsyncWrite + Unpin,
    {
        let id = self.subscription.id();
        let mut frames_written = 0u64;
        debug!("{} streaming", id);

        let end = loop {
            let frame = tokio::select! {
                biased;
                _ = disconnect.cancelled() => break SessionEnd::Disconnected,
                frame = self.subscription.next_frame() => frame,
            };

            let Some(frame) = frame else {
                break SessionEnd::QueueClosed;
            };

            if let Err(e) = write_part(&mut writer, frame.data()).await {
                debug!("{} write failed: {}", id, e);
                break SessionEnd::WriteFailed;
            }
            frames_written += 1;
        };

        if end != SessionEnd::WriteFailed {
            // Lets the HTTP body finish cleanly
            let _ = writer.shutdown().await;
        }
        self.subscription.detach();

        info!(
            "{} session ended ({:?}, {} frames)",
            id, end, frames_written
        );
        SessionReport {
            id,
            end,
            frames_written,
        }
    }
}

async fn write_part<W>(writer: &mut W, jpeg: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(PART_HEADER).await?;
    writer.write_all(jpeg).await?;
    writer.write_all(PART_TRAILER).await?;
    writer.flush().await
}

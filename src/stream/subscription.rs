//! Viewer side of a frame queue

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::registry::{NewSubscriber, SubscriberId};
use super::server::Shared;
use crate::video::Frame;

/// An attached viewer's frame queue
///
/// Dropping the subscription detaches the viewer.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Frame>,
    closed: CancellationToken,
    shared: Arc<Shared>,
}

impl Subscription {
    pub(crate) fn new(subscriber: NewSubscriber, shared: Arc<Shared>) -> Self {
        Self {
            id: subscriber.id,
            rx: subscriber.rx,
            closed: subscriber.closed,
            shared,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next frame. `None` means the queue was closed (the
    /// viewer was evicted, detached or the server stopped); frames still
    /// buffered at that point are discarded.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if self.closed.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            frame = self.rx.recv() => frame,
        }
    }

    /// Non-blocking variant of [`next_frame`](Self::next_frame)
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        if self.closed.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Detach now. Dropping does the same.
    pub fn detach(self) {
        self.shared.detach(self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.detach(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

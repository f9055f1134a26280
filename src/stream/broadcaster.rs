//! Latest-frame cache and fan-out

use bytes::Bytes;

use super::registry::{BroadcastReport, ClientRegistry, NewSubscriber, SubscriberId, SubscriberInfo};
use crate::video::Frame;

/// Holds the most recent encoded frame and the viewers it is fanned out to.
///
/// Not synchronized on its own; the stream server keeps it behind its state
/// lock so publish, subscribe and unsubscribe are serialized.
pub struct FrameBroadcaster {
    latest: Option<Frame>,
    registry: ClientRegistry,
    next_sequence: u64,
}

impl FrameBroadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            latest: None,
            registry: ClientRegistry::new(queue_capacity),
            next_sequence: 1,
        }
    }

    /// Cache `data` as the latest frame and offer it to every viewer
    pub fn publish(&mut self, data: Bytes) -> (Frame, BroadcastReport) {
        let frame = Frame::new(data, self.next_sequence);
        self.next_sequence += 1;
        self.latest = Some(frame.clone());
        let report = self.registry.broadcast(&frame);
        (frame, report)
    }

    /// New viewer, primed with the latest frame if there is one
    pub fn subscribe(&mut self) -> NewSubscriber {
        self.registry.register(self.latest.as_ref())
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.registry.unregister(id)
    }

    /// Close every viewer and forget the cached frame
    pub fn close_all(&mut self) -> usize {
        self.latest = None;
        self.registry.close_all()
    }

    pub fn latest(&self) -> Option<&Frame> {
        self.latest.as_ref()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.registry.subscribers()
    }

    /// Frames published so far
    pub fn frames_published(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn evicted_total(&self) -> u64 {
        self.registry.evicted_total()
    }

    pub fn queue_capacity(&self) -> usize {
        self.registry.capacity()
    }
}

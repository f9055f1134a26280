//! Subscriber registry
//!
//! Every viewer owns a bounded frame queue. The registry keeps the sending
//! half and a close token per viewer. A viewer leaves the registry exactly
//! once, either by unsubscribing, by being evicted for falling behind, or on
//! shutdown, and leaving always closes its queue.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::video::Frame;

/// Default per-viewer queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// Subscriber identifier, unique for the lifetime of a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

struct SubscriberSlot {
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
    connected_at: Instant,
    frames_sent: u64,
}

impl Drop for SubscriberSlot {
    fn drop(&mut self) {
        // Dropping `tx` ends the channel, the token wakes a waiting reader
        // even while frames are still buffered
        self.closed.cancel();
    }
}

/// Receiving side handed to a new viewer
pub struct NewSubscriber {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<Frame>,
    pub closed: CancellationToken,
}

/// Result of fanning one frame out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Per-viewer statistics
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub connected_secs: u64,
    pub frames_sent: u64,
}

pub struct ClientRegistry {
    subscribers: HashMap<SubscriberId, SubscriberSlot>,
    next_id: u64,
    capacity: usize,
    evicted_total: u64,
}

impl ClientRegistry {
    /// `capacity` is the per-viewer queue length (at least 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: HashMap::new(),
            next_id: 1,
            capacity: capacity.max(1),
            evicted_total: 0,
        }
    }

    /// Add a viewer. When `prime` is given it is queued immediately so the
    /// viewer has something to show before the next capture tick.
    pub fn register(&mut self, prime: Option<&Frame>) -> NewSubscriber {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::channel(self.capacity);
        let closed = CancellationToken::new();
        let mut slot = SubscriberSlot {
            tx,
            closed: closed.clone(),
            connected_at: Instant::now(),
            frames_sent: 0,
        };

        if let Some(frame) = prime {
            // Fresh queue, cannot be full
            if slot.tx.try_send(frame.clone()).is_ok() {
                slot.frames_sent = 1;
            }
        }

        self.subscribers.insert(id, slot);
        debug!("{} registered ({} total)", id, self.subscribers.len());

        NewSubscriber { id, rx, closed }
    }

    /// Remove a viewer and close its queue. Returns false if it was already gone.
    pub fn unregister(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Offer `frame` to every viewer without blocking. Viewers whose queue is
    /// full (or whose receiver is gone) are evicted.
    pub fn broadcast(&mut self, frame: &Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        self.subscribers
            .retain(|id, slot| match slot.tx.try_send(frame.clone()) {
                Ok(()) => {
                    slot.frames_sent += 1;
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!("{} is not keeping up, dropping it", id);
                    report.evicted += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("{} receiver gone, removing", id);
                    report.evicted += 1;
                    false
                }
            });

        self.evicted_total += report.evicted as u64;
        report
    }

    /// Close and remove every viewer, returning how many there were
    pub fn close_all(&mut self) -> usize {
        let count = self.subscribers.len();
        self.subscribers.clear();
        count
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Viewers evicted for being slow or gone, over the registry lifetime
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        let mut list: Vec<_> = self
            .subscribers
            .iter()
            .map(|(id, slot)| SubscriberInfo {
                id: *id,
                connected_secs: slot.connected_at.elapsed().as_secs(),
                frames_sent: slot.frames_sent,
            })
            .collect();
        list.sort_by_key(|info| info.id);
        list
    }
}

//! Handing received packets to the application.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lineproto_frame::Address;

/// Application callback: `(source, destination, payload)`.
pub type Callback = Arc<dyn Fn(Address, Address, &[u8]) + Send + Sync>;

/// A packet addressed to this node (or a subscribed broadcast address).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Sender address.
    pub src: Address,
    /// Destination address: this node or a broadcast address.
    pub dst: Address,
    /// Application bytes. Never empty.
    pub payload: Bytes,
    /// Whether `dst` is a broadcast address.
    pub is_broadcast: bool,
}

/// Callbacks registered on a callback-mode router.
#[derive(Default)]
pub(crate) struct CallbackSet {
    unicast: Vec<Callback>,
    broadcast: HashMap<Address, Vec<Callback>>,
}

impl CallbackSet {
    pub(crate) fn add_unicast(&mut self, callback: Callback) {
        self.unicast.push(callback);
    }

    pub(crate) fn add_broadcast(&mut self, addr: Address, callback: Callback) {
        self.broadcast.entry(addr).or_default().push(callback);
    }

    /// Callbacks interested in `delivery`, cloned so they can run unlocked.
    pub(crate) fn targets(&self, delivery: &Delivery) -> Vec<Callback> {
        if delivery.is_broadcast {
            self.broadcast
                .get(&delivery.dst)
                .cloned()
                .unwrap_or_default()
        } else {
            self.unicast.clone()
        }
    }

    pub(crate) fn unicast_len(&self) -> usize {
        self.unicast.len()
    }

    pub(crate) fn broadcast_len(&self) -> usize {
        self.broadcast.values().map(Vec::len).sum()
    }
}

/// Producer side of the delivery queue, held by the forwarding engine.
pub(crate) struct QueueSender {
    tx: SyncSender<Delivery>,
    pending: Arc<AtomicUsize>,
}

impl QueueSender {
    /// Push without blocking. Returns the delivery back if it could not be queued.
    pub(crate) fn offer(&self, delivery: Delivery) -> Result<(), Delivery> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(delivery) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(d)) | Err(TrySendError::Disconnected(d)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Err(d)
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Consumer side of a queue-mode router's deliveries.
///
/// There is exactly one per router; see [`Router::queue`](crate::Router::queue).
pub struct DeliveryQueue {
    rx: Receiver<Delivery>,
    pending: Arc<AtomicUsize>,
}

impl DeliveryQueue {
    /// Take the next delivery if one is waiting.
    pub fn try_recv(&self) -> Option<Delivery> {
        let delivery = self.rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(delivery)
    }

    /// Wait up to `timeout` for the next delivery.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Delivery> {
        match self.rx.recv_timeout(timeout) {
            Ok(delivery) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Some(delivery)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Block until the next delivery. `None` once the router is gone.
    pub fn recv(&self) -> Option<Delivery> {
        let delivery = self.rx.recv().ok()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(delivery)
    }

    /// Deliveries waiting to be taken.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether no deliveries are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("len", &self.len())
            .finish()
    }
}

/// Create a bounded delivery queue.
pub(crate) fn queue(capacity: usize) -> (QueueSender, DeliveryQueue) {
    let (tx, rx) = std::sync::mpsc::sync_channel(capacity);
    let pending = Arc::new(AtomicUsize::new(0));
    (
        QueueSender {
            tx,
            pending: Arc::clone(&pending),
        },
        DeliveryQueue { rx, pending },
    )
}

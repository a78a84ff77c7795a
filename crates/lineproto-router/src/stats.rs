//! Counters and read-only snapshots.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use lineproto_frame::Address;
use serde::Serialize;

/// Monotonic event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Packets originated by [`Router::send`](crate::Router::send).
    #[serde(rename = "sent_packets")]
    pub sent: u64,
    /// Received packets handed to `send_out` for relaying.
    ///
    /// Counted before the hop limit is checked, so a relay that is then
    /// dropped shows up here and in `dropped`.
    #[serde(rename = "forwarded_packets")]
    pub forwarded: u64,
    /// Packets addressed to this node or a subscribed broadcast address.
    #[serde(rename = "processed_packets")]
    pub processed: u64,
    /// Duplicates, hop-limit drops, undeliverable and unparsable packets.
    #[serde(rename = "dropped_packets")]
    pub dropped: u64,
    /// Received broadcast packets.
    #[serde(rename = "broadcast_packets")]
    pub broadcast: u64,
    /// Bytes skipped by the scanner or flushed from rotten buffers.
    pub garbage_bytes: u64,
    /// Keepalive probes received for this node.
    pub recv_nullpackets: u64,
    /// Rotten buffers flushed.
    pub buffer_rots: u64,
    /// Ticks where a link's buffer drain hit its budget.
    pub buffer_process_timeouts: u64,
    /// Ticks where callback dispatch hit its budget.
    pub callback_process_timeouts: u64,
    /// Deliveries dropped because the queue was full.
    pub queue_overflows: u64,
    /// Keepalive probes sent.
    pub keepalives_sent_total: u64,
}

/// One link's receive-buffer state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub name: String,
    /// Bytes waiting in the receive buffer.
    pub buffered: usize,
    /// Time since bytes last arrived.
    pub since_new_bytes: Option<Duration>,
    /// Time since a frame was last parsed.
    pub since_pop: Option<Duration>,
}

/// Probe history for one destination, aged relative to the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeepaliveSnapshot {
    pub counter: u64,
    pub age: Duration,
}

/// Snapshot returned by [`Router::get_stats`](crate::Router::get_stats).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    #[serde(flatten)]
    pub counters: Counters,
    pub links: Vec<LinkStats>,
    /// Route table entries.
    pub lut_len: usize,
    /// Unicast callbacks registered.
    pub callbacks_len: usize,
    /// Broadcast callbacks registered, across all addresses.
    pub bcast_callbacks_len: usize,
    /// Deliveries not yet handed to the application.
    pub queue_len: usize,
    /// Time since the last keepalive probe. `None` before the first one.
    pub last_keepalive_age: Option<Duration>,
    pub max_hop: u8,
    /// Per-destination probe history, keyed by address (`0x02`).
    pub keepalives_sent: BTreeMap<String, KeepaliveSnapshot>,
}

/// One route table entry as returned by [`Router::get_lut`](crate::Router::get_lut).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub address: Address,
    /// Name of the link the route leaves on.
    pub link: String,
    pub hops: u8,
    pub last_seen: Instant,
}

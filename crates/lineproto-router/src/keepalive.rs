//! Keepalive probe scheduling.
//!
//! At most one zero-payload probe per interval, always to the known
//! destination that has gone longest without one. Replies (or any other
//! traffic the probe provokes) refresh the route table on the way back.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lineproto_frame::Address;

use crate::route::RouteTable;

/// Probe history for one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveStat {
    /// When the last probe was sent.
    pub last_sent: Instant,
    /// Probes sent so far.
    pub counter: u64,
}

/// Chooses when and where to send keepalive probes.
#[derive(Debug)]
pub struct KeepaliveScheduler {
    interval: Duration,
    last_probe: Option<Instant>,
    sent: HashMap<Address, KeepaliveStat>,
}

impl KeepaliveScheduler {
    /// Scheduler that probes at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_probe: None,
            sent: HashMap::new(),
        }
    }

    /// Destination due for a probe now, if any.
    ///
    /// Destinations never probed come first; among the rest the stalest
    /// wins, ties going to the route learned first.
    pub fn next_target(&self, routes: &RouteTable, now: Instant) -> Option<Address> {
        if routes.is_empty() {
            return None;
        }
        if let Some(last) = self.last_probe {
            if now.saturating_duration_since(last) <= self.interval {
                return None;
            }
        }

        let mut best: Option<(Address, Option<Instant>)> = None;
        for entry in routes.iter() {
            let last_sent = self.sent.get(&entry.address).map(|s| s.last_sent);
            let older = match best {
                None => true,
                Some((_, best_sent)) => match (last_sent, best_sent) {
                    (None, Some(_)) => true,
                    (Some(candidate), Some(current)) => candidate < current,
                    _ => false,
                },
            };
            if older {
                best = Some((entry.address, last_sent));
            }
        }
        best.map(|(addr, _)| addr)
    }

    /// Record that a probe to `dst` went out at `now`.
    pub fn record(&mut self, dst: Address, now: Instant) {
        self.last_probe = Some(now);
        self.sent
            .entry(dst)
            .and_modify(|stat| {
                stat.counter += 1;
                stat.last_sent = now;
            })
            .or_insert(KeepaliveStat {
                last_sent: now,
                counter: 1,
            });
    }

    /// When the last probe was sent.
    pub fn last_probe(&self) -> Option<Instant> {
        self.last_probe
    }

    /// Per-destination probe history.
    pub fn stats(&self) -> &HashMap<Address, KeepaliveStat> {
        &self.sent
    }
}

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use lineproto_frame::{
    encode_frame, parse_packet, Address, FrameError, LinkBuffer, Packet, PoppedFrame, MAX_PAYLOAD,
};
use lineproto_transport::{Link, PollHandle, Readiness, TransportError};
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::config::RouterConfig;
use crate::delivery::{Delivery, QueueSender};
use crate::error::{Result, RouterError};
use crate::keepalive::KeepaliveScheduler;
use crate::route::{LinkId, RouteTable, RouteUpdate};
use crate::stats::{Counters, KeepaliveSnapshot, LinkStats, RouteSnapshot, RouterStats};

struct LinkSlot {
    link: Box<dyn Link>,
    buffer: LinkBuffer,
}

impl LinkSlot {
    fn error(&self, source: TransportError) -> RouterError {
        RouterError::Link {
            link: self.link.name().to_string(),
            source,
        }
    }
}

/// Where locally addressed packets wait for the application.
pub(crate) enum Outbox {
    /// Held here until the router dispatches them to callbacks.
    Pending {
        deliveries: VecDeque<Delivery>,
        capacity: usize,
    },
    /// Pushed straight to the consumer's queue.
    Queue(QueueSender),
}

impl Outbox {
    pub(crate) fn pending(capacity: usize) -> Self {
        Outbox::Pending {
            deliveries: VecDeque::new(),
            capacity,
        }
    }

    fn len(&self) -> usize {
        match self {
            Outbox::Pending { deliveries, .. } => deliveries.len(),
            Outbox::Queue(tx) => tx.len(),
        }
    }
}

/// Links, route table, keepalive state and counters behind a
/// [`Router`](crate::Router)'s lock. Never runs application code.
pub(crate) struct Engine {
    own: Address,
    max_hop: u8,
    links: Vec<LinkSlot>,
    routes: RouteTable,
    keepalive: KeepaliveScheduler,
    counters: Counters,
    subscriptions: HashSet<Address>,
    outbox: Outbox,
    link_budget: Duration,
    read_buf: Vec<u8>,
    frame_buf: BytesMut,
}

impl Engine {
    pub(crate) fn new(config: &RouterConfig, links: Vec<Box<dyn Link>>, outbox: Outbox) -> Self {
        let timing = &config.timing;
        let links = links
            .into_iter()
            .map(|link| LinkSlot {
                link,
                buffer: LinkBuffer::with_rot_thresholds(timing.rot_idle_bytes, timing.rot_idle_pop),
            })
            .collect();

        Self {
            own: config.address,
            max_hop: config.max_hop,
            links,
            routes: RouteTable::new(config.address, config.route_ttl()),
            keepalive: KeepaliveScheduler::new(timing.keepalive_interval),
            counters: Counters::default(),
            subscriptions: HashSet::new(),
            outbox,
            link_budget: timing.link_budget,
            read_buf: vec![0u8; config.read_chunk],
            frame_buf: BytesMut::new(),
        }
    }

    /// Deliver packets for the broadcast address `addr` locally.
    pub(crate) fn subscribe(&mut self, addr: Address) {
        self.subscriptions.insert(addr);
    }

    pub(crate) fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }

    /// Originate a packet from this node.
    pub(crate) fn send(&mut self, dst: Address, payload: &[u8], now: Instant) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            }
            .into());
        }
        let packet = Packet::new(dst, self.own, 0, Bytes::copy_from_slice(payload));
        self.send_out(&packet, None, false, now)?;
        self.counters.sent += 1;
        Ok(())
    }

    /// Pop and handle frames from every link's buffer.
    ///
    /// Each link gets `link_budget` of wall-clock time; frames left over wait
    /// for the next tick.
    pub(crate) fn drain_links(&mut self, clock: &dyn Clock) -> Result<()> {
        for index in 0..self.links.len() {
            let started = clock.now();
            loop {
                let now = clock.now();
                if now.saturating_duration_since(started) > self.link_budget {
                    self.counters.buffer_process_timeouts += 1;
                    warn!(
                        link = self.links[index].link.name(),
                        buffered = self.links[index].buffer.len(),
                        "buffer processing budget exhausted"
                    );
                    break;
                }
                let Some(popped) = self.links[index].buffer.pop_frame(now) else {
                    break;
                };
                self.handle_frame(popped, LinkId(index), now)?;
            }
        }
        Ok(())
    }

    pub(crate) fn handle_frame(
        &mut self,
        popped: PoppedFrame,
        ingress: LinkId,
        now: Instant,
    ) -> Result<()> {
        self.counters.garbage_bytes += popped.garbage as u64;
        match parse_packet(popped.packet) {
            Ok(packet) => self.handle_packet(packet, ingress, now),
            Err(err) => {
                self.counters.dropped += 1;
                debug!(
                    link = self.links[ingress.index()].link.name(),
                    error = %err,
                    "dropping unparsable packet"
                );
                Ok(())
            }
        }
    }

    pub(crate) fn handle_packet(
        &mut self,
        packet: Packet,
        ingress: LinkId,
        now: Instant,
    ) -> Result<()> {
        let is_broadcast = packet.dst.is_broadcast();

        if !is_broadcast {
            if let Some(best) = self.routes.best_hops(packet.src) {
                if best < packet.hop {
                    self.counters.dropped += 1;
                    trace!(
                        src = %packet.src,
                        hop = packet.hop,
                        best,
                        "dropping duplicate over longer path"
                    );
                    return Ok(());
                }
            }
        }

        if self.routes.update(packet.src, ingress, packet.hop, now) == RouteUpdate::Inserted {
            debug!(
                src = %packet.src,
                link = self.links[ingress.index()].link.name(),
                hops = packet.hop,
                "learned route"
            );
        }

        if packet.dst == self.own || (is_broadcast && self.subscriptions.contains(&packet.dst)) {
            if packet.is_keepalive() {
                self.counters.recv_nullpackets += 1;
            } else {
                self.deliver(Delivery {
                    src: packet.src,
                    dst: packet.dst,
                    payload: packet.payload.clone(),
                    is_broadcast,
                });
            }
            self.counters.processed += 1;
        }

        if packet.dst != self.own {
            self.send_out(&packet.forwarded(), Some(ingress), is_broadcast, now)?;
            self.counters.forwarded += 1;
        }

        if is_broadcast {
            self.counters.broadcast += 1;
        }
        Ok(())
    }

    fn deliver(&mut self, delivery: Delivery) {
        let rejected = match &mut self.outbox {
            Outbox::Pending {
                deliveries,
                capacity,
            } => {
                if deliveries.len() < *capacity {
                    deliveries.push_back(delivery);
                    None
                } else {
                    Some(delivery)
                }
            }
            Outbox::Queue(tx) => tx.offer(delivery).err(),
        };

        if let Some(delivery) = rejected {
            self.counters.queue_overflows += 1;
            warn!(src = %delivery.src, dst = %delivery.dst, "delivery queue full, dropping packet");
        }
    }

    /// Write `packet` to its route, or flood it.
    ///
    /// Returns whether any link received it.
    pub(crate) fn send_out(
        &mut self,
        packet: &Packet,
        exclude: Option<LinkId>,
        skip_lut: bool,
        now: Instant,
    ) -> Result<bool> {
        if packet.hop >= self.max_hop {
            self.counters.dropped += 1;
            trace!(dst = %packet.dst, hop = packet.hop, "hop limit reached");
            return Ok(false);
        }

        let routed = if skip_lut {
            None
        } else {
            self.routes
                .find(packet.dst, now)
                .map(|entry| entry.link)
                .filter(|link| Some(*link) != exclude)
        };
        let targets: Vec<LinkId> = match routed {
            Some(link) => vec![link],
            None => (0..self.links.len())
                .map(LinkId)
                .filter(|link| Some(*link) != exclude)
                .collect(),
        };

        if targets.is_empty() {
            self.counters.dropped += 1;
            debug!(dst = %packet.dst, "no link to send packet on");
            return Ok(false);
        }

        self.frame_buf.clear();
        encode_frame(packet, &mut self.frame_buf)?;
        for link in targets {
            let slot = &mut self.links[link.index()];
            slot.link
                .write_frame(&self.frame_buf)
                .map_err(|source| slot.error(source))?;
            trace!(
                link = slot.link.name(),
                dst = %packet.dst,
                hop = packet.hop,
                routed = routed.is_some(),
                "frame written"
            );
        }
        Ok(true)
    }

    /// Drop expired and shadowed routes.
    pub(crate) fn clean(&mut self, now: Instant) {
        let removed = self.routes.clean(now);
        if removed > 0 {
            debug!(removed, remaining = self.routes.len(), "expired routes removed");
        }
    }

    /// Send one keepalive probe if one is due.
    pub(crate) fn keepalive_tick(&mut self, now: Instant) -> Result<()> {
        let Some(dst) = self.keepalive.next_target(&self.routes, now) else {
            return Ok(());
        };
        let probe = Packet::new(dst, self.own, 0, Bytes::new());
        self.send_out(&probe, None, false, now)?;
        self.keepalive.record(dst, now);
        self.counters.keepalives_sent_total += 1;
        debug!(dst = %dst, "keepalive sent");
        Ok(())
    }

    /// Flush buffers that stopped making progress.
    pub(crate) fn rot_sweep(&mut self, now: Instant) {
        for slot in &mut self.links {
            if slot.buffer.is_rotten(now) {
                let flushed = slot.buffer.flush();
                self.counters.garbage_bytes += flushed as u64;
                self.counters.buffer_rots += 1;
                warn!(link = slot.link.name(), bytes = flushed, "flushed rotten receive buffer");
            }
        }
    }

    pub(crate) fn poll_handles(&self) -> Vec<PollHandle> {
        self.links.iter().map(|slot| slot.link.poll_handle()).collect()
    }

    /// Read from every link flagged ready into its buffer.
    ///
    /// A hung-up link is drained until a read comes back empty, then
    /// reported as closed.
    pub(crate) fn read_ready(&mut self, ready: &[Readiness], now: Instant) -> Result<()> {
        for (slot, readiness) in self
            .links
            .iter_mut()
            .zip(ready)
            .filter(|(_, readiness)| readiness.is_ready())
        {
            let n = slot
                .link
                .read(&mut self.read_buf)
                .map_err(|source| slot.error(source))?;
            if n == 0 && *readiness == Readiness::HungUp {
                return Err(slot.error(TransportError::Closed));
            }
            if n > 0 {
                slot.buffer.append(&self.read_buf[..n], now);
                trace!(link = slot.link.name(), bytes = n, "read");
            }
        }
        Ok(())
    }

    /// Take every delivery waiting for callback dispatch.
    pub(crate) fn take_pending(&mut self) -> VecDeque<Delivery> {
        match &mut self.outbox {
            Outbox::Pending { deliveries, .. } => std::mem::take(deliveries),
            Outbox::Queue(_) => VecDeque::new(),
        }
    }

    /// Put undispatched deliveries back in front of anything queued since.
    pub(crate) fn restore_pending(&mut self, mut leftover: VecDeque<Delivery>) {
        if let Outbox::Pending { deliveries, .. } = &mut self.outbox {
            leftover.append(deliveries);
            *deliveries = leftover;
        }
    }

    pub(crate) fn lut(&self) -> Vec<RouteSnapshot> {
        self.routes
            .iter()
            .map(|entry| RouteSnapshot {
                address: entry.address,
                link: self.links[entry.link.index()].link.name().to_string(),
                hops: entry.hops,
                last_seen: entry.last_seen,
            })
            .collect()
    }

    pub(crate) fn stats(
        &self,
        now: Instant,
        callbacks_len: usize,
        bcast_callbacks_len: usize,
    ) -> RouterStats {
        let age = |at: Option<Instant>| at.map(|at| now.saturating_duration_since(at));

        let links = self
            .links
            .iter()
            .map(|slot| LinkStats {
                name: slot.link.name().to_string(),
                buffered: slot.buffer.len(),
                since_new_bytes: age(slot.buffer.last_new_bytes()),
                since_pop: age(slot.buffer.last_successful_pop()),
            })
            .collect();

        let keepalives_sent: BTreeMap<String, KeepaliveSnapshot> = self
            .keepalive
            .stats()
            .iter()
            .map(|(addr, stat)| {
                (
                    addr.to_string(),
                    KeepaliveSnapshot {
                        counter: stat.counter,
                        age: now.saturating_duration_since(stat.last_sent),
                    },
                )
            })
            .collect();

        RouterStats {
            counters: self.counters,
            links,
            lut_len: self.routes.len(),
            callbacks_len,
            bcast_callbacks_len,
            queue_len: self.outbox.len(),
            last_keepalive_age: age(self.keepalive.last_probe()),
            max_hop: self.max_hop,
            keepalives_sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::clock::ManualClock;
    use crate::delivery::{self, DeliveryQueue};

    #[derive(Default)]
    struct Wire {
        inbound: Vec<u8>,
        written: Vec<Vec<u8>>,
        fail_writes: bool,
        /// Each write moves this clock forward, like a slow UART.
        write_delay: Option<(ManualClock, Duration)>,
    }

    /// In-memory link; the test keeps a handle on the same `Wire`.
    struct MemoryLink {
        name: String,
        wire: Arc<Mutex<Wire>>,
    }

    impl Link for MemoryLink {
        fn name(&self) -> &str {
            &self.name
        }

        fn read(&mut self, buf: &mut [u8]) -> lineproto_transport::Result<usize> {
            let mut wire = self.wire.lock().unwrap();
            let n = wire.inbound.len().min(buf.len());
            buf[..n].copy_from_slice(&wire.inbound[..n]);
            wire.inbound.drain(..n);
            Ok(n)
        }

        fn write_frame(&mut self, frame: &[u8]) -> lineproto_transport::Result<()> {
            let mut wire = self.wire.lock().unwrap();
            if wire.fail_writes {
                return Err(TransportError::Io(std::io::ErrorKind::BrokenPipe.into()));
            }
            wire.written.push(frame.to_vec());
            if let Some((clock, delay)) = &wire.write_delay {
                clock.advance(*delay);
            }
            Ok(())
        }

        fn poll_handle(&self) -> PollHandle {
            PollHandle::Always
        }
    }

    struct Harness {
        engine: Engine,
        wires: Vec<Arc<Mutex<Wire>>>,
        now: Instant,
    }

    impl Harness {
        fn new(links: usize, max_hop: u8) -> Self {
            Self::with_outbox(links, max_hop, Outbox::pending(16))
        }

        fn with_outbox(links: usize, max_hop: u8, outbox: Outbox) -> Self {
            let config = RouterConfig::new(Address::new(0x01), max_hop);
            let wires: Vec<_> = (0..links).map(|_| Arc::new(Mutex::new(Wire::default()))).collect();
            let boxed = wires
                .iter()
                .enumerate()
                .map(|(i, wire)| {
                    Box::new(MemoryLink {
                        name: format!("link{i}"),
                        wire: Arc::clone(wire),
                    }) as Box<dyn Link>
                })
                .collect();
            Self {
                engine: Engine::new(&config, boxed, outbox),
                wires,
                now: Instant::now(),
            }
        }

        fn receive(&mut self, dst: u8, src: u8, hop: u8, payload: &'static [u8], link: usize) {
            let packet = Packet::new(dst.into(), src.into(), hop, Bytes::from_static(payload));
            self.engine
                .handle_packet(packet, LinkId(link), self.now)
                .unwrap();
        }

        /// Frames written to `link`, decoded.
        fn written(&self, link: usize) -> Vec<Packet> {
            let mut buffer = LinkBuffer::new();
            for frame in &self.wires[link].lock().unwrap().written {
                buffer.append(frame, self.now);
            }
            std::iter::from_fn(|| buffer.pop_frame(self.now))
                .map(|popped| parse_packet(popped.packet).unwrap())
                .collect()
        }

        fn counters(&self) -> Counters {
            self.engine.counters
        }
    }

    #[test]
    fn own_packet_is_delivered_and_not_forwarded() {
        let mut h = Harness::new(2, 8);
        h.receive(0x01, 0x02, 0, b"hi", 0);

        let pending = h.engine.take_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].src, Address::new(0x02));
        assert_eq!(pending[0].payload.as_ref(), b"hi");
        assert!(!pending[0].is_broadcast);

        assert_eq!(h.counters().processed, 1);
        assert_eq!(h.counters().forwarded, 0);
        assert!(h.written(0).is_empty());
        assert!(h.written(1).is_empty());

        let route = h.engine.routes.find(Address::new(0x02), h.now).unwrap();
        assert_eq!((route.link, route.hops), (LinkId(0), 0));
    }

    #[test]
    fn nullpacket_is_counted_not_delivered() {
        let mut h = Harness::new(1, 8);
        h.receive(0x01, 0x02, 0, b"", 0);

        assert!(h.engine.take_pending().is_empty());
        assert_eq!(h.counters().recv_nullpackets, 1);
        assert_eq!(h.counters().processed, 1);
    }

    #[test]
    fn unknown_destination_floods_except_ingress() {
        let mut h = Harness::new(3, 8);
        h.receive(0x09, 0x02, 0, b"relay", 0);

        assert!(h.written(0).is_empty());
        for link in [1, 2] {
            let out = h.written(link);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].hop, 1);
            assert_eq!(out[0].dst, Address::new(0x09));
            assert_eq!(out[0].src, Address::new(0x02));
            assert_eq!(out[0].payload.as_ref(), b"relay");
        }
        assert_eq!(h.counters().forwarded, 1);
        assert_eq!(h.counters().processed, 0);
        assert!(h.engine.take_pending().is_empty());
    }

    #[test]
    fn known_destination_is_unicast() {
        let mut h = Harness::new(3, 8);
        h.receive(0x01, 0x09, 0, b"", 2);
        h.receive(0x09, 0x02, 0, b"relay", 0);

        assert!(h.written(1).is_empty());
        assert_eq!(h.written(2).len(), 1);
    }

    #[test]
    fn route_back_through_ingress_falls_back_to_flood() {
        let mut h = Harness::new(3, 8);
        h.receive(0x01, 0x09, 0, b"", 0);
        h.receive(0x09, 0x02, 0, b"relay", 0);

        assert!(h.written(0).is_empty());
        assert_eq!(h.written(1).len(), 1);
        assert_eq!(h.written(2).len(), 1);
    }

    #[test]
    fn hop_limit_drops_relay() {
        let mut h = Harness::new(2, 4);
        h.receive(0x09, 0x02, 3, b"far", 0);

        assert!(h.written(1).is_empty());
        assert_eq!(h.counters().dropped, 1);
        assert_eq!(h.counters().forwarded, 1);

        h.receive(0x09, 0x03, 2, b"near", 0);
        let out = h.written(1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].hop, 3);
    }

    #[test]
    fn longer_path_duplicate_is_dropped() {
        let mut h = Harness::new(2, 8);
        h.receive(0x01, 0x02, 0, b"direct", 0);
        h.engine.take_pending();

        h.receive(0x01, 0x02, 2, b"direct", 1);
        assert!(h.engine.take_pending().is_empty());
        assert_eq!(h.counters().dropped, 1);
        assert_eq!(h.counters().processed, 1);
        assert_eq!(h.engine.routes.len(), 1);
    }

    #[test]
    fn subscribed_broadcast_is_delivered_and_flooded() {
        let mut h = Harness::new(3, 8);
        h.engine.subscribe(Address::new(0xC5));
        h.receive(0x01, 0xC5, 0, b"", 1);
        h.receive(0xC5, 0x02, 0, b"all", 0);

        let pending = h.engine.take_pending();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_broadcast);
        assert_eq!(pending[0].dst, Address::new(0xC5));

        assert!(h.written(0).is_empty());
        assert_eq!(h.written(1).len(), 1);
        assert_eq!(h.written(2).len(), 1);
        assert_eq!(h.counters().broadcast, 1);
        assert_eq!(h.counters().processed, 2);
        assert!(h.engine.routes.iter().all(|e| !e.address.is_broadcast()));
    }

    #[test]
    fn unsubscribed_broadcast_is_only_flooded() {
        let mut h = Harness::new(2, 8);
        h.receive(0xC6, 0x02, 0, b"all", 0);

        assert!(h.engine.take_pending().is_empty());
        assert_eq!(h.written(1).len(), 1);
        assert_eq!(h.counters().processed, 0);
        assert_eq!(h.counters().broadcast, 1);
    }

    #[test]
    fn broadcast_ignores_longer_path_check() {
        let mut h = Harness::new(2, 8);
        h.receive(0x01, 0x02, 0, b"", 0);
        h.receive(0xC6, 0x02, 3, b"all", 1);

        assert_eq!(h.counters().dropped, 0);
        assert_eq!(h.written(0).len(), 1);
    }

    #[test]
    fn send_without_links_counts_dropped() {
        let mut h = Harness::new(0, 8);
        h.engine.send(Address::new(0x02), b"x", h.now).unwrap();
        assert_eq!(h.counters().sent, 1);
        assert_eq!(h.counters().dropped, 1);
    }

    #[test]
    fn send_rejects_oversized_payload() {
        let mut h = Harness::new(1, 8);
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let err = h.engine.send(Address::new(0x02), &payload, h.now).unwrap_err();
        assert!(matches!(
            err,
            RouterError::Frame(FrameError::PayloadTooLarge { .. })
        ));
        assert_eq!(h.counters().sent, 0);
    }

    #[test]
    fn keepalive_probes_known_destination_once_per_interval() {
        let mut h = Harness::new(1, 8);
        h.engine.keepalive_tick(h.now).unwrap();
        assert!(h.written(0).is_empty());

        h.receive(0x01, 0x02, 0, b"hi", 0);
        h.engine.keepalive_tick(h.now).unwrap();
        h.engine.keepalive_tick(h.now).unwrap();

        let out = h.written(0);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_keepalive());
        assert_eq!(out[0].dst, Address::new(0x02));
        assert_eq!(out[0].src, Address::new(0x01));
        assert_eq!(out[0].hop, 0);
        assert_eq!(h.counters().keepalives_sent_total, 1);

        let stats = h.engine.stats(h.now, 0, 0);
        assert_eq!(stats.keepalives_sent["0x02"].counter, 1);
        assert_eq!(stats.last_keepalive_age, Some(Duration::ZERO));
    }

    #[test]
    fn rotten_buffer_is_flushed() {
        let clock = ManualClock::new();
        let mut h = Harness::new(1, 8);
        h.wires[0].lock().unwrap().inbound.extend_from_slice(&[0x69, 0x01, 0x02]);

        h.engine.read_ready(&[Readiness::Readable], clock.now()).unwrap();
        h.engine.drain_links(&clock).unwrap();
        h.engine.rot_sweep(clock.now());
        assert_eq!(h.counters().buffer_rots, 0);

        clock.advance(Duration::from_secs(5));
        h.engine.rot_sweep(clock.now());
        assert_eq!(h.counters().buffer_rots, 1);
        assert_eq!(h.counters().garbage_bytes, 3);
        assert_eq!(h.engine.stats(clock.now(), 0, 0).links[0].buffered, 0);
    }

    #[test]
    fn read_and_drain_handles_garbage_and_frames() {
        let clock = ManualClock::new();
        let mut h = Harness::new(1, 8);
        let mut frame = BytesMut::new();
        let packet = Packet::new(
            Address::new(0x01),
            Address::new(0x02),
            0,
            Bytes::from_static(b"ok"),
        );
        encode_frame(&packet, &mut frame).unwrap();
        {
            let mut wire = h.wires[0].lock().unwrap();
            wire.inbound.extend_from_slice(&[0xAA, 0xBB]);
            wire.inbound.extend_from_slice(&frame);
        }

        h.engine.read_ready(&[Readiness::Idle], clock.now()).unwrap();
        h.engine.drain_links(&clock).unwrap();
        assert!(h.engine.take_pending().is_empty());

        h.engine.read_ready(&[Readiness::Readable], clock.now()).unwrap();
        h.engine.drain_links(&clock).unwrap();
        assert_eq!(h.engine.take_pending().len(), 1);
        assert_eq!(h.counters().garbage_bytes, 2);
    }

    #[test]
    fn slow_link_defers_leftover_frames_to_next_drain() {
        let clock = ManualClock::new();
        let mut h = Harness::new(2, 8);
        h.wires[1].lock().unwrap().write_delay = Some((clock.clone(), Duration::from_millis(600)));

        let mut frame = BytesMut::new();
        let packet = Packet::new(
            Address::new(0x09),
            Address::new(0x02),
            0,
            Bytes::from_static(b"r"),
        );
        encode_frame(&packet, &mut frame).unwrap();
        for _ in 0..5 {
            h.wires[0].lock().unwrap().inbound.extend_from_slice(&frame);
        }
        h.engine.read_ready(&[Readiness::Readable, Readiness::Idle], clock.now()).unwrap();

        // Two relays take 1.2s, past the 1s budget.
        h.engine.drain_links(&clock).unwrap();
        assert_eq!(h.counters().forwarded, 2);
        assert_eq!(h.counters().buffer_process_timeouts, 1);
        let buffered = h.engine.stats(clock.now(), 0, 0).links[0].buffered;
        assert_eq!(buffered, 3 * frame.len());

        h.engine.drain_links(&clock).unwrap();
        assert_eq!(h.counters().forwarded, 4);
        assert_eq!(h.counters().buffer_process_timeouts, 2);

        h.engine.drain_links(&clock).unwrap();
        assert_eq!(h.counters().forwarded, 5);
        assert_eq!(h.counters().buffer_process_timeouts, 2);
        assert_eq!(h.engine.stats(clock.now(), 0, 0).links[0].buffered, 0);
        assert_eq!(h.written(1).len(), 5);
    }

    #[test]
    fn hung_up_link_is_drained_then_closed() {
        let clock = ManualClock::new();
        let mut h = Harness::new(1, 8);
        h.wires[0].lock().unwrap().inbound.extend_from_slice(&[0xAA]);

        h.engine.read_ready(&[Readiness::HungUp], clock.now()).unwrap();
        assert_eq!(h.engine.stats(clock.now(), 0, 0).links[0].buffered, 1);

        let err = h
            .engine
            .read_ready(&[Readiness::HungUp], clock.now())
            .unwrap_err();
        match err {
            RouterError::Link {
                link,
                source: TransportError::Closed,
            } => assert_eq!(link, "link0"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_read_on_readable_link_is_not_an_error() {
        let clock = ManualClock::new();
        let mut h = Harness::new(1, 8);
        h.engine.read_ready(&[Readiness::Readable], clock.now()).unwrap();
    }

    #[test]
    fn unparsable_frame_counts_dropped() {
        let mut h = Harness::new(1, 8);
        let popped = PoppedFrame {
            packet: Bytes::from_static(&[0x01, 0x02]),
            garbage: 3,
        };
        h.engine.handle_frame(popped, LinkId(0), h.now).unwrap();
        assert_eq!(h.counters().dropped, 1);
        assert_eq!(h.counters().garbage_bytes, 3);
    }

    #[test]
    fn write_failure_names_the_link() {
        let mut h = Harness::new(2, 8);
        h.wires[1].lock().unwrap().fail_writes = true;
        let err = h.engine.send(Address::new(0x02), b"x", h.now).unwrap_err();
        match err {
            RouterError::Link { link, .. } => assert_eq!(link, "link1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn pending_overflow_is_counted() {
        let mut h = Harness::with_outbox(1, 8, Outbox::pending(1));
        h.receive(0x01, 0x02, 0, b"a", 0);
        h.receive(0x01, 0x02, 0, b"b", 0);

        assert_eq!(h.counters().queue_overflows, 1);
        assert_eq!(h.engine.take_pending().len(), 1);
    }

    #[test]
    fn queue_outbox_feeds_consumer() {
        let (tx, rx): (_, DeliveryQueue) = delivery::queue(4);
        let mut h = Harness::with_outbox(1, 8, Outbox::Queue(tx));
        h.receive(0x01, 0x02, 0, b"q", 0);

        assert!(h.engine.take_pending().is_empty());
        assert_eq!(h.engine.stats(h.now, 0, 0).queue_len, 1);
        assert_eq!(rx.try_recv().unwrap().payload.as_ref(), b"q");
    }

    #[test]
    fn restored_deliveries_keep_their_place() {
        let mut h = Harness::new(1, 8);
        h.receive(0x01, 0x02, 0, b"first", 0);
        let mut taken = h.engine.take_pending();
        h.receive(0x01, 0x02, 0, b"second", 0);

        taken.truncate(1);
        h.engine.restore_pending(taken);
        let order: Vec<_> = h
            .engine
            .take_pending()
            .into_iter()
            .map(|d| d.payload)
            .collect();
        assert_eq!(order, vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]);
    }

    #[test]
    fn lut_names_links() {
        let mut h = Harness::new(2, 8);
        h.receive(0x01, 0x03, 1, b"", 1);
        let lut = h.engine.lut();
        assert_eq!(lut.len(), 1);
        assert_eq!(lut[0].address, Address::new(0x03));
        assert_eq!(lut[0].link, "link1");
        assert_eq!(lut[0].hops, 1);
    }
}

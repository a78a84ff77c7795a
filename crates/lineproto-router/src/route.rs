//! Route table learned from observed traffic.

use std::time::{Duration, Instant};

use lineproto_frame::Address;

/// Handle of a link inside the router's link arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub(crate) usize);

impl LinkId {
    /// Position of the link in the order it was configured.
    pub fn index(self) -> usize {
        self.0
    }
}

/// One known path to a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// The destination this entry leads to.
    pub address: Address,
    /// The link packets for `address` should leave on.
    pub link: LinkId,
    /// Hop distance observed on that link.
    pub hops: u8,
    /// Last time traffic confirmed this entry.
    pub last_seen: Instant,
}

/// What [`RouteTable::update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteUpdate {
    /// Own or broadcast address; never stored.
    Ignored,
    /// An identical entry had its timestamp refreshed.
    Refreshed,
    /// A strictly better entry already exists.
    Worse,
    /// A new entry was stored.
    Inserted,
}

/// Reactive distance-vector style route table.
#[derive(Debug)]
pub struct RouteTable {
    own: Address,
    ttl: Duration,
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Create an empty table for the node at `own`.
    ///
    /// Entries expire after `ttl` without a refresh.
    pub fn new(own: Address, ttl: Duration) -> Self {
        Self {
            own,
            ttl,
            entries: Vec::new(),
        }
    }

    /// Record that `src` was heard on `link` at distance `hops`.
    pub fn update(&mut self, src: Address, link: LinkId, hops: u8, now: Instant) -> RouteUpdate {
        if src == self.own || src.is_broadcast() {
            return RouteUpdate::Ignored;
        }

        self.entries
            .retain(|e| e.address != src || e.hops <= hops);

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.address == src && e.link == link && e.hops == hops)
        {
            entry.last_seen = now;
            return RouteUpdate::Refreshed;
        }

        if self
            .entries
            .iter()
            .any(|e| e.address == src && e.hops < hops)
        {
            return RouteUpdate::Worse;
        }

        self.entries.push(RouteEntry {
            address: src,
            link,
            hops,
            last_seen: now,
        });
        RouteUpdate::Inserted
    }

    /// An entry is valid while fresh and while no shorter path to the same
    /// destination is known.
    pub fn is_valid(&self, entry: &RouteEntry, now: Instant) -> bool {
        if now.saturating_duration_since(entry.last_seen) > self.ttl {
            return false;
        }
        !self
            .entries
            .iter()
            .any(|e| e.address == entry.address && e.hops < entry.hops)
    }

    /// Drop every invalid entry. Returns the number removed.
    pub fn clean(&mut self, now: Instant) -> usize {
        let keep: Vec<bool> = self.entries.iter().map(|e| self.is_valid(e, now)).collect();
        let before = self.entries.len();
        let mut flags = keep.into_iter();
        self.entries.retain(|_| flags.next().unwrap_or(false));
        before - self.entries.len()
    }

    /// Best valid entry for `dst`; ties go to the entry learned first.
    #[must_use]
    pub fn find(&self, dst: Address, now: Instant) -> Option<&RouteEntry> {
        let mut best: Option<&RouteEntry> = None;
        for entry in self
            .entries
            .iter()
            .filter(|e| e.address == dst && self.is_valid(e, now))
        {
            if best.map_or(true, |b| entry.hops < b.hops) {
                best = Some(entry);
            }
        }
        best
    }

    /// Lowest hop count stored for `addr`, valid or not.
    pub fn best_hops(&self, addr: Address) -> Option<u8> {
        self.entries
            .iter()
            .filter(|e| e.address == addr)
            .map(|e| e.hops)
            .min()
    }

    /// Time-to-live applied to entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Iterate over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWN: Address = Address::new(0x01);
    const TTL: Duration = Duration::from_secs(240);

    fn table() -> RouteTable {
        RouteTable::new(OWN, TTL)
    }

    fn addr(raw: u8) -> Address {
        Address::new(raw)
    }

    #[test]
    fn ignores_own_and_broadcast_sources() {
        let now = Instant::now();
        let mut routes = table();
        assert_eq!(routes.update(OWN, LinkId(0), 1, now), RouteUpdate::Ignored);
        assert_eq!(
            routes.update(addr(0xC5), LinkId(0), 1, now),
            RouteUpdate::Ignored
        );
        assert!(routes.is_empty());
    }

    #[test]
    fn better_entry_replaces_worse() {
        let now = Instant::now();
        let mut routes = table();
        routes.update(addr(0x02), LinkId(0), 3, now);
        routes.update(addr(0x02), LinkId(1), 1, now);

        assert_eq!(routes.len(), 1);
        let entry = routes.find(addr(0x02), now).unwrap();
        assert_eq!((entry.link, entry.hops), (LinkId(1), 1));

        assert_eq!(
            routes.update(addr(0x02), LinkId(0), 5, now),
            RouteUpdate::Worse
        );
        assert_eq!(routes.len(), 1);
        assert_eq!(routes.find(addr(0x02), now).unwrap().hops, 1);
    }

    #[test]
    fn identical_update_refreshes_timestamp() {
        let start = Instant::now();
        let later = start + Duration::from_secs(10);
        let mut routes = table();
        routes.update(addr(0x02), LinkId(0), 2, start);

        assert_eq!(
            routes.update(addr(0x02), LinkId(0), 2, later),
            RouteUpdate::Refreshed
        );
        assert_eq!(routes.len(), 1);
        assert_eq!(routes.iter().next().unwrap().last_seen, later);
    }

    #[test]
    fn equal_hops_on_other_link_is_kept_and_first_wins() {
        let now = Instant::now();
        let mut routes = table();
        routes.update(addr(0x02), LinkId(0), 2, now);
        assert_eq!(
            routes.update(addr(0x02), LinkId(1), 2, now),
            RouteUpdate::Inserted
        );

        assert_eq!(routes.len(), 2);
        assert_eq!(routes.find(addr(0x02), now).unwrap().link, LinkId(0));
    }

    #[test]
    fn expired_entry_is_cleaned() {
        let start = Instant::now();
        let mut routes = table();
        routes.update(addr(0x02), LinkId(0), 1, start);
        routes.update(addr(0x03), LinkId(0), 1, start + Duration::from_secs(100));

        let at_limit = start + TTL;
        assert!(routes.find(addr(0x02), at_limit).is_some());

        let past = start + TTL + Duration::from_secs(1);
        assert!(routes.find(addr(0x02), past).is_none());
        assert_eq!(routes.clean(past), 1);
        assert!(routes.find(addr(0x02), past).is_none());
        assert!(routes.find(addr(0x03), past).is_some());
    }

    #[test]
    fn best_hops_and_missing_destination() {
        let now = Instant::now();
        let mut routes = table();
        assert_eq!(routes.best_hops(addr(0x02)), None);
        assert!(routes.find(addr(0x02), now).is_none());

        routes.update(addr(0x02), LinkId(0), 4, now);
        assert_eq!(routes.best_hops(addr(0x02)), Some(4));
    }

    #[test]
    fn is_valid_rejects_shadowed_entry() {
        let now = Instant::now();
        let routes = RouteTable {
            own: OWN,
            ttl: TTL,
            entries: vec![
                RouteEntry {
                    address: addr(0x02),
                    link: LinkId(0),
                    hops: 3,
                    last_seen: now,
                },
                RouteEntry {
                    address: addr(0x02),
                    link: LinkId(1),
                    hops: 1,
                    last_seen: now,
                },
            ],
        };
        let entries: Vec<&RouteEntry> = routes.iter().collect();
        assert!(!routes.is_valid(entries[0], now));
        assert!(routes.is_valid(entries[1], now));
    }
}

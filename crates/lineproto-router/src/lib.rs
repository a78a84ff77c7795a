//! Self-learning mesh router for lineproto.
//!
//! A [`Router`] owns a set of links, learns which link leads to which
//! address purely from the traffic it sees, forwards packets it is not the
//! destination of, and floods when it has no route. There is no routing
//! protocol: the only control traffic is a periodic zero-payload keepalive
//! that keeps learned routes fresh.
//!
//! Everything happens inside [`Router::process`], which the caller drives in
//! a loop. No threads are spawned.

pub mod clock;
pub mod config;
pub mod delivery;
mod engine;
pub mod error;
pub mod keepalive;
pub mod route;
pub mod router;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DeliveryMode, RouterConfig, Timing, DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_CHUNK};
pub use delivery::{Callback, Delivery, DeliveryQueue};
pub use error::{Result, RouterError};
pub use keepalive::{KeepaliveScheduler, KeepaliveStat};
pub use route::{LinkId, RouteEntry, RouteTable, RouteUpdate};
pub use router::Router;
pub use stats::{Counters, KeepaliveSnapshot, LinkStats, RouteSnapshot, RouterStats};

pub use lineproto_frame::Address;

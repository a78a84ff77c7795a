use std::time::Duration;

use lineproto_frame::Address;
use lineproto_transport::DEFAULT_POLL_TIMEOUT;

use crate::error::{Result, RouterError};

/// Deliveries buffered before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Bytes read from a ready link per tick.
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// How locally addressed packets reach the application.
///
/// Fixed at construction; the two modes cannot be mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Registered callbacks are invoked from [`Router::process`](crate::Router::process).
    #[default]
    Callbacks,
    /// Deliveries are pushed to a single-consumer queue.
    Queue,
}

/// Timers and work budgets.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Minimum gap between two keepalive probes.
    pub keepalive_interval: Duration,
    /// A route expires after `max_hop` times this without being refreshed.
    pub route_ttl_per_hop: Duration,
    /// Rot threshold: time without new bytes.
    pub rot_idle_bytes: Duration,
    /// Rot threshold: time without a successfully parsed frame.
    pub rot_idle_pop: Duration,
    /// Wall-clock budget for draining one link's buffer per tick.
    pub link_budget: Duration,
    /// Wall-clock budget for invoking callbacks per tick.
    pub dispatch_budget: Duration,
    /// How long the poll step waits for readable links.
    pub poll_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(25),
            route_ttl_per_hop: Duration::from_secs(30),
            rot_idle_bytes: lineproto_frame::ROT_IDLE_BYTES,
            rot_idle_pop: lineproto_frame::ROT_IDLE_POP,
            link_budget: Duration::from_secs(1),
            dispatch_budget: Duration::from_secs(2),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// This node's own unicast address.
    pub address: Address,
    /// Packets whose hop counter reaches this value are dropped.
    pub max_hop: u8,
    /// Callback or queue delivery.
    pub delivery: DeliveryMode,
    /// Bound on buffered deliveries.
    pub queue_capacity: usize,
    /// Bytes read from a ready link per tick.
    pub read_chunk: usize,
    /// Timers and budgets.
    pub timing: Timing,
}

impl RouterConfig {
    /// Configuration for `address` with callback delivery and default timing.
    pub fn new(address: impl Into<Address>, max_hop: u8) -> Self {
        Self {
            address: address.into(),
            max_hop,
            delivery: DeliveryMode::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_chunk: DEFAULT_READ_CHUNK,
            timing: Timing::default(),
        }
    }

    /// Switch the delivery mode.
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Override timers and budgets.
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// How long a route stays usable without being refreshed.
    pub fn route_ttl(&self) -> Duration {
        self.timing.route_ttl_per_hop * u32::from(self.max_hop)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.address.is_broadcast() {
            return Err(RouterError::InvalidConfig(format!(
                "own address {} is in the broadcast range",
                self.address
            )));
        }
        if self.max_hop == 0 {
            return Err(RouterError::InvalidConfig(
                "max_hop must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 || self.read_chunk == 0 {
            return Err(RouterError::InvalidConfig(
                "queue_capacity and read_chunk must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

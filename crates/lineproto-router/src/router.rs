use std::collections::VecDeque;
#[cfg(unix)]
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use lineproto_frame::Address;
#[cfg(unix)]
use lineproto_transport::{SerialConfig, SerialPort};
use lineproto_transport::{wait_readable, Link};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{DeliveryMode, RouterConfig};
use crate::delivery::{self, CallbackSet, Delivery, DeliveryQueue};
use crate::engine::{Engine, Outbox};
use crate::error::{Result, RouterError};
use crate::stats::{RouteSnapshot, RouterStats};

enum Sink {
    Callbacks(RwLock<CallbackSet>),
    Queue(Mutex<Option<DeliveryQueue>>),
}

/// A mesh node: links, route table and delivery, driven by [`process`](Self::process).
///
/// All methods take `&self`, so a router can be shared (for example in an
/// `Arc`) between the thread running [`serve_forever`](Self::serve_forever)
/// and threads calling [`send`](Self::send). Callbacks run on the thread
/// that calls `process`, without any router lock held, so they may call back
/// into the router.
///
/// # Example
///
/// ```no_run
/// use lineproto_router::{Address, Router, RouterConfig};
/// use lineproto_transport::SerialConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RouterConfig::new(Address::new(0x01), 8);
/// let router = Router::open(config, &["/dev/ttyUSB0"], &SerialConfig::default())?;
/// router.register_callback(|src, _dst, payload| {
///     println!("{src}: {payload:?}");
/// })?;
/// router.send(Address::new(0x02), b"hello")?;
/// router.serve_forever()?;
/// # Ok(())
/// # }
/// ```
pub struct Router {
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    engine: Mutex<Engine>,
    sink: Sink,
}

impl Router {
    /// Build a router over already opened links.
    pub fn new(config: RouterConfig, links: Vec<Box<dyn Link>>) -> Result<Self> {
        config.validate()?;

        let (outbox, sink) = match config.delivery {
            DeliveryMode::Callbacks => (
                Outbox::pending(config.queue_capacity),
                Sink::Callbacks(RwLock::new(CallbackSet::default())),
            ),
            DeliveryMode::Queue => {
                let (tx, rx) = delivery::queue(config.queue_capacity);
                (Outbox::Queue(tx), Sink::Queue(Mutex::new(Some(rx))))
            }
        };

        info!(
            address = %config.address,
            max_hop = config.max_hop,
            links = links.len(),
            delivery = ?config.delivery,
            "router created"
        );

        Ok(Self {
            engine: Mutex::new(Engine::new(&config, links, outbox)),
            config,
            clock: Arc::new(SystemClock),
            sink,
        })
    }

    /// Open each serial device and build a router over them.
    #[cfg(unix)]
    pub fn open<P: AsRef<Path>>(
        config: RouterConfig,
        devices: &[P],
        serial: &SerialConfig,
    ) -> Result<Self> {
        config.validate()?;
        let links = devices
            .iter()
            .map(|path| {
                SerialPort::open_with_config(path, serial)
                    .map(|link| Box::new(link) as Box<dyn Link>)
            })
            .collect::<lineproto_transport::Result<Vec<_>>>()?;
        Self::new(config, links)
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// This node's address.
    pub fn address(&self) -> Address {
        self.config.address
    }

    /// The configuration the router was built with.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Send `payload` to `dst`.
    ///
    /// Unicast goes to the learned route when one exists and floods every
    /// link otherwise. An undeliverable packet is counted as dropped, not
    /// reported as an error.
    pub fn send(&self, dst: Address, payload: &[u8]) -> Result<()> {
        let now = self.clock.now();
        self.lock().send(dst, payload, now)
    }

    /// Register a callback for packets addressed to this node.
    pub fn register_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(Address, Address, &[u8]) + Send + Sync + 'static,
    {
        let callbacks = self.callbacks("register_callback")?;
        callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_unicast(Arc::new(callback));
        Ok(())
    }

    /// Register a callback for packets sent to the broadcast address `addr`.
    ///
    /// Registering also makes this node accept `addr` as a local destination.
    pub fn register_broadcast_callback<F>(&self, addr: Address, callback: F) -> Result<()>
    where
        F: Fn(Address, Address, &[u8]) + Send + Sync + 'static,
    {
        let callbacks = self.callbacks("register_broadcast_callback")?;
        if !addr.is_broadcast() {
            return Err(RouterError::NotBroadcastAddress(addr));
        }
        callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_broadcast(addr, Arc::new(callback));
        self.lock().subscribe(addr);
        Ok(())
    }

    /// Accept packets for the broadcast address `addr` into the delivery queue.
    pub fn subscribe_broadcast(&self, addr: Address) -> Result<()> {
        if !matches!(self.sink, Sink::Queue(_)) {
            return Err(self.wrong_mode("subscribe_broadcast"));
        }
        if !addr.is_broadcast() {
            return Err(RouterError::NotBroadcastAddress(addr));
        }
        self.lock().subscribe(addr);
        Ok(())
    }

    /// Take the consumer end of the delivery queue.
    ///
    /// Available once, and only on a router built with [`DeliveryMode::Queue`].
    pub fn queue(&self) -> Result<DeliveryQueue> {
        match &self.sink {
            Sink::Queue(slot) => slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or(RouterError::QueueTaken),
            Sink::Callbacks(_) => Err(self.wrong_mode("queue")),
        }
    }

    /// Run one tick.
    ///
    /// Handles buffered frames, ages routes, sends a keepalive if one is due,
    /// flushes rotten buffers, runs callbacks for pending deliveries, then
    /// waits up to the poll timeout for links to become readable and reads
    /// them.
    pub fn process(&self) -> Result<()> {
        let (handles, pending) = {
            let mut engine = self.lock();
            engine.drain_links(self.clock.as_ref())?;
            let now = self.clock.now();
            engine.clean(now);
            engine.keepalive_tick(now)?;
            engine.rot_sweep(now);
            (engine.poll_handles(), engine.take_pending())
        };

        self.dispatch(pending);

        if handles.is_empty() {
            std::thread::sleep(self.config.timing.poll_timeout);
            return Ok(());
        }
        let ready = wait_readable(&handles, self.config.timing.poll_timeout)?;
        self.lock().read_ready(&ready, self.clock.now())
    }

    /// Call [`process`](Self::process) until it fails.
    pub fn serve_forever(&self) -> Result<()> {
        loop {
            self.process()?;
        }
    }

    /// Call [`process`](Self::process) while `keep_going` returns true.
    pub fn serve_while(&self, keep_going: impl Fn() -> bool) -> Result<()> {
        while keep_going() {
            self.process()?;
        }
        debug!(address = %self.config.address, "serve loop stopped");
        Ok(())
    }

    /// Snapshot of the route table.
    pub fn get_lut(&self) -> Vec<RouteSnapshot> {
        self.lock().lut()
    }

    /// Snapshot of counters and internal state.
    pub fn get_stats(&self) -> RouterStats {
        let (callbacks_len, bcast_callbacks_len) = match &self.sink {
            Sink::Callbacks(callbacks) => {
                let callbacks = callbacks.read().unwrap_or_else(PoisonError::into_inner);
                (callbacks.unicast_len(), callbacks.broadcast_len())
            }
            Sink::Queue(_) => (0, 0),
        };
        let now = self.clock.now();
        self.lock().stats(now, callbacks_len, bcast_callbacks_len)
    }

    fn dispatch(&self, mut pending: VecDeque<Delivery>) {
        let Sink::Callbacks(callbacks) = &self.sink else {
            return;
        };
        let budget = self.config.timing.dispatch_budget;
        let started = self.clock.now();

        while let Some(delivery) = pending.pop_front() {
            let targets = callbacks
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .targets(&delivery);
            if targets.is_empty() {
                debug!(
                    src = %delivery.src,
                    dst = %delivery.dst,
                    bytes = delivery.payload.len(),
                    "no callback registered, dropping delivery"
                );
            }
            for callback in targets {
                callback(delivery.src, delivery.dst, &delivery.payload);
            }

            if !pending.is_empty()
                && self.clock.now().saturating_duration_since(started) > budget
            {
                warn!(left = pending.len(), "callback dispatch budget exhausted");
                let mut engine = self.lock();
                engine.counters_mut().callback_process_timeouts += 1;
                engine.restore_pending(pending);
                return;
            }
        }
    }

    fn callbacks(&self, operation: &'static str) -> Result<&RwLock<CallbackSet>> {
        match &self.sink {
            Sink::Callbacks(callbacks) => Ok(callbacks),
            Sink::Queue(_) => Err(self.wrong_mode(operation)),
        }
    }

    fn wrong_mode(&self, operation: &'static str) -> RouterError {
        RouterError::WrongDeliveryMode {
            mode: self.config.delivery,
            operation,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("address", &self.config.address)
            .field("max_hop", &self.config.max_hop)
            .field("delivery", &self.config.delivery)
            .finish_non_exhaustive()
    }
}

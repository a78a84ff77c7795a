//! Link abstraction for lineproto.
//!
//! A link is one half-duplex byte pipe to a neighbouring node, usually a
//! serial device. The router only needs three things from it:
//! - write a complete frame
//! - read whatever bytes are available
//! - expose something that can be polled for readability
//!
//! This is the lowest layer of lineproto. Everything else builds on top of
//! the [`Link`] trait provided here.

pub mod error;
pub mod poll;
pub mod traits;

#[cfg(unix)]
pub mod serial;

pub use error::{Result, TransportError};
pub use poll::{wait_readable, Readiness, DEFAULT_POLL_TIMEOUT};
pub use traits::{FdLink, Link, PollHandle};

#[cfg(unix)]
pub use serial::{SerialConfig, SerialPort, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT};

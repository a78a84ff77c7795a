//! Self-learning multi-hop mesh transport over serial links.
//!
//! Nodes are joined by byte links (usually UART). Each node has a one-byte
//! address, learns which link leads where from the traffic it sees, and
//! relays packets it is not the destination of. Addresses from `0xC0` up
//! are broadcast groups.
//!
//! # Crate Structure
//!
//! - [`transport`]: links, serial ports, readiness polling
//! - [`frame`]: wire format, addresses, receive-buffer scanner
//! - [`router`]: route table, forwarding, keepalives and the `Router` façade
//!   (behind the default `router` feature)

/// Re-export transport types.
pub mod transport {
    pub use lineproto_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use lineproto_frame::*;
}

/// Re-export router types (requires `router` feature).
#[cfg(feature = "router")]
pub mod router {
    pub use lineproto_router::*;
}

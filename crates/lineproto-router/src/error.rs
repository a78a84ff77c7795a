use lineproto_frame::Address;

use crate::config::DeliveryMode;

/// Errors that can occur in router operations.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Frame-level error (bad address, oversized payload).
    #[error("frame error: {0}")]
    Frame(#[from] lineproto_frame::FrameError),

    /// Transport-level error not tied to a single link.
    #[error("transport error: {0}")]
    Transport(#[from] lineproto_transport::TransportError),

    /// A specific link failed to read or write.
    #[error("link {link} failed: {source}")]
    Link {
        link: String,
        source: lineproto_transport::TransportError,
    },

    /// The router configuration is unusable.
    #[error("invalid router config: {0}")]
    InvalidConfig(String),

    /// Broadcast registration with a unicast address.
    #[error("{0} is not a broadcast address")]
    NotBroadcastAddress(Address),

    /// The operation belongs to the other delivery mode.
    #[error("{operation} is not available in {mode:?} delivery mode")]
    WrongDeliveryMode {
        mode: DeliveryMode,
        operation: &'static str,
    },

    /// The delivery queue has already been handed out.
    #[error("delivery queue already taken")]
    QueueTaken,
}

pub type Result<T> = std::result::Result<T, RouterError>;

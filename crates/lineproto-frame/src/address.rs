//! One-byte service addresses.
//!
//! `0x00..=0xBF` are unicast addresses owned by a single node.
//! `0xC0..=0xFF` (top two bits set) are broadcast addresses.

use std::fmt;

use crate::error::{FrameError, Result};

/// First broadcast address.
pub const BROADCAST_START: u8 = 0xC0;

/// A lineproto service address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u8);

impl Address {
    /// Wrap a raw address byte.
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Parse an address from a byte slice that must be exactly one byte long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [raw] => Ok(Self(*raw)),
            other => Err(FrameError::InvalidAddressLength(other.len())),
        }
    }

    /// The raw address byte.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// True when the top two bits are set.
    pub const fn is_broadcast(self) -> bool {
        self.0 >= BROADCAST_START
    }
}

impl From<u8> for Address {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl From<Address> for u8 {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = FrameError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

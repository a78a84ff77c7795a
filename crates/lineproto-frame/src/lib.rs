//! Packet framing for the lineproto serial mesh.
//!
//! Every packet on the wire is prefixed with a single preamble byte and carries
//! a 7-byte header:
//! - 1-byte destination and source addresses
//! - 1-byte hop counter and 1 reserved byte
//! - 2-byte big-endian payload length
//! - 1-byte XOR checksum over the preceding six header bytes
//!
//! [`LinkBuffer`] recovers those frames from a raw, possibly corrupted byte
//! stream. Nothing in this crate performs I/O.

pub mod address;
pub mod buffer;
pub mod codec;
pub mod error;

pub use address::Address;
pub use buffer::{LinkBuffer, PoppedFrame, ROT_IDLE_BYTES, ROT_IDLE_POP};
pub use codec::{
    compile_packet, encode_frame, parse_packet, xor_all, Packet, FRAME_OVERHEAD, HEADER_LEN,
    HEADER_WITHOUT_CHECKSUM_LEN, MAX_PAYLOAD, PREAMBLE,
};
pub use error::{FrameError, Result};

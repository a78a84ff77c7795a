use bytes::{BufMut, Bytes, BytesMut};

use crate::address::Address;
use crate::error::{FrameError, Result};

/// Preamble byte that starts every frame on the wire.
pub const PREAMBLE: u8 = 0x69;

/// Header: dst (1) + src (1) + hop (1) + reserved (1) + length (2) + checksum (1).
pub const HEADER_LEN: usize = 7;

/// The part of the header covered by the checksum.
pub const HEADER_WITHOUT_CHECKSUM_LEN: usize = 6;

/// Preamble plus header.
pub const FRAME_OVERHEAD: usize = 1 + HEADER_LEN;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// A parsed packet (header fields plus payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Destination service address.
    pub dst: Address,
    /// Source service address.
    pub src: Address,
    /// Number of relays this packet has passed through.
    pub hop: u8,
    /// Reserved header byte. Always zero on packets built here.
    pub reserved: u8,
    /// Application bytes.
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet with a zero reserved byte.
    pub fn new(dst: Address, src: Address, hop: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            dst,
            src,
            hop,
            reserved: 0,
            payload: payload.into(),
        }
    }

    /// The same packet one relay further along.
    ///
    /// The hop counter saturates at `u8::MAX`.
    pub fn forwarded(&self) -> Self {
        Self::new(
            self.dst,
            self.src,
            self.hop.saturating_add(1),
            self.payload.clone(),
        )
    }

    /// Zero-length packets are keepalive probes.
    pub fn is_keepalive(&self) -> bool {
        self.payload.is_empty()
    }

    /// Total size on the wire including the preamble.
    pub fn wire_size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// XOR every byte of `input` together.
pub fn xor_all(input: &[u8]) -> u8 {
    input.iter().fold(0, |acc, b| acc ^ b)
}

/// Build a packet (header + checksum + payload, no preamble) into `dst`.
///
/// Layout:
/// ```text
/// ┌─────┬─────┬─────┬──────────┬────────────┬──────────┬──────────────┐
/// │ dst │ src │ hop │ reserved │ length     │ checksum │ payload      │
/// │ 1B  │ 1B  │ 1B  │ 1B (0x00)│ 2B BE      │ 1B XOR   │ length bytes │
/// └─────┴─────┴─────┴──────────┴────────────┴──────────┴──────────────┘
/// ```
pub fn compile_packet(
    dst_addr: Address,
    src_addr: Address,
    hop: u8,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let mut header = [0u8; HEADER_WITHOUT_CHECKSUM_LEN];
    header[0] = dst_addr.get();
    header[1] = src_addr.get();
    header[2] = hop;
    header[3] = 0x00;
    header[4..6].copy_from_slice(&(payload.len() as u16).to_be_bytes());

    dst.reserve(HEADER_LEN + payload.len());
    dst.put_slice(&header);
    dst.put_u8(xor_all(&header));
    dst.put_slice(payload);
    Ok(())
}

/// Encode a packet as a complete wire frame (preamble + packet) into `dst`.
///
/// On error `dst` is left as it was.
pub fn encode_frame(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    let start = dst.len();
    dst.reserve(packet.wire_size());
    dst.put_u8(PREAMBLE);
    if let Err(err) = compile_packet(packet.dst, packet.src, packet.hop, &packet.payload, dst) {
        dst.truncate(start);
        return Err(err);
    }
    Ok(())
}

/// Parse a packet (without preamble) produced by [`compile_packet`].
pub fn parse_packet(packet: Bytes) -> Result<Packet> {
    if packet.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            len: packet.len(),
            needed: HEADER_LEN,
        });
    }

    let expected = xor_all(&packet[..HEADER_WITHOUT_CHECKSUM_LEN]);
    let found = packet[HEADER_WITHOUT_CHECKSUM_LEN];
    if expected != found {
        return Err(FrameError::ChecksumMismatch { expected, found });
    }

    let declared = u16::from_be_bytes([packet[4], packet[5]]) as usize;
    let actual = packet.len() - HEADER_LEN;
    if declared != actual {
        return Err(FrameError::LengthMismatch { declared, actual });
    }

    Ok(Packet {
        dst: Address::new(packet[0]),
        src: Address::new(packet[1]),
        hop: packet[2],
        reserved: packet[3],
        payload: packet.slice(HEADER_LEN..),
    })
}

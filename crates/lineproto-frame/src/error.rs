/// Errors that can occur while building or parsing packets.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// The payload does not fit the 16-bit length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An address was not exactly one byte long.
    #[error("address must be exactly 1 byte (got {0})")]
    InvalidAddressLength(usize),

    /// Fewer bytes than the header requires.
    #[error("packet truncated ({len} bytes, need at least {needed})")]
    Truncated { len: usize, needed: usize },

    /// The header checksum byte does not match the header contents.
    #[error("header checksum mismatch (expected {expected:#04x}, found {found:#04x})")]
    ChecksumMismatch { expected: u8, found: u8 },

    /// The length field disagrees with the number of payload bytes present.
    #[error("length field says {declared} payload bytes, packet carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;

use crate::message_id::MessageId;

/// Errors that can occur while encoding, decoding or reassembling packets.
///
/// All of these are recoverable: the receiver drops the offending frame and
/// keeps running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer bytes than the smallest possible frame.
    #[error("frame too short ({len} bytes, min {min})")]
    Truncated { len: usize, min: usize },

    /// More bytes than the largest possible frame.
    #[error("frame too long ({len} bytes, max {max})")]
    Oversized { len: usize, max: usize },

    /// The embedded CRC disagrees with the received bytes.
    #[error("crc mismatch (frame 0x{expected:08X}, computed 0x{actual:08X})")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Unknown protocol version byte.
    #[error("unsupported packet version {0}")]
    UnsupportedVersion(u8),

    /// Unknown owner byte.
    #[error("unknown packet owner {0}")]
    UnknownOwner(u8),

    /// Unknown type byte.
    #[error("unknown packet type {0}")]
    UnknownType(u8),

    /// Content larger than one packet can carry.
    #[error("content too large ({size} bytes, max {max})")]
    ContentTooLarge { size: usize, max: usize },

    /// The frame length disagrees with its `content_length` field.
    #[error("frame length mismatch (header says {expected} bytes, got {actual})")]
    LengthMismatch { expected: usize, actual: usize },

    /// Payload too large to describe with 32-bit counters.
    #[error("payload too large ({0} bytes)")]
    PayloadTooLarge(usize),

    /// HEAD whose `total_count` cannot describe `total_length` bytes.
    #[error("message {message_id}: HEAD claims {total_length} bytes in {total_count} packets")]
    InconsistentHead {
        message_id: MessageId,
        total_length: usize,
        total_count: u32,
    },

    /// DATA or TAIL for a message whose HEAD was never seen.
    #[error("no HEAD received for message {0}")]
    UnknownMessage(MessageId),

    /// A packet arrived out of `index` order.
    #[error("message {message_id}: expected index {expected}, got {actual}")]
    OutOfOrder {
        message_id: MessageId,
        expected: u32,
        actual: u32,
    },

    /// Reassembled length disagrees with HEAD's `total_length`.
    #[error("message {message_id}: assembled {actual} bytes, expected {expected}")]
    MessageLengthMismatch {
        message_id: MessageId,
        expected: usize,
        actual: usize,
    },

    /// Reassembled payload does not hash to the TAIL digest.
    #[error("message {0}: sha-256 digest mismatch")]
    DigestMismatch(MessageId),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

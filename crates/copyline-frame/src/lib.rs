//! CRC-checked packet framing and big-message chunking for copy-line cables.
//!
//! Every frame on the cable is one [`Packet`]:
//! - a 51-byte fixed header (version, owner, type, counters, message id)
//! - 0..=969 bytes of content
//! - a trailing CRC-32 over everything before it
//!
//! Payloads larger than one packet travel as a HEAD / DATA... / TAIL
//! sequence produced by [`split`] and checked end-to-end with SHA-256 by
//! [`Reassembler`].

pub mod crc;
pub mod digest;
pub mod error;
pub mod message;
pub mod message_id;
pub mod packet;

pub use digest::{sha256, DIGEST_LEN};
pub use error::{ProtocolError, Result};
pub use message::{command_packet, split, split_with_id, Progress, ReceivedMessage, Reassembler};
pub use message_id::MessageId;
pub use packet::{
    decode_packet, encode_packet, Packet, PacketOwner, PacketType, CONTENT_MAX_LEN, HEADER_SIZE,
    MAX_FRAME_SIZE, MIN_FRAME_SIZE, VERSION_1,
};

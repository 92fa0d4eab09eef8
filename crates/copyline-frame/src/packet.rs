use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::{check_trailer, crc32, CRC_SIZE};
use crate::error::{ProtocolError, Result};
use crate::message_id::MessageId;

/// Fixed header: version (1) + owner (1) + type (1) + four u32 counters (16)
/// + message id (16) + reserved (16) = 51 bytes.
pub const HEADER_SIZE: usize = 51;

/// Maximum content bytes in one packet.
pub const CONTENT_MAX_LEN: usize = 969;

/// Smallest valid frame: header + CRC, no content.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CRC_SIZE;

/// Largest valid frame.
pub const MAX_FRAME_SIZE: usize = MIN_FRAME_SIZE + CONTENT_MAX_LEN;

/// The only protocol version spoken on the cable.
pub const VERSION_1: u8 = 1;

/// Which network domain produced a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketOwner {
    OuterNet = 1,
    IntraNet = 2,
}

impl TryFrom<u8> for PacketOwner {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::OuterNet),
            2 => Ok(Self::IntraNet),
            other => Err(ProtocolError::UnknownOwner(other)),
        }
    }
}

/// Packet role on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PacketType {
    Head = 1,
    Data = 2,
    Tail = 3,
    Ack = 4,
    Cmd = 5,
    Heartbeat = 6,
    DataAck = 7,
    CmdAck = 8,
    HeadAck = 9,
    TailAck = 10,
}

impl PacketType {
    /// All known packet types, in wire-code order.
    pub const ALL: [PacketType; 10] = [
        PacketType::Head,
        PacketType::Data,
        PacketType::Tail,
        PacketType::Ack,
        PacketType::Cmd,
        PacketType::Heartbeat,
        PacketType::DataAck,
        PacketType::CmdAck,
        PacketType::HeadAck,
        PacketType::TailAck,
    ];

    /// Whether this packet acknowledges another one.
    pub fn is_ack(self) -> bool {
        matches!(
            self,
            PacketType::Ack
                | PacketType::DataAck
                | PacketType::CmdAck
                | PacketType::HeadAck
                | PacketType::TailAck
        )
    }

    /// The acknowledgment type a receiver answers this packet with.
    ///
    /// `None` for packets that are themselves acknowledgments.
    pub fn ack_type(self) -> Option<PacketType> {
        match self {
            PacketType::Head => Some(PacketType::HeadAck),
            PacketType::Data => Some(PacketType::DataAck),
            PacketType::Tail => Some(PacketType::TailAck),
            PacketType::Cmd => Some(PacketType::CmdAck),
            PacketType::Heartbeat => Some(PacketType::Ack),
            _ => None,
        }
    }

    /// Upper-case wire name.
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Head => "HEAD",
            PacketType::Data => "DATA",
            PacketType::Tail => "TAIL",
            PacketType::Ack => "ACK",
            PacketType::Cmd => "CMD",
            PacketType::Heartbeat => "HEARTBEAT",
            PacketType::DataAck => "DATA_ACK",
            PacketType::CmdAck => "CMD_ACK",
            PacketType::HeadAck => "HEAD_ACK",
            PacketType::TailAck => "TAIL_ACK",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        PacketType::ALL
            .iter()
            .copied()
            .find(|ty| *ty as u8 == value)
            .ok_or(ProtocolError::UnknownType(value))
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One frame on the copy-line.
///
/// The CRC is not stored: [`encode_packet`] computes it and
/// [`decode_packet`] verifies it, so a decoded packet is always intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub owner: PacketOwner,
    pub packet_type: PacketType,
    /// Packets in this logical message.
    pub total_count: u32,
    /// 1-based position in the logical message.
    pub index: u32,
    /// Full payload length of the logical message.
    pub total_length: u32,
    pub message_id: MessageId,
    pub reserved: [u8; 16],
    pub content: Bytes,
}

impl Packet {
    /// Build a version-1 packet with zeroed reserved bytes.
    pub fn new(
        owner: PacketOwner,
        packet_type: PacketType,
        message_id: MessageId,
        total_count: u32,
        index: u32,
        total_length: u32,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            version: VERSION_1,
            owner,
            packet_type,
            total_count,
            index,
            total_length,
            message_id,
            reserved: [0u8; 16],
            content: content.into(),
        }
    }

    /// The acknowledgment for `packet`, echoing its id, count and index.
    ///
    /// Returns `None` when `packet` is itself an acknowledgment.
    pub fn ack_for(packet: &Packet, owner: PacketOwner) -> Option<Self> {
        let ack_type = packet.packet_type.ack_type()?;
        Some(Self::new(
            owner,
            ack_type,
            packet.message_id,
            packet.total_count,
            packet.index,
            packet.total_length,
            Bytes::new(),
        ))
    }

    /// Bytes of content carried by this packet.
    pub fn content_length(&self) -> usize {
        self.content.len()
    }

    /// Total size of this packet on the wire.
    pub fn wire_size(&self) -> usize {
        MIN_FRAME_SIZE + self.content.len()
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_packet(self, &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Encode a packet into the wire format.
///
/// Wire format (integers little-endian):
/// ```text
/// ┌─────┬───────┬──────┬────────┬───────┬────────┬─────────┬────────┬──────────┬─────────┬───────┐
/// │ ver │ owner │ type │ total  │ index │ total  │ content │ msg id │ reserved │ content │ crc32 │
/// │ 1B  │ 1B    │ 1B   │ cnt 4B │ 4B    │ len 4B │ len 4B  │ 16B    │ 16B      │ 0..969B │ 4B    │
/// └─────┴───────┴──────┴────────┴───────┴────────┴─────────┴────────┴──────────┴─────────┴───────┘
/// ```
/// The CRC covers every byte before it.
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    if packet.content.len() > CONTENT_MAX_LEN {
        return Err(ProtocolError::ContentTooLarge {
            size: packet.content.len(),
            max: CONTENT_MAX_LEN,
        });
    }

    let start = dst.len();
    dst.reserve(packet.wire_size());
    dst.put_u8(packet.version);
    dst.put_u8(packet.owner as u8);
    dst.put_u8(packet.packet_type as u8);
    dst.put_u32_le(packet.total_count);
    dst.put_u32_le(packet.index);
    dst.put_u32_le(packet.total_length);
    dst.put_u32_le(packet.content.len() as u32);
    dst.put_slice(packet.message_id.as_bytes());
    dst.put_slice(&packet.reserved);
    dst.put_slice(&packet.content);

    let crc = crc32(&dst[start..]);
    dst.put_u32_le(crc);
    Ok(())
}

/// Decode exactly one frame.
///
/// Length bounds are checked first, then the CRC, then individual fields, so
/// any corruption inside an otherwise well-sized frame reports
/// [`ProtocolError::CrcMismatch`].
pub fn decode_packet(src: &[u8]) -> Result<Packet> {
    if src.len() < MIN_FRAME_SIZE {
        return Err(ProtocolError::Truncated {
            len: src.len(),
            min: MIN_FRAME_SIZE,
        });
    }
    if src.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::Oversized {
            len: src.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    if let Some((expected, actual)) = check_trailer(src) {
        if expected != actual {
            return Err(ProtocolError::CrcMismatch { expected, actual });
        }
    }

    let version = src[0];
    if version != VERSION_1 {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let owner = PacketOwner::try_from(src[1])?;
    let packet_type = PacketType::try_from(src[2])?;
    let total_count = read_u32(src, 3);
    let index = read_u32(src, 7);
    let total_length = read_u32(src, 11);
    let content_length = read_u32(src, 15) as usize;

    if content_length > CONTENT_MAX_LEN {
        return Err(ProtocolError::ContentTooLarge {
            size: content_length,
            max: CONTENT_MAX_LEN,
        });
    }
    let expected = MIN_FRAME_SIZE + content_length;
    if src.len() != expected {
        return Err(ProtocolError::LengthMismatch {
            expected,
            actual: src.len(),
        });
    }

    let mut message_id = [0u8; 16];
    message_id.copy_from_slice(&src[19..35]);
    let mut reserved = [0u8; 16];
    reserved.copy_from_slice(&src[35..51]);
    let content = Bytes::copy_from_slice(&src[HEADER_SIZE..HEADER_SIZE + content_length]);

    Ok(Packet {
        version,
        owner,
        packet_type,
        total_count,
        index,
        total_length,
        message_id: MessageId(message_id),
        reserved,
        content,
    })
}

fn read_u32(src: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        src[offset],
        src[offset + 1],
        src[offset + 2],
        src[offset + 3],
    ])
}

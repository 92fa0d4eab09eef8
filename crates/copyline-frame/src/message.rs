//! Big-message chunking and reassembly.
//!
//! A payload travels as one HEAD (index 1, carries `total_length`), zero or
//! more DATA packets of up to [`CONTENT_MAX_LEN`] bytes, and one TAIL at
//! index `total_count` whose content is the SHA-256 of the whole payload.

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};

use crate::digest::{sha256, verify};
use crate::error::{ProtocolError, Result};
use crate::message_id::MessageId;
use crate::packet::{Packet, PacketOwner, PacketType, CONTENT_MAX_LEN};

/// Split `payload` into HEAD/DATA/TAIL packets under a fresh message id.
pub fn split(owner: PacketOwner, payload: &[u8]) -> Result<Vec<Packet>> {
    split_with_id(owner, payload, MessageId::generate())
}

/// Split `payload` under a caller-chosen message id.
pub fn split_with_id(owner: PacketOwner, payload: &[u8], id: MessageId) -> Result<Vec<Packet>> {
    let total_length =
        u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;
    let data_packets = payload.len().div_ceil(CONTENT_MAX_LEN);
    let total_count = u32::try_from(data_packets + 2)
        .map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;

    let mut packets = Vec::with_capacity(data_packets + 2);
    packets.push(Packet::new(
        owner,
        PacketType::Head,
        id,
        total_count,
        1,
        total_length,
        Bytes::new(),
    ));

    let shared = Bytes::copy_from_slice(payload);
    for (i, start) in (0..payload.len()).step_by(CONTENT_MAX_LEN).enumerate() {
        let end = (start + CONTENT_MAX_LEN).min(payload.len());
        packets.push(Packet::new(
            owner,
            PacketType::Data,
            id,
            total_count,
            i as u32 + 2,
            total_length,
            shared.slice(start..end),
        ));
    }

    packets.push(Packet::new(
        owner,
        PacketType::Tail,
        id,
        total_count,
        total_count,
        total_length,
        Bytes::copy_from_slice(&sha256(payload)),
    ));

    Ok(packets)
}

/// Build the single-packet CMD message carrying `content`.
pub fn command_packet(owner: PacketOwner, content: Bytes, id: MessageId) -> Result<Packet> {
    if content.len() > CONTENT_MAX_LEN {
        return Err(ProtocolError::ContentTooLarge {
            size: content.len(),
            max: CONTENT_MAX_LEN,
        });
    }
    let len = content.len() as u32;
    Ok(Packet::new(owner, PacketType::Cmd, id, 1, 1, len, content))
}

/// A fully reassembled and digest-verified payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub owner: PacketOwner,
    pub payload: Bytes,
}

/// Result of feeding one packet to a [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// HEAD accepted; a new message is in flight.
    Started,
    /// DATA accepted.
    Accepted { index: u32, total_count: u32 },
    /// TAIL accepted and the digest matched.
    Complete(ReceivedMessage),
}

#[derive(Debug)]
struct Partial {
    owner: PacketOwner,
    total_count: u32,
    total_length: usize,
    next_index: u32,
    buf: BytesMut,
}

/// Default number of messages that may be in flight at once.
pub const DEFAULT_MAX_PARTIALS: usize = 16;

// Larger messages grow their buffer as DATA arrives.
const INITIAL_CAPACITY_MAX: usize = CONTENT_MAX_LEN * 64;

/// Receive-side accumulator keyed by message id.
///
/// HEAD resets any previous state for its id. Any rejected packet drops the
/// whole message.
#[derive(Debug)]
pub struct Reassembler {
    partials: HashMap<MessageId, Partial>,
    order: VecDeque<MessageId>,
    max_partials: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_max_partials(DEFAULT_MAX_PARTIALS)
    }

    /// Keep at most `max_partials` in-flight messages, evicting the oldest.
    pub fn with_max_partials(max_partials: usize) -> Self {
        Self {
            partials: HashMap::new(),
            order: VecDeque::new(),
            max_partials: max_partials.max(1),
        }
    }

    /// Messages currently in flight.
    pub fn pending(&self) -> usize {
        self.partials.len()
    }

    /// Forget every in-flight message.
    pub fn clear(&mut self) {
        self.partials.clear();
        self.order.clear();
    }

    /// Feed one HEAD, DATA or TAIL packet.
    ///
    /// Other packet types are ignored and reported as [`Progress::Accepted`]
    /// with their own index.
    pub fn push(&mut self, packet: &Packet) -> Result<Progress> {
        match packet.packet_type {
            PacketType::Head => {
                self.start(packet)?;
                Ok(Progress::Started)
            }
            PacketType::Data => self.data(packet),
            PacketType::Tail => self.tail(packet),
            _ => Ok(Progress::Accepted {
                index: packet.index,
                total_count: packet.total_count,
            }),
        }
    }

    fn start(&mut self, head: &Packet) -> Result<()> {
        let id = head.message_id;
        self.forget(&id);

        let total_length = head.total_length as usize;
        let expected_count = total_length.div_ceil(CONTENT_MAX_LEN) + 2;
        if head.index != 1 || head.total_count as usize != expected_count {
            return Err(ProtocolError::InconsistentHead {
                message_id: id,
                total_length,
                total_count: head.total_count,
            });
        }

        while self.partials.len() >= self.max_partials {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            tracing::warn!(message_id = %oldest, "evicting incomplete message");
            self.partials.remove(&oldest);
        }

        self.partials.insert(
            id,
            Partial {
                owner: head.owner,
                total_count: head.total_count,
                total_length,
                next_index: 2,
                buf: BytesMut::with_capacity(total_length.min(INITIAL_CAPACITY_MAX)),
            },
        );
        self.order.push_back(id);
        Ok(())
    }

    fn data(&mut self, packet: &Packet) -> Result<Progress> {
        let id = packet.message_id;
        let partial = self
            .partials
            .get_mut(&id)
            .ok_or(ProtocolError::UnknownMessage(id))?;

        if packet.index != partial.next_index || packet.index >= partial.total_count {
            let expected = partial.next_index;
            self.forget(&id);
            return Err(ProtocolError::OutOfOrder {
                message_id: id,
                expected,
                actual: packet.index,
            });
        }

        let assembled = partial.buf.len() + packet.content.len();
        if assembled > partial.total_length {
            let expected = partial.total_length;
            self.forget(&id);
            return Err(ProtocolError::MessageLengthMismatch {
                message_id: id,
                expected,
                actual: assembled,
            });
        }

        partial.buf.extend_from_slice(&packet.content);
        partial.next_index += 1;
        Ok(Progress::Accepted {
            index: packet.index,
            total_count: partial.total_count,
        })
    }

    fn tail(&mut self, packet: &Packet) -> Result<Progress> {
        let id = packet.message_id;
        let partial = self
            .partials
            .remove(&id)
            .ok_or(ProtocolError::UnknownMessage(id))?;
        self.order.retain(|queued| *queued != id);

        if packet.index != partial.next_index || packet.index != partial.total_count {
            return Err(ProtocolError::OutOfOrder {
                message_id: id,
                expected: partial.next_index,
                actual: packet.index,
            });
        }
        if partial.buf.len() != partial.total_length {
            return Err(ProtocolError::MessageLengthMismatch {
                message_id: id,
                expected: partial.total_length,
                actual: partial.buf.len(),
            });
        }
        if !verify(&partial.buf, &packet.content) {
            return Err(ProtocolError::DigestMismatch(id));
        }

        Ok(Progress::Complete(ReceivedMessage {
            message_id: id,
            owner: partial.owner,
            payload: partial.buf.freeze(),
        }))
    }

    fn forget(&mut self, id: &MessageId) {
        if self.partials.remove(id).is_some() {
            self.order.retain(|queued| queued != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{decode_packet, MAX_FRAME_SIZE, MIN_FRAME_SIZE};

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn reassemble(packets: &[Packet]) -> Result<Progress> {
        let mut reassembler = Reassembler::new();
        let mut last = Progress::Started;
        for packet in packets {
            last = reassembler.push(packet)?;
        }
        Ok(last)
    }

    #[test]
    fn split_3000_bytes_into_six_packets() {
        let data = payload(3000);
        let packets = split(PacketOwner::OuterNet, &data).unwrap();

        assert_eq!(packets.len(), 6);
        assert!(packets.iter().all(|p| p.total_count == 6));
        assert!(packets.iter().all(|p| p.message_id == packets[0].message_id));

        let types: Vec<_> = packets.iter().map(|p| p.packet_type).collect();
        assert_eq!(
            types,
            [
                PacketType::Head,
                PacketType::Data,
                PacketType::Data,
                PacketType::Data,
                PacketType::Data,
                PacketType::Tail
            ]
        );
        let indexes: Vec<_> = packets.iter().map(|p| p.index).collect();
        assert_eq!(indexes, [1, 2, 3, 4, 5, 6]);

        assert_eq!(packets[0].content_length(), 0);
        assert_eq!(packets[0].total_length, 3000);
        assert_eq!(packets[4].content_length(), 3000 - 3 * CONTENT_MAX_LEN);

        let tail = &packets[5];
        assert_eq!(tail.content_length(), 32);
        assert_eq!(tail.content.as_ref(), sha256(&data).as_slice());
    }

    #[test]
    fn split_packets_stay_in_frame_bounds() {
        let packets = split(PacketOwner::IntraNet, &payload(CONTENT_MAX_LEN * 3 + 1)).unwrap();
        for packet in &packets {
            assert!(packet.content_length() <= CONTENT_MAX_LEN);
            let wire = packet.to_bytes().unwrap();
            assert!((MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&wire.len()));
            assert_eq!(&decode_packet(&wire).unwrap(), packet);
        }
    }

    #[test]
    fn split_empty_payload_is_head_and_tail() {
        let packets = split(PacketOwner::OuterNet, b"").unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].index, 2);
        match reassemble(&packets).unwrap() {
            Progress::Complete(msg) => assert!(msg.payload.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reassembly_recovers_payload() {
        let data = payload(5000);
        let packets = split(PacketOwner::IntraNet, &data).unwrap();

        match reassemble(&packets).unwrap() {
            Progress::Complete(msg) => {
                assert_eq!(msg.payload.as_ref(), data.as_slice());
                assert_eq!(msg.owner, PacketOwner::IntraNet);
                assert_eq!(msg.message_id, packets[0].message_id);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn altered_data_byte_fails_digest() {
        let data = payload(3000);
        for target in 1..5 {
            let mut packets = split(PacketOwner::OuterNet, &data).unwrap();
            let mut content = packets[target].content.to_vec();
            content[7] ^= 0x40;
            packets[target].content = Bytes::from(content);

            assert_eq!(
                reassemble(&packets).unwrap_err(),
                ProtocolError::DigestMismatch(packets[0].message_id)
            );
        }
    }

    #[test]
    fn out_of_order_data_is_rejected() {
        let packets = split(PacketOwner::OuterNet, &payload(3000)).unwrap();
        let mut reassembler = Reassembler::new();
        reassembler.push(&packets[0]).unwrap();

        let err = reassembler.push(&packets[2]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::OutOfOrder {
                expected: 2,
                actual: 3,
                ..
            }
        ));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn data_without_head_is_unknown() {
        let packets = split(PacketOwner::OuterNet, &payload(100)).unwrap();
        let mut reassembler = Reassembler::new();
        assert!(matches!(
            reassembler.push(&packets[1]).unwrap_err(),
            ProtocolError::UnknownMessage(_)
        ));
        assert!(matches!(
            reassembler.push(&packets[2]).unwrap_err(),
            ProtocolError::UnknownMessage(_)
        ));
    }

    #[test]
    fn head_resets_partial_message() {
        let packets = split(PacketOwner::OuterNet, &payload(2000)).unwrap();
        let mut reassembler = Reassembler::new();
        reassembler.push(&packets[0]).unwrap();
        reassembler.push(&packets[1]).unwrap();

        // Sender restarted the same message from the top.
        let mut last = Progress::Started;
        for packet in &packets {
            last = reassembler.push(packet).unwrap();
        }
        assert!(matches!(last, Progress::Complete(_)));
    }

    #[test]
    fn oldest_partial_is_evicted() {
        let mut reassembler = Reassembler::with_max_partials(2);
        let a = split_with_id(PacketOwner::OuterNet, b"a", MessageId::from_parts(1, 0)).unwrap();
        let b = split_with_id(PacketOwner::OuterNet, b"b", MessageId::from_parts(2, 0)).unwrap();
        let c = split_with_id(PacketOwner::OuterNet, b"c", MessageId::from_parts(3, 0)).unwrap();

        reassembler.push(&a[0]).unwrap();
        reassembler.push(&b[0]).unwrap();
        reassembler.push(&c[0]).unwrap();
        assert_eq!(reassembler.pending(), 2);
        assert!(matches!(
            reassembler.push(&a[1]).unwrap_err(),
            ProtocolError::UnknownMessage(_)
        ));
        reassembler.push(&b[1]).unwrap();
    }

    #[test]
    fn head_with_inflated_length_is_rejected() {
        let id = MessageId::from_parts(42, 0);
        let head = Packet::new(
            PacketOwner::OuterNet,
            PacketType::Head,
            id,
            3,
            1,
            u32::MAX,
            Bytes::new(),
        );
        let mut reassembler = Reassembler::new();

        assert_eq!(
            reassembler.push(&head).unwrap_err(),
            ProtocolError::InconsistentHead {
                message_id: id,
                total_length: u32::MAX as usize,
                total_count: 3,
            }
        );
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn large_message_grows_past_initial_capacity() {
        let data = payload(INITIAL_CAPACITY_MAX + 3 * CONTENT_MAX_LEN + 5);
        let packets = split(PacketOwner::OuterNet, &data).unwrap();

        match reassemble(&packets).unwrap() {
            Progress::Complete(msg) => assert_eq!(msg.payload.as_ref(), data.as_slice()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn command_packet_is_single() {
        let id = MessageId::generate();
        let packet = command_packet(PacketOwner::OuterNet, Bytes::from_static(b"{}"), id).unwrap();
        assert_eq!(packet.packet_type, PacketType::Cmd);
        assert_eq!((packet.total_count, packet.index), (1, 1));
        assert_eq!(packet.message_id, id);

        let too_big = Bytes::from(vec![b'x'; CONTENT_MAX_LEN + 1]);
        assert!(command_packet(PacketOwner::OuterNet, too_big, id).is_err());
    }
}

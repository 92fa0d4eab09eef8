//! Per packet-type responders and the registry that dispatches to them.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use copyline_frame::{Packet, PacketOwner, PacketType, Progress, ReceivedMessage, Reassembler};

use crate::coordinator::{lock, Channel};
use crate::error::{BridgeError, Result};

/// What a handler may do while the receive path holds the gate.
pub struct HandlerContext<'a> {
    channel: &'a mut Channel,
    owner: PacketOwner,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(channel: &'a mut Channel, owner: PacketOwner) -> Self {
        Self { channel, owner }
    }

    /// Owner stamped on replies from this node.
    pub fn owner(&self) -> PacketOwner {
        self.owner
    }

    /// Write a reply packet. Replies are never waited upon.
    pub fn reply(&mut self, packet: &Packet) -> Result<()> {
        self.channel.write_packet(packet)
    }

    /// Reply with the standard acknowledgment for `packet`.
    pub fn acknowledge(&mut self, packet: &Packet) -> Result<()> {
        match Packet::ack_for(packet, self.owner) {
            Some(ack) => self.reply(&ack),
            None => Ok(()),
        }
    }
}

/// Responds to one decoded packet.
///
/// Errors other than hardware faults are logged by the dispatcher and the
/// receive loop carries on.
pub trait PacketHandler: Send + Sync {
    fn handle(&self, packet: &Packet, ctx: &mut HandlerContext<'_>) -> Result<()>;
}

/// Whether a registration may overwrite an existing handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterMode {
    #[default]
    Replace,
    KeepExisting,
}

/// Packet type to handler table. Unregistered types go to [`DefaultHandler`].
pub struct HandlerRegistry {
    handlers: HashMap<PacketType, Arc<dyn PacketHandler>>,
    fallback: Arc<dyn PacketHandler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(DefaultHandler),
        }
    }

    pub fn register(
        &mut self,
        packet_type: PacketType,
        handler: Arc<dyn PacketHandler>,
        mode: RegisterMode,
    ) -> Result<()> {
        if self.handlers.contains_key(&packet_type) {
            if mode == RegisterMode::KeepExisting {
                return Err(BridgeError::HandlerExists(packet_type));
            }
            tracing::warn!(packet_type = %packet_type, "replacing packet handler");
        }
        self.handlers.insert(packet_type, handler);
        Ok(())
    }

    pub fn contains(&self, packet_type: PacketType) -> bool {
        self.handlers.contains_key(&packet_type)
    }

    /// Handler for `packet_type`, or the no-op fallback.
    pub fn get(&self, packet_type: PacketType) -> Arc<dyn PacketHandler> {
        self.handlers
            .get(&packet_type)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

/// Ignores the packet.
#[derive(Debug, Default)]
pub struct DefaultHandler;

impl PacketHandler for DefaultHandler {
    fn handle(&self, packet: &Packet, _ctx: &mut HandlerContext<'_>) -> Result<()> {
        tracing::debug!(packet_type = %packet.packet_type, "no handler registered, ignoring");
        Ok(())
    }
}

/// ACK variants. The dispatcher has already raised the ACK signal.
#[derive(Debug, Default)]
pub struct AckHandler;

impl PacketHandler for AckHandler {
    fn handle(&self, _packet: &Packet, _ctx: &mut HandlerContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Answers HEARTBEAT with ACK.
#[derive(Debug, Default)]
pub struct HeartbeatHandler;

impl PacketHandler for HeartbeatHandler {
    fn handle(&self, packet: &Packet, ctx: &mut HandlerContext<'_>) -> Result<()> {
        ctx.acknowledge(packet)
    }
}

/// HEAD/DATA/TAIL: reassemble, acknowledge, deliver completed payloads.
///
/// Packets the reassembler rejects are not acknowledged, so the sender
/// times out instead of believing the message arrived. The inbox is bounded:
/// while it is full a completed message is dropped and its TAIL left
/// unacknowledged.
pub struct DataHandler {
    reassembler: Arc<Mutex<Reassembler>>,
    inbox: mpsc::SyncSender<ReceivedMessage>,
}

impl DataHandler {
    pub fn new(
        reassembler: Arc<Mutex<Reassembler>>,
        inbox: mpsc::SyncSender<ReceivedMessage>,
    ) -> Self {
        Self { reassembler, inbox }
    }
}

impl PacketHandler for DataHandler {
    fn handle(&self, packet: &Packet, ctx: &mut HandlerContext<'_>) -> Result<()> {
        let progress = lock(&self.reassembler).push(packet);
        let progress = match progress {
            Ok(progress) => progress,
            Err(err) => {
                tracing::warn!(
                    message_id = %packet.message_id,
                    index = packet.index,
                    error = %err,
                    "discarding message"
                );
                return Ok(());
            }
        };

        if let Progress::Complete(message) = progress {
            let message_id = message.message_id;
            let len = message.payload.len();
            match self.inbox.try_send(message) {
                Ok(()) => tracing::info!(%message_id, len, "message received"),
                Err(mpsc::TrySendError::Full(_)) => {
                    tracing::warn!(%message_id, len, "inbox full, dropping received message");
                    return Ok(());
                }
                Err(mpsc::TrySendError::Disconnected(_)) => {
                    tracing::debug!(%message_id, "inbox closed, dropping received message");
                }
            }
        }

        ctx.acknowledge(packet)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use copyline_frame::{decode_packet, split};
    use copyline_transport::{LoopbackTransport, Transport};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::coordinator::Coordinator;

    struct Counting(AtomicUsize);

    impl PacketHandler for Counting {
        fn handle(&self, _packet: &Packet, _ctx: &mut HandlerContext<'_>) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn read_reply(peer: &mut LoopbackTransport) -> Option<Packet> {
        let mut buf = [0u8; 1100];
        let n = peer.read(&mut buf).unwrap();
        (n > 0).then(|| decode_packet(&buf[..n]).unwrap())
    }

    #[test]
    fn keep_existing_refuses_overwrite() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(PacketType::Cmd, Arc::new(AckHandler), RegisterMode::KeepExisting)
            .unwrap();
        let err = registry
            .register(PacketType::Cmd, Arc::new(AckHandler), RegisterMode::KeepExisting)
            .unwrap_err();
        assert!(matches!(err, BridgeError::HandlerExists(PacketType::Cmd)));
        assert_eq!(err.code(), 1211);
    }

    #[test]
    fn replace_overwrites() {
        let (a, _b) = LoopbackTransport::pair();
        let coordinator = Coordinator::new(Box::new(a));
        let mut guard = coordinator.acquire(&CancellationToken::new()).unwrap();
        let mut ctx = HandlerContext::new(&mut guard, PacketOwner::OuterNet);

        let first = Arc::new(Counting(AtomicUsize::new(0)));
        let second = Arc::new(Counting(AtomicUsize::new(0)));
        let mut registry = HandlerRegistry::new();
        registry
            .register(PacketType::Heartbeat, first.clone(), RegisterMode::Replace)
            .unwrap();
        registry
            .register(PacketType::Heartbeat, second.clone(), RegisterMode::Replace)
            .unwrap();

        let packet = split(PacketOwner::OuterNet, b"x").unwrap().remove(0);
        registry
            .get(PacketType::Heartbeat)
            .handle(&packet, &mut ctx)
            .unwrap();
        assert_eq!(first.0.load(Ordering::SeqCst), 0);
        assert_eq!(second.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_type_uses_noop_fallback() {
        let registry = HandlerRegistry::new();
        assert!(!registry.contains(PacketType::Data));

        let (a, mut b) = LoopbackTransport::pair();
        b.open().unwrap();
        let coordinator = Coordinator::new(Box::new(a));
        let mut guard = coordinator.acquire(&CancellationToken::new()).unwrap();
        guard.refresh().unwrap();
        let mut ctx = HandlerContext::new(&mut guard, PacketOwner::OuterNet);

        let packet = split(PacketOwner::OuterNet, b"x").unwrap().remove(1);
        registry.get(PacketType::Data).handle(&packet, &mut ctx).unwrap();
        assert!(read_reply(&mut b).is_none());
    }

    #[test]
    fn data_handler_acks_and_delivers() {
        let (a, mut b) = LoopbackTransport::pair();
        b.open().unwrap();
        let coordinator = Coordinator::new(Box::new(a));
        let mut guard = coordinator.acquire(&CancellationToken::new()).unwrap();
        guard.refresh().unwrap();
        let mut ctx = HandlerContext::new(&mut guard, PacketOwner::IntraNet);

        let (tx, rx) = mpsc::sync_channel(4);
        let handler = DataHandler::new(Arc::new(Mutex::new(Reassembler::new())), tx);
        let payload = vec![0x5Au8; 2000];
        let packets = split(PacketOwner::OuterNet, &payload).unwrap();

        for packet in &packets {
            handler.handle(packet, &mut ctx).unwrap();
            let ack = read_reply(&mut b).expect("ack");
            assert_eq!(Some(ack.packet_type), packet.packet_type.ack_type());
            assert_eq!(ack.message_id, packet.message_id);
            assert_eq!(ack.index, packet.index);
            assert_eq!(ack.owner, PacketOwner::IntraNet);
        }

        let message = rx.try_recv().unwrap();
        assert_eq!(message.payload.as_ref(), payload.as_slice());
        assert_eq!(message.owner, PacketOwner::OuterNet);
    }

    #[test]
    fn data_handler_does_not_ack_rejected_packets() {
        let (a, mut b) = LoopbackTransport::pair();
        b.open().unwrap();
        let coordinator = Coordinator::new(Box::new(a));
        let mut guard = coordinator.acquire(&CancellationToken::new()).unwrap();
        guard.refresh().unwrap();
        let mut ctx = HandlerContext::new(&mut guard, PacketOwner::IntraNet);

        let (tx, rx) = mpsc::sync_channel(4);
        let handler = DataHandler::new(Arc::new(Mutex::new(Reassembler::new())), tx);
        let packets = split(PacketOwner::OuterNet, b"no head").unwrap();

        handler.handle(&packets[1], &mut ctx).unwrap();
        assert!(read_reply(&mut b).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_inbox_leaves_tail_unacknowledged() {
        let (a, mut b) = LoopbackTransport::pair();
        b.open().unwrap();
        let coordinator = Coordinator::new(Box::new(a));
        let mut guard = coordinator.acquire(&CancellationToken::new()).unwrap();
        guard.refresh().unwrap();
        let mut ctx = HandlerContext::new(&mut guard, PacketOwner::IntraNet);

        let (tx, rx) = mpsc::sync_channel(1);
        let handler = DataHandler::new(Arc::new(Mutex::new(Reassembler::new())), tx);
        for packet in &split(PacketOwner::OuterNet, b"first").unwrap() {
            handler.handle(packet, &mut ctx).unwrap();
            assert!(read_reply(&mut b).is_some());
        }

        let second = split(PacketOwner::OuterNet, b"second").unwrap();
        handler.handle(&second[0], &mut ctx).unwrap();
        assert!(read_reply(&mut b).is_some());
        handler.handle(&second[1], &mut ctx).unwrap();
        assert!(read_reply(&mut b).is_none());

        assert_eq!(rx.try_recv().unwrap().payload.as_ref(), b"first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn heartbeat_is_acknowledged() {
        let (a, mut b) = LoopbackTransport::pair();
        b.open().unwrap();
        let coordinator = Coordinator::new(Box::new(a));
        let mut guard = coordinator.acquire(&CancellationToken::new()).unwrap();
        guard.refresh().unwrap();
        let mut ctx = HandlerContext::new(&mut guard, PacketOwner::IntraNet);

        let mut heartbeat = split(PacketOwner::OuterNet, b"").unwrap().remove(0);
        heartbeat.packet_type = PacketType::Heartbeat;
        HeartbeatHandler.handle(&heartbeat, &mut ctx).unwrap();
        assert_eq!(read_reply(&mut b).unwrap().packet_type, PacketType::Ack);
    }
}

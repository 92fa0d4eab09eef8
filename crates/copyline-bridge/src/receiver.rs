//! Receive path: read one frame, decode it, dispatch it by type.
//!
//! Protocol errors are never fatal here. Bad frames are logged and dropped;
//! only hardware faults end the loop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use copyline_frame::{decode_packet, Packet, PacketType, MAX_FRAME_SIZE, MIN_FRAME_SIZE};
use tokio_util::sync::CancellationToken;

use crate::context::BridgeContext;
use crate::coordinator::Channel;
use crate::error::{BridgeError, Result};
use crate::handler::HandlerContext;
use crate::status::LinkState;

/// Outcome of one receive cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Link is down; nothing was read.
    Offline,
    /// Nothing arrived within the read timeout.
    Idle,
    /// A frame arrived but was discarded.
    Dropped,
    /// A packet was decoded and handled.
    Dispatched(PacketType),
}

/// Run one receive cycle on a channel the caller holds exclusively.
pub(crate) fn poll_once(ctx: &BridgeContext, channel: &mut Channel, buf: &mut [u8]) -> Result<Poll> {
    match channel.refresh() {
        Ok(LinkState::Online) => {}
        Ok(LinkState::Offline) => return Ok(Poll::Offline),
        Err(err) => return Err(BridgeError::Hardware(err)),
    }

    let n = match channel.read_frame(buf) {
        Ok(n) => n,
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            tracing::debug!(error = %err, "read failed, link offline");
            return Ok(Poll::Offline);
        }
    };
    if n == 0 {
        tracing::trace!("receive cycle idle");
        return Ok(Poll::Idle);
    }
    if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&n) || n > buf.len() {
        tracing::warn!(len = n, "dropping frame of implausible length");
        return Ok(Poll::Dropped);
    }

    let packet = match decode_packet(&buf[..n]) {
        Ok(packet) => packet,
        Err(err) => {
            tracing::warn!(len = n, error = %err, "dropping undecodable frame");
            return Ok(Poll::Dropped);
        }
    };

    dispatch(ctx, channel, &packet)?;
    Ok(Poll::Dispatched(packet.packet_type))
}

/// Raise the ACK signal if applicable, then run the registered handler.
pub(crate) fn dispatch(ctx: &BridgeContext, channel: &mut Channel, packet: &Packet) -> Result<()> {
    tracing::debug!(
        packet_type = %packet.packet_type,
        message_id = %packet.message_id,
        index = packet.index,
        "packet received"
    );

    if packet.packet_type.is_ack() && !ctx.coordinator.ack().offer(packet) {
        tracing::warn!(
            packet_type = %packet.packet_type,
            message_id = %packet.message_id,
            index = packet.index,
            "unsolicited acknowledgment"
        );
    }

    let handler = ctx.handler(packet.packet_type);
    let mut handler_ctx = HandlerContext::new(channel, ctx.owner());
    match handler.handle(packet, &mut handler_ctx) {
        Ok(()) => Ok(()),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            tracing::warn!(
                packet_type = %packet.packet_type,
                message_id = %packet.message_id,
                error = %err,
                "handler failed"
            );
            Ok(())
        }
    }
}

/// Background loop draining the transport.
pub(crate) fn spawn(
    ctx: Arc<BridgeContext>,
    token: CancellationToken,
    generation: u64,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("copyline-receiver".into())
        .spawn(move || {
            let mut buf = vec![0u8; ctx.config.read_buffer_size()];
            ctx.run_cycles("receiver", &token, generation, |channel| {
                poll_once(&ctx, channel, &mut buf).map(|_| ())
            });
        })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use copyline_frame::{split, MessageId, PacketOwner};
    use copyline_transport::{LoopbackTransport, Transport};

    use super::*;
    use crate::config::BridgeMode;
    use crate::context::testing::context;

    fn read(peer: &mut LoopbackTransport) -> Option<Packet> {
        let mut buf = [0u8; 1100];
        let n = peer.read(&mut buf).unwrap();
        (n > 0).then(|| decode_packet(&buf[..n]).unwrap())
    }

    #[test]
    fn dispatches_and_acknowledges() {
        let (a, mut b) = LoopbackTransport::pair();
        b.open().unwrap();
        let (ctx, inbox) = context(a, BridgeMode::INSIDE);
        let mut guard = ctx.coordinator.acquire(&CancellationToken::new()).unwrap();
        let mut buf = vec![0u8; 2048];

        let packets = split(PacketOwner::OuterNet, b"hello inside").unwrap();
        for packet in &packets {
            b.write(&packet.to_bytes().unwrap()).unwrap();
            assert_eq!(
                poll_once(&ctx, &mut guard, &mut buf).unwrap(),
                Poll::Dispatched(packet.packet_type)
            );
            let ack = read(&mut b).unwrap();
            assert_eq!(ack.owner, PacketOwner::IntraNet);
            assert_eq!(ack.index, packet.index);
        }
        assert_eq!(inbox.try_recv().unwrap().payload.as_ref(), b"hello inside");
    }

    #[test]
    fn idle_and_offline_cycles() {
        let (a, b) = LoopbackTransport::pair();
        let b_control = b.control();
        let (ctx, _inbox) = context(a, BridgeMode::INSIDE);
        let mut guard = ctx.coordinator.acquire(&CancellationToken::new()).unwrap();
        let mut buf = vec![0u8; 2048];

        assert_eq!(poll_once(&ctx, &mut guard, &mut buf).unwrap(), Poll::Idle);
        b_control.set_attached(false);
        assert_eq!(poll_once(&ctx, &mut guard, &mut buf).unwrap(), Poll::Offline);
    }

    #[test]
    fn corrupt_frames_are_dropped_not_fatal() {
        let (a, mut b) = LoopbackTransport::pair();
        b.open().unwrap();
        let (ctx, _inbox) = context(a, BridgeMode::INSIDE);
        let mut guard = ctx.coordinator.acquire(&CancellationToken::new()).unwrap();
        let mut buf = vec![0u8; 2048];

        b.write(&[0u8; 10]).unwrap();
        assert_eq!(poll_once(&ctx, &mut guard, &mut buf).unwrap(), Poll::Dropped);

        b.write(&[0u8; MAX_FRAME_SIZE + 5]).unwrap();
        assert_eq!(poll_once(&ctx, &mut guard, &mut buf).unwrap(), Poll::Dropped);

        let mut frame = split(PacketOwner::OuterNet, b"x").unwrap()[0]
            .to_bytes()
            .unwrap()
            .to_vec();
        frame[20] ^= 0xFF;
        b.write(&frame).unwrap();
        assert_eq!(poll_once(&ctx, &mut guard, &mut buf).unwrap(), Poll::Dropped);

        // nothing was acknowledged
        assert!(read(&mut b).is_none());
    }

    #[test]
    fn hardware_fault_is_fatal() {
        let (a, _b) = LoopbackTransport::pair();
        let control = a.control();
        let (ctx, _inbox) = context(a, BridgeMode::INSIDE);
        let mut guard = ctx.coordinator.acquire(&CancellationToken::new()).unwrap();
        let mut buf = vec![0u8; 2048];

        poll_once(&ctx, &mut guard, &mut buf).unwrap();
        control.inject_fault();
        assert!(poll_once(&ctx, &mut guard, &mut buf).unwrap_err().is_fatal());
    }

    #[test]
    fn matching_ack_raises_signal() {
        let (a, mut b) = LoopbackTransport::pair();
        b.open().unwrap();
        let (ctx, _inbox) = context(a, BridgeMode::OUTSIDE);
        let mut guard = ctx.coordinator.acquire(&CancellationToken::new()).unwrap();
        let mut buf = vec![0u8; 2048];

        let head = Packet::new(
            PacketOwner::OuterNet,
            PacketType::Head,
            MessageId::generate(),
            3,
            1,
            1,
            Bytes::new(),
        );
        ctx.coordinator.ack().expect(&head);
        let ack = Packet::ack_for(&head, PacketOwner::IntraNet).unwrap();
        b.write(&ack.to_bytes().unwrap()).unwrap();

        assert_eq!(
            poll_once(&ctx, &mut guard, &mut buf).unwrap(),
            Poll::Dispatched(PacketType::HeadAck)
        );
        assert!(ctx.coordinator.ack().wait(Duration::ZERO));
    }

    #[test]
    fn loop_stops_on_cancel() {
        let (a, _b) = LoopbackTransport::pair();
        let (ctx, _inbox) = context(a, BridgeMode::INSIDE);
        let token = CancellationToken::new();
        let handle = spawn(Arc::clone(&ctx), token.clone(), 1).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
        handle.join().unwrap();
    }
}

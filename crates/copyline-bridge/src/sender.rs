//! Caller-driven send path.
//!
//! The sender holds the gate for the whole message. While it waits for an
//! ACK it runs the receive path itself, so acknowledgments (and any packets
//! the peer sends meanwhile) are read and dispatched without releasing the
//! hardware to another role.

use std::time::{Duration, Instant};

use copyline_frame::Packet;
use tokio_util::sync::CancellationToken;

use crate::context::BridgeContext;
use crate::coordinator::Channel;
use crate::error::{BridgeError, Result};
use crate::receiver::{poll_once, Poll};

/// Back-off while the link is OFFLINE during an ACK wait.
const OFFLINE_BACKOFF: Duration = Duration::from_millis(20);

/// Write `packets` in order, waiting for each acknowledgment.
///
/// ACK-typed packets are written without waiting. The first missing ACK
/// aborts the message with [`BridgeError::AckTimeout`]; nothing after it is
/// written.
pub(crate) fn send_message(
    ctx: &BridgeContext,
    packets: &[Packet],
    ack_timeout: Duration,
    token: &CancellationToken,
) -> Result<()> {
    let mut guard = ctx.coordinator.acquire(token)?;
    let link = guard.refresh().map_err(BridgeError::Hardware)?;
    if !link.is_online() {
        return Err(BridgeError::DeviceUnavailable(format!("link is {link}")));
    }

    let mut buf = vec![0u8; ctx.config.read_buffer_size()];
    let ack = ctx.coordinator.ack();
    for packet in packets {
        if token.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        let awaits_ack = !packet.packet_type.is_ack();
        if awaits_ack {
            ack.expect(packet);
        }
        if let Err(err) = guard.write_packet(packet) {
            ack.clear();
            return Err(err);
        }
        if awaits_ack {
            await_ack(ctx, &mut guard, packet, ack_timeout, token, &mut buf)?;
        }
    }
    Ok(())
}

fn await_ack(
    ctx: &BridgeContext,
    channel: &mut Channel,
    packet: &Packet,
    timeout: Duration,
    token: &CancellationToken,
    buf: &mut [u8],
) -> Result<()> {
    let ack = ctx.coordinator.ack();
    let deadline = Instant::now() + timeout;
    loop {
        if ack.take() {
            return Ok(());
        }
        if token.is_cancelled() {
            ack.clear();
            return Err(BridgeError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            ack.clear();
            tracing::warn!(
                message_id = %packet.message_id,
                index = packet.index,
                packet_type = %packet.packet_type,
                "ack timeout"
            );
            return Err(BridgeError::AckTimeout {
                message_id: packet.message_id,
                index: packet.index,
                timeout,
            });
        }

        match poll_once(ctx, channel, buf) {
            Ok(Poll::Offline) => {
                ack.wait((deadline - now).min(OFFLINE_BACKOFF));
            }
            Ok(_) => {}
            Err(err) => {
                ack.clear();
                return Err(err);
            }
        }
    }
}

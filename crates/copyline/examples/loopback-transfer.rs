//! Loopback transfer: two bridge nodes over an in-memory cable.
//!
//! Run with:
//!   cargo run --example loopback-transfer
//!
//! The OUTSIDE node sends a 64 KiB payload; the INSIDE node reassembles it,
//! verifies the digest and answers with a short receipt.

use std::time::Duration;

use copyline::bridge::{BridgeConfig, BridgeMode, Manager};
use copyline::frame::{sha256, PacketOwner};
use copyline::transport::LoopbackTransport;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (outer_cable, inner_cable) = LoopbackTransport::pair();

    let config = BridgeConfig {
        cycle_interval_ms: 10,
        ..BridgeConfig::default()
    };
    let outside = Manager::new(
        outer_cable,
        BridgeConfig {
            initial_mode: BridgeMode::OUTSIDE,
            ..config.clone()
        },
    );
    let inside = Manager::new(
        inner_cable,
        BridgeConfig {
            initial_mode: BridgeMode::INSIDE,
            ..config
        },
    );
    outside.start()?;
    inside.start()?;

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 256) as u8).collect();
    let id = outside.send_big_data(PacketOwner::OuterNet, &payload)?;
    eprintln!("[outside] sent message {id} ({} bytes)", payload.len());

    let received = inside
        .recv_message(Duration::from_secs(10))
        .ok_or("message not delivered")?;
    let intact = sha256(&received.payload) == sha256(&payload);
    eprintln!(
        "[inside] received message {} ({} bytes, intact: {intact})",
        received.message_id,
        received.payload.len()
    );

    let receipt = format!("received {} ok={intact}", received.message_id);
    inside.send_big_data(PacketOwner::IntraNet, receipt.as_bytes())?;
    if let Some(reply) = outside.recv_message(Duration::from_secs(10)) {
        eprintln!("[outside] {}", String::from_utf8_lossy(&reply.payload));
    }

    outside.stop();
    inside.stop();
    Ok(())
}

//! Reliable messaging over a USB copy-line.
//!
//! Two isolated machines share nothing but a point-to-point bulk pipe. This
//! crate runs an ACK-driven protocol over it:
//!
//! - a single gate serializes every hardware access between the Sender,
//!   the Receiver loop and the Monitor loop
//! - big payloads travel as HEAD/DATA.../TAIL and each packet waits for its
//!   acknowledgment before the next is written
//! - commands travel as one CMD packet answered by one CMD_ACK, and only the
//!   outside node may send them
//! - hardware faults tear the whole session down and the [`Manager`] starts
//!   a fresh one
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use copyline_bridge::{BridgeConfig, BridgeMode, Manager};
//! use copyline_frame::PacketOwner;
//! use copyline_transport::LoopbackTransport;
//!
//! let (outside, inside) = LoopbackTransport::pair();
//! let outside = Manager::new(outside, BridgeConfig::default());
//! let inside = Manager::new(
//!     inside,
//!     BridgeConfig {
//!         initial_mode: BridgeMode::INSIDE,
//!         ..BridgeConfig::default()
//!     },
//! );
//! outside.start()?;
//! inside.start()?;
//!
//! outside.send_big_data(PacketOwner::OuterNet, b"report.pdf bytes")?;
//! let message = inside.recv_message(Duration::from_secs(5));
//! assert!(message.is_some());
//! # Ok::<(), copyline_bridge::BridgeError>(())
//! ```

pub mod command;
pub mod config;
mod context;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod manager;
mod monitor;
mod receiver;
mod sender;
pub mod status;

pub use command::{
    truncate_utf8, CommandAckHandler, CommandExecutor, CommandFormat, CommandHandler, ExecError,
    PendingCommands, ShellExecutor,
};
pub use config::{BridgeConfig, BridgeMode, Direction, Position};
pub use coordinator::{AckSignal, Channel, Coordinator, GateGuard};
pub use error::{BridgeError, Result};
pub use handler::{
    AckHandler, DataHandler, DefaultHandler, HandlerContext, HandlerRegistry, HeartbeatHandler,
    PacketHandler, RegisterMode,
};
pub use manager::Manager;
pub use receiver::Poll;
pub use status::{CopylineStatus, LinkState};

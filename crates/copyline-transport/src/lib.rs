//! Transport abstraction for USB copy-line cables.
//!
//! A copy-line is a point-to-point USB bridge chip (PL25A1, PL27A7, ...) that
//! exposes a bulk IN/OUT endpoint pair and a vendor status query. This crate
//! defines the surface the rest of copyline talks to:
//! - [`Transport`]: open/close, one-frame-per-call bulk read/write, status query
//! - [`LinkRawState`]: the raw local/remote attach bits behind link status
//! - [`CopylineInfo`]: the hardware descriptor discovered at open
//!
//! The native USB driver lives outside this workspace. [`LoopbackTransport`]
//! provides a connected in-memory pair for tests and self-checks.

pub mod error;
pub mod info;
pub mod loopback;
pub mod traits;

pub use error::{Result, TransportError};
pub use info::{CopylineInfo, LinkRawState, PL25A1, PL27A7};
pub use loopback::{LoopbackConfig, LoopbackControl, LoopbackTransport};
pub use traits::Transport;

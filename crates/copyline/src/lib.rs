//! Reliable messaging and command relay across a USB copy-line air gap.
//!
//! copyline moves arbitrary payloads and shell commands between two hosts
//! joined by a point-to-point USB bridge cable, with per-packet CRC,
//! per-message SHA-256 and stop-and-wait acknowledgments.
//!
//! # Crate Structure
//!
//! - [`transport`]: the cable abstraction and an in-memory loopback pair
//! - [`frame`]: packet codec, big-message splitting and reassembly
//! - [`bridge`]: the Manager, its receive/monitor loops and the command relay
//!   (behind the `bridge` feature, on by default)

/// Re-export transport types.
pub mod transport {
    pub use copyline_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use copyline_frame::*;
}

/// Re-export bridge types (requires `bridge` feature).
#[cfg(feature = "bridge")]
pub mod bridge {
    pub use copyline_bridge::*;
}

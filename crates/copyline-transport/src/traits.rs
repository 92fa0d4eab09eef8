use crate::error::Result;
use crate::info::{CopylineInfo, LinkRawState};

/// A copy-line data path: bulk OUT, bulk IN and a status query.
///
/// The hardware is half-duplex and not thread-safe. Implementations may
/// assume that exactly one caller at a time uses them; the bridge enforces
/// that with its coordinator gate.
///
/// Framing contract: each `write` carries exactly one frame, each successful
/// `read` returns at most one frame. There is no reassembly below the frame
/// boundary.
pub trait Transport: Send {
    /// Open the device and claim its bulk interface.
    ///
    /// Returns the descriptor discovered on the device. Calling `open` on an
    /// already open transport is allowed and returns the cached descriptor.
    fn open(&mut self) -> Result<CopylineInfo>;

    /// Release the interface and close the device. Idempotent.
    fn close(&mut self);

    /// Whether the device is currently open.
    fn is_open(&self) -> bool;

    /// Write one frame. Returns the number of bytes accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Read at most one frame into `buf`.
    ///
    /// Blocks for at most the transport's read timeout. `Ok(0)` means nothing
    /// arrived. A frame longer than `buf` is truncated to `buf.len()` and the
    /// full length is still reported, so callers can reject it by size.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Query the raw local/remote attach state.
    fn status(&mut self) -> Result<LinkRawState>;
}

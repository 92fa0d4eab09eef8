//! Periodic link status refresh.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;

use crate::context::BridgeContext;
use crate::error::BridgeError;

/// Background loop keeping the published link state current while the
/// Receiver idles.
pub(crate) fn spawn(
    ctx: Arc<BridgeContext>,
    token: CancellationToken,
    generation: u64,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("copyline-monitor".into())
        .spawn(move || {
            ctx.run_cycles("monitor", &token, generation, |channel| {
                let link = channel.refresh().map_err(BridgeError::Hardware)?;
                tracing::trace!(%link, "status refreshed");
                Ok(())
            });
        })
}

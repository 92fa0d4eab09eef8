use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::info::{CopylineInfo, LinkRawState, PL27A7};
use crate::traits::Transport;

/// Configuration for one loopback endpoint.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// How long `read` waits for a frame before returning `Ok(0)`.
    pub read_timeout: Duration,
    /// Descriptor reported by `open`.
    pub info: CopylineInfo,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(20),
            info: CopylineInfo {
                from_device: true,
                ..PL27A7
            },
        }
    }
}

#[derive(Debug, Default)]
struct Endpoint {
    attached: AtomicBool,
    fault: AtomicBool,
    frames_written: AtomicU64,
    opens: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    endpoints: [Endpoint; 2],
}

/// One end of an in-memory copy-line.
///
/// Frames written on one end are read, one per `read`, on the other end.
/// Both ends start attached.
pub struct LoopbackTransport {
    side: usize,
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
    shared: Arc<Shared>,
    config: LoopbackConfig,
    open: bool,
}

impl LoopbackTransport {
    /// Create a connected pair with default configuration.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_config(LoopbackConfig::default())
    }

    /// Create a connected pair with explicit configuration.
    pub fn pair_with_config(config: LoopbackConfig) -> (Self, Self) {
        let shared = Arc::new(Shared {
            endpoints: [Endpoint::default(), Endpoint::default()],
        });
        for endpoint in &shared.endpoints {
            endpoint.attached.store(true, Ordering::SeqCst);
        }

        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();

        let a = Self {
            side: 0,
            tx: a_tx,
            rx: a_rx,
            shared: Arc::clone(&shared),
            config: config.clone(),
            open: false,
        };
        let b = Self {
            side: 1,
            tx: b_tx,
            rx: b_rx,
            shared,
            config,
            open: false,
        };
        (a, b)
    }

    /// Handle for flipping this endpoint's attach bit and injecting faults.
    pub fn control(&self) -> LoopbackControl {
        LoopbackControl {
            side: self.side,
            shared: Arc::clone(&self.shared),
        }
    }

    fn local(&self) -> &Endpoint {
        &self.shared.endpoints[self.side]
    }

    fn remote(&self) -> &Endpoint {
        &self.shared.endpoints[1 - self.side]
    }

    fn check_ready(&self) -> Result<()> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        if self.local().fault.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Fault("injected loopback fault".to_string()));
        }
        Ok(())
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self) -> Result<CopylineInfo> {
        if !self.local().attached.load(Ordering::SeqCst) {
            return Err(TransportError::NotFound {
                vendor_id: self.config.info.vendor_id,
                product_id: self.config.info.product_id,
            });
        }
        if !self.open {
            self.open = true;
            self.local().opens.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(side = self.side, "loopback endpoint opened");
        }
        Ok(self.config.info.clone())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            tracing::debug!(side = self.side, "loopback endpoint closed");
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.check_ready()?;
        if !self.remote().attached.load(Ordering::SeqCst) {
            return Ok(0);
        }
        if self.tx.send(Bytes::copy_from_slice(bytes)).is_err() {
            return Ok(0);
        }
        self.local().frames_written.fetch_add(1, Ordering::SeqCst);
        Ok(bytes.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_ready()?;
        match self.rx.recv_timeout(self.config.read_timeout) {
            Ok(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(frame.len())
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => {
                // Peer endpoint dropped: behave like an idle cable.
                std::thread::sleep(self.config.read_timeout);
                Ok(0)
            }
        }
    }

    fn status(&mut self) -> Result<LinkRawState> {
        self.check_ready()?;
        let local = self.local().attached.load(Ordering::SeqCst);
        let remote = self.remote().attached.load(Ordering::SeqCst);
        Ok(LinkRawState {
            local_attached: local,
            local_super_speed: local,
            remote_attached: remote,
            remote_super_speed: remote,
            ..LinkRawState::default()
        })
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("side", &self.side)
            .field("open", &self.open)
            .finish()
    }
}

/// Test handle for one loopback endpoint.
#[derive(Debug, Clone)]
pub struct LoopbackControl {
    side: usize,
    shared: Arc<Shared>,
}

impl LoopbackControl {
    fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoints[self.side]
    }

    /// Plug or unplug this end of the cable.
    pub fn set_attached(&self, attached: bool) {
        self.endpoint().attached.store(attached, Ordering::SeqCst);
    }

    /// Make the next transport call on this end fail with a hardware fault.
    pub fn inject_fault(&self) {
        self.endpoint().fault.store(true, Ordering::SeqCst);
    }

    /// Number of frames this end has written successfully.
    pub fn frames_written(&self) -> u64 {
        self.endpoint().frames_written.load(Ordering::SeqCst)
    }

    /// Number of times this end transitioned from closed to open.
    pub fn opens(&self) -> u64 {
        self.endpoint().opens.load(Ordering::SeqCst)
    }
}

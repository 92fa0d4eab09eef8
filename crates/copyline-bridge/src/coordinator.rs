//! Exclusive hardware access and the ACK signal.
//!
//! Sender, Receiver and Monitor never touch the transport concurrently.
//! Whoever holds a [`GateGuard`] is the only code allowed to call
//! [`Channel`] methods. Acquisition is cancellable; release happens when the
//! guard drops, whatever the outcome of the work done under it.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use copyline_frame::{MessageId, Packet, PacketType};
use copyline_transport::{CopylineInfo, Transport, TransportError};
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::status::{CopylineStatus, LinkState};

/// How often a blocked acquirer re-checks its cancellation token.
const GATE_POLL: Duration = Duration::from_millis(10);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The transport plus the hardware state cached alongside it.
pub struct Channel {
    transport: Box<dyn Transport>,
    info: Option<CopylineInfo>,
    status: CopylineStatus,
    published: Arc<Mutex<CopylineStatus>>,
}

impl Channel {
    fn new(transport: Box<dyn Transport>, published: Arc<Mutex<CopylineStatus>>) -> Self {
        Self {
            transport,
            info: None,
            status: CopylineStatus::offline(),
            published,
        }
    }

    /// Descriptor discovered at the last successful open.
    pub fn info(&self) -> Option<&CopylineInfo> {
        self.info.as_ref()
    }

    /// Status from the last refresh.
    pub fn status(&self) -> CopylineStatus {
        self.status
    }

    /// Open the device if needed and re-derive the link state.
    ///
    /// Any failure forces OFFLINE and drops the cached descriptor. Fatal
    /// transport errors are returned so the caller can report a fault.
    pub fn refresh(&mut self) -> std::result::Result<LinkState, TransportError> {
        if !self.transport.is_open() {
            match self.transport.open() {
                Ok(info) => {
                    tracing::debug!(device = %info, "copy-line opened");
                    self.info = Some(info);
                }
                Err(err) => return self.refresh_failed(err),
            }
        }
        match self.transport.status() {
            Ok(raw) => {
                self.publish(CopylineStatus::from_raw(raw));
                Ok(self.status.link)
            }
            Err(err) => self.refresh_failed(err),
        }
    }

    fn refresh_failed(&mut self, err: TransportError) -> std::result::Result<LinkState, TransportError> {
        self.reset();
        if err.is_fatal() {
            Err(err)
        } else {
            tracing::trace!(error = %err, "status refresh failed");
            Ok(LinkState::Offline)
        }
    }

    /// Encode and write one packet.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let frame = packet.to_bytes()?;
        let written = match self.transport.write(&frame) {
            Ok(n) => n,
            Err(err) => {
                self.reset();
                return Err(err.into());
            }
        };
        if written != frame.len() {
            return Err(BridgeError::DeviceUnavailable(format!(
                "short write ({written} of {} bytes)",
                frame.len()
            )));
        }
        tracing::debug!(
            packet_type = %packet.packet_type,
            message_id = %packet.message_id,
            index = packet.index,
            len = frame.len(),
            "packet written"
        );
        Ok(())
    }

    /// Read at most one frame. `Ok(0)` means nothing arrived.
    pub fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.transport.read(buf) {
            Ok(n) => Ok(n),
            Err(err) => {
                self.reset();
                Err(err.into())
            }
        }
    }

    /// Close the transport and forget everything learned from it.
    pub fn reset(&mut self) {
        self.transport.close();
        self.info = None;
        self.publish(CopylineStatus::offline());
    }

    fn publish(&mut self, status: CopylineStatus) {
        if status.link != self.status.link {
            tracing::info!(from = %self.status.link, to = %status.link, "link state changed");
        }
        self.status = status;
        *lock(&self.published) = status;
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.transport.is_open() {
            self.transport.close();
        }
    }
}

/// Binary exclusive-access gate around the [`Channel`].
pub struct Gate {
    busy: Mutex<bool>,
    released: Condvar,
    channel: Mutex<Channel>,
}

impl Gate {
    /// Wait for exclusive access, giving up when `token` is cancelled.
    pub fn acquire(&self, token: &CancellationToken) -> Result<GateGuard<'_>> {
        let mut busy = lock(&self.busy);
        while *busy {
            if token.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }
            busy = match self.released.wait_timeout(busy, GATE_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        if token.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        *busy = true;
        drop(busy);

        Ok(GateGuard {
            gate: self,
            channel: lock(&self.channel),
        })
    }
}

/// Exclusive access to the channel. Releases the gate on drop.
pub struct GateGuard<'a> {
    gate: &'a Gate,
    channel: MutexGuard<'a, Channel>,
}

impl Deref for GateGuard<'_> {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl DerefMut for GateGuard<'_> {
    fn deref_mut(&mut self) -> &mut Channel {
        &mut self.channel
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.gate.busy) = false;
        self.gate.released.notify_one();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Awaited {
    message_id: MessageId,
    index: u32,
    ack_type: PacketType,
}

#[derive(Debug, Default)]
struct AckState {
    awaited: Option<Awaited>,
    received: bool,
}

/// "ACK received" signal between the receive path and a waiting sender.
///
/// Matching is by value: message id, index and acknowledgment type.
#[derive(Debug, Default)]
pub struct AckSignal {
    state: Mutex<AckState>,
    raised: Condvar,
}

impl AckSignal {
    /// Start waiting for the acknowledgment of `packet`.
    pub fn expect(&self, packet: &Packet) {
        let mut state = lock(&self.state);
        state.awaited = packet.packet_type.ack_type().map(|ack_type| Awaited {
            message_id: packet.message_id,
            index: packet.index,
            ack_type,
        });
        state.received = false;
    }

    /// Raise the signal if `ack` answers the awaited packet.
    pub fn offer(&self, ack: &Packet) -> bool {
        let mut state = lock(&self.state);
        let matched = state.awaited.is_some_and(|awaited| {
            awaited.message_id == ack.message_id
                && awaited.index == ack.index
                && (ack.packet_type == awaited.ack_type || ack.packet_type == PacketType::Ack)
        });
        if matched {
            state.received = true;
            self.raised.notify_all();
        }
        matched
    }

    /// Consume a raised signal.
    pub fn take(&self) -> bool {
        let mut state = lock(&self.state);
        if state.received {
            *state = AckState::default();
            true
        } else {
            false
        }
    }

    /// Block up to `timeout` for the signal. Does not consume it.
    pub fn wait(&self, timeout: Duration) -> bool {
        let state = lock(&self.state);
        match self
            .raised
            .wait_timeout_while(state, timeout, |state| !state.received)
        {
            Ok((state, _)) => state.received,
            Err(poisoned) => poisoned.into_inner().0.received,
        }
    }

    /// Stop waiting for anything.
    pub fn clear(&self) {
        *lock(&self.state) = AckState::default();
    }
}

/// Gate plus ACK signal, shared by every role of one bridge.
pub struct Coordinator {
    gate: Gate,
    ack: AckSignal,
    published: Arc<Mutex<CopylineStatus>>,
}

impl Coordinator {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let published = Arc::new(Mutex::new(CopylineStatus::offline()));
        Self {
            gate: Gate {
                busy: Mutex::new(false),
                released: Condvar::new(),
                channel: Mutex::new(Channel::new(transport, Arc::clone(&published))),
            },
            ack: AckSignal::default(),
            published,
        }
    }

    /// Acquire exclusive hardware access.
    pub fn acquire(&self, token: &CancellationToken) -> Result<GateGuard<'_>> {
        self.gate.acquire(token)
    }

    pub fn ack(&self) -> &AckSignal {
        &self.ack
    }

    /// Latest published status, readable without the gate.
    pub fn status(&self) -> CopylineStatus {
        *lock(&self.published)
    }
}

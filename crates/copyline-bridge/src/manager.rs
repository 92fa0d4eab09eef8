use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use copyline_frame::{
    command_packet, split_with_id, MessageId, Packet, PacketOwner, PacketType, ProtocolError,
    ReceivedMessage, CONTENT_MAX_LEN,
};
use copyline_transport::Transport;
use tokio_util::sync::CancellationToken;

use crate::command::{CommandExecutor, CommandFormat, ShellExecutor};
use crate::config::{BridgeConfig, BridgeMode};
use crate::context::{BridgeContext, BridgeFault};
use crate::coordinator::lock;
use crate::error::{BridgeError, Result};
use crate::handler::{PacketHandler, RegisterMode};
use crate::status::{CopylineStatus, LinkState};
use crate::{monitor, receiver, sender};

const SUPERVISOR_POLL: Duration = Duration::from_millis(50);

/// One generation of background loops.
struct Session {
    token: CancellationToken,
    generation: u64,
    loops: Vec<JoinHandle<()>>,
}

impl Session {
    fn start(ctx: &Arc<BridgeContext>, root: &CancellationToken) -> Result<Self> {
        let token = root.child_token();
        let generation = ctx.begin_session(token.clone());
        let mut session = Session {
            token,
            generation,
            loops: Vec::with_capacity(2),
        };
        session.loops.push(receiver::spawn(
            Arc::clone(ctx),
            session.token.clone(),
            generation,
        )?);
        session.loops.push(monitor::spawn(
            Arc::clone(ctx),
            session.token.clone(),
            generation,
        )?);
        tracing::debug!(generation, "session started");
        Ok(session)
    }

    fn shutdown(mut self, ctx: &BridgeContext) {
        self.token.cancel();
        for handle in self.loops.drain(..) {
            if handle.join().is_err() {
                tracing::error!(generation = self.generation, "bridge loop panicked");
            }
        }
        ctx.end_session();
        tracing::debug!(generation = self.generation, "session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn supervise(
    ctx: Arc<BridgeContext>,
    root: CancellationToken,
    faults: mpsc::Receiver<BridgeFault>,
    mut session: Session,
) {
    loop {
        if root.is_cancelled() {
            break;
        }
        let fault = match faults.recv_timeout(SUPERVISOR_POLL) {
            Ok(fault) => fault,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if fault.generation != session.generation {
            tracing::debug!(generation = fault.generation, "ignoring fault from old session");
            continue;
        }

        tracing::error!(generation = fault.generation, reason = %fault.reason, "hardware fault, tearing down bridge");
        session.shutdown(&ctx);
        if !ctx.config.restart_on_fault || root.is_cancelled() {
            ctx.set_running(false);
            return;
        }
        session = match Session::start(&ctx, &root) {
            Ok(next) => next,
            Err(err) => {
                tracing::error!(error = %err, "bridge restart failed");
                ctx.set_running(false);
                return;
            }
        };
        let restarts = ctx.record_restart();
        tracing::info!(restarts, generation = session.generation, "bridge restarted");
    }
    session.shutdown(&ctx);
}

struct Running {
    root: CancellationToken,
    supervisor: JoinHandle<()>,
}

/// Owns one copy-line bridge: the transport, the coordinator and the
/// Receiver/Monitor loops, restarting all of them after hardware faults.
///
/// ```no_run
/// use copyline_bridge::{BridgeConfig, Manager};
/// use copyline_frame::PacketOwner;
/// use copyline_transport::LoopbackTransport;
///
/// let (a, _b) = LoopbackTransport::pair();
/// let manager = Manager::new(a, BridgeConfig::default());
/// manager.start()?;
/// let id = manager.send_big_data(PacketOwner::OuterNet, b"hello")?;
/// println!("sent {id}");
/// # Ok::<(), copyline_bridge::BridgeError>(())
/// ```
pub struct Manager {
    ctx: Arc<BridgeContext>,
    inbox: Mutex<mpsc::Receiver<ReceivedMessage>>,
    running: Mutex<Option<Running>>,
}

impl Manager {
    /// Create a bridge that executes commands through the platform shell.
    pub fn new(transport: impl Transport + 'static, config: BridgeConfig) -> Self {
        Self::with_executor(transport, Arc::new(ShellExecutor), config)
    }

    /// Create a bridge with a custom command executor.
    pub fn with_executor(
        transport: impl Transport + 'static,
        executor: Arc<dyn CommandExecutor>,
        config: BridgeConfig,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::sync_channel(config.inbox_capacity());
        Self {
            ctx: Arc::new(BridgeContext::new(
                Box::new(transport),
                executor,
                config,
                inbox_tx,
            )),
            inbox: Mutex::new(inbox_rx),
            running: Mutex::new(None),
        }
    }

    /// Start the Receiver, Monitor and Supervisor threads. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut running = lock(&self.running);
        if running.is_some() {
            if self.ctx.is_running() {
                return Ok(());
            }
            // Stopped itself after a fault with restarts disabled.
            if let Some(stale) = running.take() {
                Self::join(stale);
            }
        }

        let root = CancellationToken::new();
        let (fault_tx, fault_rx) = mpsc::channel();
        self.ctx.set_fault_sender(Some(fault_tx));
        self.ctx.set_running(true);

        let session = match Session::start(&self.ctx, &root) {
            Ok(session) => session,
            Err(err) => {
                root.cancel();
                self.ctx.set_running(false);
                self.ctx.end_session();
                return Err(err);
            }
        };
        let ctx = Arc::clone(&self.ctx);
        let supervisor_root = root.clone();
        let supervisor = thread::Builder::new()
            .name("copyline-supervisor".into())
            .spawn(move || supervise(ctx, supervisor_root, fault_rx, session));
        let supervisor = match supervisor {
            Ok(handle) => handle,
            Err(err) => {
                // The closure (and its session) was dropped, which cancels the loops.
                root.cancel();
                self.ctx.set_running(false);
                self.ctx.end_session();
                return Err(err.into());
            }
        };

        tracing::info!(mode = %self.current_mode(), "bridge started");
        *running = Some(Running { root, supervisor });
        Ok(())
    }

    /// Cancel every loop, wait for them, close the transport. Idempotent.
    pub fn stop(&self) {
        let running = lock(&self.running).take();
        self.ctx.set_running(false);
        if let Some(running) = running {
            Self::join(running);
            self.ctx.set_fault_sender(None);
            tracing::info!("bridge stopped");
        }
    }

    fn join(running: Running) {
        running.root.cancel();
        if running.supervisor.join().is_err() {
            tracing::error!("bridge supervisor panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running()
    }

    pub fn current_mode(&self) -> BridgeMode {
        self.ctx.mode()
    }

    pub fn set_mode(&self, mode: BridgeMode) {
        tracing::info!(%mode, "bridge mode changed");
        self.ctx.set_mode(mode);
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.ctx.config
    }

    /// Latest derived link state.
    pub fn link_state(&self) -> LinkState {
        self.ctx.coordinator.status().link
    }

    /// Latest raw and derived link status.
    pub fn status(&self) -> CopylineStatus {
        self.ctx.coordinator.status()
    }

    /// How many times the bridge restarted after a hardware fault.
    pub fn restart_count(&self) -> u64 {
        self.ctx.restarts()
    }

    /// Send `data` as one HEAD/DATA.../TAIL message and wait for every ACK.
    ///
    /// Returns the message id shared by all packets of the message.
    pub fn send_big_data(&self, owner: PacketOwner, data: &[u8]) -> Result<MessageId> {
        if data.is_empty() {
            return Err(BridgeError::EmptyPayload);
        }
        let (token, generation) = self.ctx.session()?;

        let id = MessageId::generate();
        let packets = split_with_id(owner, data, id).map_err(|err| match err {
            ProtocolError::PayloadTooLarge(size) => BridgeError::PayloadTooLarge {
                size,
                max: u32::MAX as usize,
            },
            other => BridgeError::Protocol(other),
        })?;

        tracing::info!(
            message_id = %id,
            len = data.len(),
            packets = packets.len(),
            "sending message"
        );
        self.transmit(&packets, self.ctx.config.ack_timeout(), &token, generation)?;
        tracing::info!(message_id = %id, "message delivered");
        Ok(id)
    }

    /// Run `command` on the inside node and return its output.
    ///
    /// Only the OUTSIDE position may send commands; anywhere else this fails
    /// before anything is built or written.
    pub fn send_command(&self, command: &str) -> Result<String> {
        let mode = self.current_mode();
        if !mode.may_send_commands() {
            return Err(BridgeError::PolicyViolation(format!(
                "commands may only be sent from OUTSIDE (current mode {mode})"
            )));
        }
        let (token, generation) = self.ctx.session()?;

        let content =
            CommandFormat::new(command, self.ctx.config.command_timeout()).to_content()?;
        let size = content.len();
        let id = MessageId::generate();
        let packet = command_packet(mode.owner(), content, id).map_err(|_| {
            BridgeError::PayloadTooLarge {
                size,
                max: CONTENT_MAX_LEN,
            }
        })?;

        tracing::info!(message_id = %id, command, "sending command");
        self.ctx.pending.register(id);
        let sent = self.transmit(
            &[packet],
            self.ctx.config.command_ack_timeout(),
            &token,
            generation,
        );
        let response = self.ctx.pending.take(&id);
        sent?;

        let response = response.ok_or(BridgeError::MissingResponse(id))?;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    fn transmit(
        &self,
        packets: &[Packet],
        ack_timeout: Duration,
        token: &CancellationToken,
        generation: u64,
    ) -> Result<()> {
        let result = sender::send_message(&self.ctx, packets, ack_timeout, token);
        if let Err(err) = &result {
            if err.is_fatal() {
                tracing::error!(error = %err, "hardware fault while sending");
                self.ctx.report_fault(generation, err);
            }
        }
        result
    }

    /// Next completed inbound message, waiting up to `timeout`.
    pub fn recv_message(&self, timeout: Duration) -> Option<ReceivedMessage> {
        match lock(&self.inbox).recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Install a handler for `packet_type`.
    pub fn register_handler(
        &self,
        packet_type: PacketType,
        handler: Arc<dyn PacketHandler>,
        mode: RegisterMode,
    ) -> Result<()> {
        self.ctx.register_handler(packet_type, handler, mode)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.stop();
    }
}

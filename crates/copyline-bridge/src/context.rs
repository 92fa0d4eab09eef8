use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use copyline_frame::{PacketOwner, PacketType, ReceivedMessage, Reassembler};
use copyline_transport::Transport;
use tokio_util::sync::CancellationToken;

use crate::command::{CommandAckHandler, CommandExecutor, CommandHandler, PendingCommands};
use crate::config::{BridgeConfig, BridgeMode};
use crate::coordinator::{lock, Channel, Coordinator};
use crate::error::{BridgeError, Result};
use crate::handler::{
    AckHandler, DataHandler, HandlerRegistry, HeartbeatHandler, PacketHandler, RegisterMode,
};

const PAUSE_SLICE: Duration = Duration::from_millis(10);

/// A fatal event reported by a loop or a sender.
#[derive(Debug, Clone)]
pub(crate) struct BridgeFault {
    /// Session the fault happened in. Faults from older sessions are ignored.
    pub(crate) generation: u64,
    pub(crate) reason: String,
}

/// State shared by the Manager, its loops and caller-driven senders.
pub(crate) struct BridgeContext {
    pub(crate) coordinator: Coordinator,
    pub(crate) config: BridgeConfig,
    pub(crate) pending: Arc<PendingCommands>,
    registry: RwLock<HandlerRegistry>,
    reassembler: Arc<Mutex<Reassembler>>,
    mode: RwLock<BridgeMode>,
    running: AtomicBool,
    session: Mutex<Option<(CancellationToken, u64)>>,
    generation: AtomicU64,
    restarts: AtomicU64,
    faults: Mutex<Option<mpsc::Sender<BridgeFault>>>,
}

impl BridgeContext {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        executor: Arc<dyn CommandExecutor>,
        config: BridgeConfig,
        inbox: mpsc::SyncSender<ReceivedMessage>,
    ) -> Self {
        let reassembler = Arc::new(Mutex::new(Reassembler::new()));
        let pending = Arc::new(PendingCommands::default());

        let mut registry = HandlerRegistry::new();
        let data: Arc<dyn PacketHandler> =
            Arc::new(DataHandler::new(Arc::clone(&reassembler), inbox));
        let defaults: [(PacketType, Arc<dyn PacketHandler>); 10] = [
            (PacketType::Head, Arc::clone(&data)),
            (PacketType::Data, Arc::clone(&data)),
            (PacketType::Tail, data),
            (PacketType::Ack, Arc::new(AckHandler)),
            (PacketType::HeadAck, Arc::new(AckHandler)),
            (PacketType::DataAck, Arc::new(AckHandler)),
            (PacketType::TailAck, Arc::new(AckHandler)),
            (PacketType::Heartbeat, Arc::new(HeartbeatHandler)),
            (
                PacketType::Cmd,
                Arc::new(CommandHandler::new(executor, config.max_command_timeout())),
            ),
            (
                PacketType::CmdAck,
                Arc::new(CommandAckHandler::new(Arc::clone(&pending))),
            ),
        ];
        for (packet_type, handler) in defaults {
            // fresh registry, cannot collide
            let _ = registry.register(packet_type, handler, RegisterMode::KeepExisting);
        }

        Self {
            coordinator: Coordinator::new(transport),
            mode: RwLock::new(config.initial_mode),
            config,
            pending,
            registry: RwLock::new(registry),
            reassembler,
            running: AtomicBool::new(false),
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            faults: Mutex::new(None),
        }
    }

    pub(crate) fn mode(&self) -> BridgeMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_mode(&self, mode: BridgeMode) {
        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    pub(crate) fn owner(&self) -> PacketOwner {
        self.mode().owner()
    }

    pub(crate) fn handler(&self, packet_type: PacketType) -> Arc<dyn PacketHandler> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(packet_type)
    }

    pub(crate) fn register_handler(
        &self,
        packet_type: PacketType,
        handler: Arc<dyn PacketHandler>,
        mode: RegisterMode,
    ) -> Result<()> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(packet_type, handler, mode)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Token and generation of the live session.
    pub(crate) fn session(&self) -> Result<(CancellationToken, u64)> {
        if !self.is_running() {
            return Err(BridgeError::NotRunning);
        }
        lock(&self.session).clone().ok_or(BridgeError::NotRunning)
    }

    /// Publish a new session and return its generation.
    pub(crate) fn begin_session(&self, token: CancellationToken) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.session) = Some((token, generation));
        generation
    }

    /// Close the transport and forget all per-session protocol state.
    pub(crate) fn end_session(&self) {
        *lock(&self.session) = None;
        // Loops are joined by now; a cancelled sender releases within one read timeout.
        if let Ok(mut guard) = self.coordinator.acquire(&CancellationToken::new()) {
            guard.reset();
        }
        self.coordinator.ack().clear();
        lock(&self.reassembler).clear();
        self.pending.clear();
    }

    pub(crate) fn set_fault_sender(&self, faults: Option<mpsc::Sender<BridgeFault>>) {
        *lock(&self.faults) = faults;
    }

    pub(crate) fn report_fault(&self, generation: u64, err: &BridgeError) {
        let fault = BridgeFault {
            generation,
            reason: err.to_string(),
        };
        if let Some(faults) = lock(&self.faults).as_ref() {
            let _ = faults.send(fault);
        }
    }

    pub(crate) fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    pub(crate) fn record_restart(&self) -> u64 {
        self.restarts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drive one background role until cancelled or a fatal error.
    ///
    /// Each cycle acquires the gate, runs `cycle` on the channel, releases
    /// the gate and pauses before the next cycle.
    pub(crate) fn run_cycles<F>(
        &self,
        role: &'static str,
        token: &CancellationToken,
        generation: u64,
        mut cycle: F,
    ) where
        F: FnMut(&mut Channel) -> Result<()>,
    {
        tracing::debug!(role, generation, "loop started");
        while !token.is_cancelled() {
            let outcome = match self.coordinator.acquire(token) {
                Ok(mut guard) => cycle(&mut *guard),
                Err(_) => break,
            };
            match outcome {
                Ok(()) => {}
                Err(err) if err.is_fatal() => {
                    tracing::error!(role, generation, error = %err, "hardware fault");
                    self.report_fault(generation, &err);
                    break;
                }
                Err(err) => tracing::warn!(role, error = %err, "cycle failed"),
            }
            if pause(token, self.config.cycle_interval()) {
                break;
            }
        }
        tracing::debug!(role, generation, "loop stopped");
    }
}

/// Sleep for `duration` unless cancelled first. Returns `true` if cancelled.
pub(crate) fn pause(token: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if token.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep((deadline - now).min(PAUSE_SLICE));
    }
}

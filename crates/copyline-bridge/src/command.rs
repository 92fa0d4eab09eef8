//! Command request/response sub-protocol.
//!
//! The outside node sends one CMD packet whose content is a JSON
//! [`CommandFormat`]. The inside node executes it and answers with one
//! CMD_ACK echoing the request's message id; the CMD_ACK content is the
//! command's textual output, truncated to one packet.

use std::collections::HashMap;
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use copyline_frame::{MessageId, Packet, PacketType, CONTENT_MAX_LEN};
use serde::{Deserialize, Serialize};

use crate::coordinator::lock;
use crate::error::Result;
use crate::handler::{HandlerContext, PacketHandler};

const EXEC_POLL: Duration = Duration::from_millis(10);

/// Payload of a CMD packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFormat {
    #[serde(rename = "Command", alias = "command")]
    pub command: String,
    /// Execution timeout in milliseconds. 0 means the handler's maximum.
    #[serde(rename = "Timeout", alias = "timeout_ms")]
    pub timeout_ms: i64,
}

impl CommandFormat {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout_ms: i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// JSON encoding carried in the packet content.
    pub fn to_content(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse and validate packet content.
    pub fn from_content(content: &[u8]) -> std::result::Result<Self, ExecError> {
        let text = String::from_utf8_lossy(content);
        if text.trim().is_empty() {
            return Err(ExecError::Invalid("empty command document".into()));
        }
        let format: Self =
            serde_json::from_str(&text).map_err(|e| ExecError::Invalid(format!("json: {e}")))?;
        if format.command.trim().is_empty() {
            return Err(ExecError::Invalid("empty command".into()));
        }
        Ok(format)
    }

    /// Resolve the requested timeout against the handler's maximum.
    pub fn effective_timeout(&self, max: Duration) -> std::result::Result<Duration, ExecError> {
        let max_ms = max.as_millis();
        match self.timeout_ms {
            0 => Ok(max),
            ms if ms < 0 || ms as u128 > max_ms => Err(ExecError::Invalid(format!(
                "timeout must be within 0..={max_ms} ms, got {ms}"
            ))),
            ms => Ok(Duration::from_millis(ms as u64)),
        }
    }
}

/// Why a command produced no output.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("invalid command: {0}")]
    Invalid(String),

    #[error("failed to run command: {0}")]
    Io(#[from] std::io::Error),

    #[error("command timed out after {0:?}")]
    TimedOut(Duration),

    #[error("command failed ({status}): {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

/// Runs the command text carried by a CMD packet.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, command: &str, timeout: Duration) -> std::result::Result<String, ExecError>;
}

/// Executes through the platform shell, killing the child on timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellExecutor;

impl ShellExecutor {
    fn shell(command: &str) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        }
    }
}

// Chunks arrive until every writer of the pipe has closed it. A background
// grandchild can hold the pipe open long after the shell exits.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
    });
    rx
}

/// Gather pipe output until it closes or `deadline` passes.
fn collect(pipe: Option<mpsc::Receiver<Vec<u8>>>, deadline: Instant) -> String {
    let Some(rx) = pipe else {
        return String::new();
    };
    let mut out = Vec::new();
    loop {
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(chunk) => out.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                tracing::debug!(
                    collected = out.len(),
                    "output pipe still open at deadline, abandoning it"
                );
                break;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl CommandExecutor for ShellExecutor {
    fn execute(&self, command: &str, timeout: Duration) -> std::result::Result<String, ExecError> {
        let mut child = Self::shell(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecError::TimedOut(timeout));
            }
            thread::sleep(EXEC_POLL);
        };

        let out = collect(stdout, deadline);
        if status.success() {
            Ok(out)
        } else {
            Err(ExecError::Failed {
                status,
                stderr: collect(stderr, deadline).trim().to_string(),
            })
        }
    }
}

/// Longest prefix of `text` that fits `max` bytes on a char boundary.
pub fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Outstanding `send_command` calls, keyed by request message id.
#[derive(Debug, Default)]
pub struct PendingCommands {
    slots: Mutex<HashMap<MessageId, Option<Bytes>>>,
}

impl PendingCommands {
    pub fn register(&self, id: MessageId) {
        lock(&self.slots).insert(id, None);
    }

    /// Store a response. Returns `false` for ids nobody is waiting on.
    pub fn complete(&self, id: MessageId, response: Bytes) -> bool {
        match lock(&self.slots).get_mut(&id) {
            Some(slot) => {
                *slot = Some(response);
                true
            }
            None => false,
        }
    }

    /// Remove the entry, returning its response if one arrived.
    pub fn take(&self, id: &MessageId) -> Option<Bytes> {
        lock(&self.slots).remove(id).flatten()
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.slots).clear();
    }
}

/// CMD: execute and reply CMD_ACK with the (possibly error) text.
pub struct CommandHandler {
    executor: Arc<dyn CommandExecutor>,
    max_timeout: Duration,
}

impl CommandHandler {
    pub fn new(executor: Arc<dyn CommandExecutor>, max_timeout: Duration) -> Self {
        Self {
            executor,
            max_timeout,
        }
    }

    fn run(&self, format: &CommandFormat) -> String {
        let result = format
            .effective_timeout(self.max_timeout)
            .and_then(|timeout| self.executor.execute(&format.command, timeout));
        match result {
            Ok(output) => {
                tracing::info!(command = %format.command, len = output.len(), "command executed");
                output
            }
            Err(err) => {
                tracing::warn!(command = %format.command, error = %err, "command failed");
                err.to_string()
            }
        }
    }
}

impl PacketHandler for CommandHandler {
    fn handle(&self, packet: &Packet, ctx: &mut HandlerContext<'_>) -> Result<()> {
        let output = match CommandFormat::from_content(&packet.content) {
            Ok(format) => self.run(&format),
            Err(err) => {
                tracing::warn!(message_id = %packet.message_id, error = %err, "rejecting command");
                err.to_string()
            }
        };

        let content = Bytes::copy_from_slice(truncate_utf8(&output, CONTENT_MAX_LEN).as_bytes());
        let reply = Packet::new(
            ctx.owner(),
            PacketType::CmdAck,
            packet.message_id,
            packet.total_count,
            packet.index,
            content.len() as u32,
            content,
        );
        ctx.reply(&reply)
    }
}

/// CMD_ACK: hand the response to the waiting `send_command` call.
pub struct CommandAckHandler {
    pending: Arc<PendingCommands>,
}

impl CommandAckHandler {
    pub fn new(pending: Arc<PendingCommands>) -> Self {
        Self { pending }
    }
}

impl PacketHandler for CommandAckHandler {
    fn handle(&self, packet: &Packet, _ctx: &mut HandlerContext<'_>) -> Result<()> {
        if !self.pending.complete(packet.message_id, packet.content.clone()) {
            tracing::warn!(message_id = %packet.message_id, "unsolicited command response");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use copyline_frame::{command_packet, decode_packet, PacketOwner};
    use copyline_transport::{LoopbackTransport, Transport};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::coordinator::Coordinator;

    struct Echo;

    impl CommandExecutor for Echo {
        fn execute(&self, command: &str, timeout: Duration) -> std::result::Result<String, ExecError> {
            Ok(format!("{command} ({}ms)", timeout.as_millis()))
        }
    }

    struct Verbose;

    impl CommandExecutor for Verbose {
        fn execute(&self, _command: &str, _timeout: Duration) -> std::result::Result<String, ExecError> {
            Ok("é".repeat(CONTENT_MAX_LEN))
        }
    }

    fn run_handler(executor: Arc<dyn CommandExecutor>, content: &[u8]) -> (Packet, Packet) {
        let (a, mut b) = LoopbackTransport::pair();
        b.open().unwrap();
        let coordinator = Coordinator::new(Box::new(a));
        let mut guard = coordinator.acquire(&CancellationToken::new()).unwrap();
        guard.refresh().unwrap();
        let mut ctx = HandlerContext::new(&mut guard, PacketOwner::IntraNet);

        let request = command_packet(
            PacketOwner::OuterNet,
            Bytes::copy_from_slice(content),
            MessageId::generate(),
        )
        .unwrap();
        CommandHandler::new(executor, Duration::from_secs(60))
            .handle(&request, &mut ctx)
            .unwrap();

        let mut buf = [0u8; 1100];
        let n = b.read(&mut buf).unwrap();
        (request, decode_packet(&buf[..n]).unwrap())
    }

    #[test]
    fn format_uses_pascal_case_keys() {
        let format = CommandFormat::new("dir", Duration::from_secs(10));
        let json = String::from_utf8(format.to_content().unwrap().to_vec()).unwrap();
        assert_eq!(json, r#"{"Command":"dir","Timeout":10000}"#);

        let parsed = CommandFormat::from_content(br#"{"command":"ls","timeout_ms":5}"#).unwrap();
        assert_eq!(parsed.command, "ls");
        assert_eq!(parsed.timeout_ms, 5);
    }

    #[test]
    fn rejects_empty_and_malformed_documents() {
        assert!(CommandFormat::from_content(b"  ").is_err());
        assert!(CommandFormat::from_content(b"{oops").is_err());
        assert!(CommandFormat::from_content(br#"{"Command":" ","Timeout":1}"#).is_err());
    }

    #[test]
    fn timeout_resolution() {
        let max = Duration::from_secs(60);
        let fmt = |ms| CommandFormat {
            command: "x".into(),
            timeout_ms: ms,
        };
        assert_eq!(fmt(0).effective_timeout(max).unwrap(), max);
        assert_eq!(
            fmt(1500).effective_timeout(max).unwrap(),
            Duration::from_millis(1500)
        );
        assert!(fmt(-1).effective_timeout(max).is_err());
        assert!(fmt(60_001).effective_timeout(max).is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8("short", 10), "short");
        assert_eq!(truncate_utf8("abcdef", 3), "abc");
        // 'é' is two bytes
        assert_eq!(truncate_utf8("ééé", 3), "é");
    }

    #[test]
    fn pending_commands_lifecycle() {
        let pending = PendingCommands::default();
        let id = MessageId::generate();
        assert!(!pending.complete(id, Bytes::from_static(b"early")));

        pending.register(id);
        assert_eq!(pending.len(), 1);
        assert!(pending.complete(id, Bytes::from_static(b"done")));
        assert_eq!(pending.take(&id).unwrap().as_ref(), b"done");
        assert!(pending.is_empty());

        pending.register(id);
        assert!(pending.take(&id).is_none());
    }

    #[test]
    fn handler_replies_with_output_and_same_id() {
        let (request, reply) = run_handler(Arc::new(Echo), br#"{"Command":"dir","Timeout":250}"#);
        assert_eq!(reply.packet_type, PacketType::CmdAck);
        assert_eq!(reply.message_id, request.message_id);
        assert_eq!(reply.owner, PacketOwner::IntraNet);
        assert_eq!(reply.content.as_ref(), b"dir (250ms)");
    }

    #[test]
    fn handler_truncates_long_output() {
        let (_, reply) = run_handler(Arc::new(Verbose), br#"{"Command":"cat big","Timeout":0}"#);
        assert!(reply.content_length() <= CONTENT_MAX_LEN);
        assert!(std::str::from_utf8(&reply.content).is_ok());
    }

    #[test]
    fn handler_reports_invalid_requests_in_band() {
        let (request, reply) = run_handler(Arc::new(Echo), br#"{"Command":"dir","Timeout":-5}"#);
        assert_eq!(reply.message_id, request.message_id);
        let text = std::str::from_utf8(&reply.content).unwrap();
        assert!(text.starts_with("invalid command"), "{text}");
    }

    #[test]
    fn ack_handler_completes_pending() {
        let pending = Arc::new(PendingCommands::default());
        let id = MessageId::generate();
        pending.register(id);

        let (a, _b) = LoopbackTransport::pair();
        let coordinator = Coordinator::new(Box::new(a));
        let mut guard = coordinator.acquire(&CancellationToken::new()).unwrap();
        let mut ctx = HandlerContext::new(&mut guard, PacketOwner::OuterNet);

        let mut ack = command_packet(PacketOwner::IntraNet, Bytes::from_static(b"ok"), id).unwrap();
        ack.packet_type = PacketType::CmdAck;
        CommandAckHandler::new(Arc::clone(&pending))
            .handle(&ack, &mut ctx)
            .unwrap();
        assert_eq!(pending.take(&id).unwrap().as_ref(), b"ok");
    }

    #[cfg(unix)]
    #[test]
    fn shell_executor_captures_stdout() {
        let out = ShellExecutor
            .execute("echo copyline", Duration::from_secs(5))
            .unwrap();
        assert_eq!(out.trim(), "copyline");
    }

    #[cfg(unix)]
    #[test]
    fn shell_executor_reports_failure() {
        let err = ShellExecutor
            .execute("echo oops >&2; exit 3", Duration::from_secs(5))
            .unwrap_err();
        match err {
            ExecError::Failed { status, stderr } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn background_child_does_not_hold_the_executor() {
        let started = Instant::now();
        let out = ShellExecutor
            .execute("sleep 5 & echo hi", Duration::from_secs(1))
            .unwrap();
        assert_eq!(out.trim(), "hi");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn shell_executor_kills_on_timeout() {
        let started = Instant::now();
        let err = ShellExecutor
            .execute("exec sleep 5", Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, ExecError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}

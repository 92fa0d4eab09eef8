use std::fmt;
use std::path::Path;
use std::time::Duration;

use copyline_frame::PacketOwner;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Which side of the air gap this node sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Position {
    Inside,
    Outside,
}

/// Preferred transfer direction. Informational; both directions always work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Upload,
    Download,
}

/// Current operating mode of a bridge node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeMode {
    pub position: Position,
    pub direction: Direction,
}

impl BridgeMode {
    pub const OUTSIDE: BridgeMode = BridgeMode {
        position: Position::Outside,
        direction: Direction::Upload,
    };

    pub const INSIDE: BridgeMode = BridgeMode {
        position: Position::Inside,
        direction: Direction::Download,
    };

    /// Owner stamped on packets this node originates.
    pub fn owner(&self) -> PacketOwner {
        match self.position {
            Position::Outside => PacketOwner::OuterNet,
            Position::Inside => PacketOwner::IntraNet,
        }
    }

    /// Only the outside node may originate commands.
    pub fn may_send_commands(&self) -> bool {
        self.position == Position::Outside
    }
}

impl Default for BridgeMode {
    fn default() -> Self {
        Self::OUTSIDE
    }
}

impl fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let position = match self.position {
            Position::Inside => "INSIDE",
            Position::Outside => "OUTSIDE",
        };
        let direction = match self.direction {
            Direction::Upload => "UPLOAD",
            Direction::Download => "DOWNLOAD",
        };
        write!(f, "{position}/{direction}")
    }
}

/// Bridge tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long the sender waits for each ACK.
    pub ack_timeout_ms: u64,
    /// Pause between Receiver/Monitor cycles.
    pub cycle_interval_ms: u64,
    /// Execution timeout placed in outgoing commands.
    pub command_timeout_ms: u64,
    /// Largest execution timeout the command handler accepts.
    pub max_command_timeout_ms: u64,
    /// Receive buffer size; never smaller than one maximum frame.
    pub read_buffer_size: usize,
    /// Received messages held until `recv_message` collects them.
    pub inbox_capacity: usize,
    /// Restart the session after a hardware fault.
    pub restart_on_fault: bool,
    /// Mode the Manager starts in.
    pub initial_mode: BridgeMode,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 5_000,
            cycle_interval_ms: 100,
            command_timeout_ms: 10_000,
            max_command_timeout_ms: 60_000,
            read_buffer_size: 4_096,
            inbox_capacity: 64,
            restart_on_fault: true,
            initial_mode: BridgeMode::OUTSIDE,
        }
    }
}

impl BridgeConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Parse a JSON config document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ack_timeout_ms == 0 {
            return Err(BridgeError::Config("ack_timeout_ms must be > 0".into()));
        }
        if self.command_timeout_ms > self.max_command_timeout_ms {
            return Err(BridgeError::Config(format!(
                "command_timeout_ms ({}) exceeds max_command_timeout_ms ({})",
                self.command_timeout_ms, self.max_command_timeout_ms
            )));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn max_command_timeout(&self) -> Duration {
        Duration::from_millis(self.max_command_timeout_ms)
    }

    /// ACK wait for a CMD packet: its execution time plus the normal ACK budget.
    pub fn command_ack_timeout(&self) -> Duration {
        self.command_timeout() + self.ack_timeout()
    }

    pub fn inbox_capacity(&self) -> usize {
        self.inbox_capacity.max(1)
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.max(copyline_frame::MAX_FRAME_SIZE + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.ack_timeout(), Duration::from_secs(5));
        assert_eq!(config.initial_mode, BridgeMode::OUTSIDE);
        assert!(config.restart_on_fault);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = BridgeConfig::from_json_str(
            r#"{"ack_timeout_ms": 250, "initial_mode": {"position": "INSIDE", "direction": "DOWNLOAD"}}"#,
        )
        .unwrap();
        assert_eq!(config.ack_timeout_ms, 250);
        assert_eq!(config.initial_mode, BridgeMode::INSIDE);
        assert_eq!(config.cycle_interval_ms, 100);
    }

    #[test]
    fn rejects_inconsistent_timeouts() {
        let err = BridgeConfig::from_json_str(
            r#"{"command_timeout_ms": 90000, "max_command_timeout_ms": 60000}"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), 1212);

        let err = BridgeConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, BridgeError::Json(_)));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = BridgeConfig::from_json_file("/nonexistent/copyline.json").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn read_buffer_holds_a_full_frame() {
        let config = BridgeConfig {
            read_buffer_size: 16,
            ..BridgeConfig::default()
        };
        assert!(config.read_buffer_size() > copyline_frame::MAX_FRAME_SIZE);
    }

    #[test]
    fn inbox_holds_at_least_one_message() {
        let config = BridgeConfig {
            inbox_capacity: 0,
            ..BridgeConfig::default()
        };
        assert_eq!(config.inbox_capacity(), 1);
        assert_eq!(BridgeConfig::default().inbox_capacity(), 64);
    }

    #[test]
    fn mode_owner_and_policy() {
        assert_eq!(BridgeMode::OUTSIDE.owner(), PacketOwner::OuterNet);
        assert_eq!(BridgeMode::INSIDE.owner(), PacketOwner::IntraNet);
        assert!(BridgeMode::OUTSIDE.may_send_commands());
        assert!(!BridgeMode::INSIDE.may_send_commands());
        assert_eq!(BridgeMode::INSIDE.to_string(), "INSIDE/DOWNLOAD");
    }
}

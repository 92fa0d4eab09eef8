use std::time::Duration;

use copyline_frame::{MessageId, PacketType, ProtocolError};
use copyline_transport::TransportError;

/// Errors returned by bridge operations.
///
/// Every variant carries a stable numeric [`code`](BridgeError::code) so that
/// callers outside Rust can report failures without matching on text.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No matching ACK arrived in time. Remaining packets were not sent.
    #[error("no ACK for message {message_id} packet {index} within {timeout:?}")]
    AckTimeout {
        message_id: MessageId,
        index: u32,
        timeout: Duration,
    },

    /// `send_big_data` was called with nothing to send.
    #[error("payload is empty")]
    EmptyPayload,

    /// The link is OFFLINE or the device refused the write.
    #[error("copy-line unavailable: {0}")]
    DeviceUnavailable(String),

    /// Hardware fault at the transport boundary. Fatal to the session.
    #[error("hardware fault: {0}")]
    Hardware(#[source] TransportError),

    /// The bridge is not started.
    #[error("bridge is not running")]
    NotRunning,

    /// The operation was cancelled by shutdown or restart.
    #[error("operation cancelled")]
    Cancelled,

    /// Frame-level failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Payload does not fit the packet format.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The current mode forbids the operation.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// A command was acknowledged without a response body.
    #[error("no response for command {0}")]
    MissingResponse(MessageId),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A handler is already registered and overwriting was not allowed.
    #[error("handler already registered for {0}")]
    HandlerExists(PacketType),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// A bridge thread could not be spawned.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Stable numeric error code.
    pub fn code(&self) -> u16 {
        match self {
            BridgeError::AckTimeout { .. } => 1200,
            BridgeError::EmptyPayload => 1201,
            BridgeError::DeviceUnavailable(_) => 1202,
            BridgeError::Hardware(_) => 1203,
            BridgeError::NotRunning => 1204,
            BridgeError::Cancelled => 1205,
            BridgeError::Protocol(_) => 1206,
            BridgeError::PayloadTooLarge { .. } => 1207,
            BridgeError::PolicyViolation(_) => 1208,
            BridgeError::MissingResponse(_) => 1209,
            BridgeError::Json(_) => 1210,
            BridgeError::HandlerExists(_) => 1211,
            BridgeError::Config(_) => 1212,
            BridgeError::Io(_) => 1213,
        }
    }

    /// Whether the session must be torn down and restarted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Hardware(_))
    }

    /// Whether this is a timeout-classified failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::AckTimeout { .. })
    }
}

impl From<TransportError> for BridgeError {
    fn from(err: TransportError) -> Self {
        if err.is_fatal() {
            BridgeError::Hardware(err)
        } else {
            BridgeError::DeviceUnavailable(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

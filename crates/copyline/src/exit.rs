use std::fmt;
use std::io;

use copyline_bridge::BridgeError;
use copyline_frame::ProtocolError;
use copyline_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const CONFIG_INVALID: i32 = 78;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Transfer(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn protocol_error(context: &str, err: ProtocolError) -> CliError {
    match err {
        ProtocolError::PayloadTooLarge(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn bridge_error(context: &str, err: BridgeError) -> CliError {
    match err {
        BridgeError::AckTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        BridgeError::Hardware(err) => transport_error(context, err),
        BridgeError::DeviceUnavailable(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        BridgeError::Protocol(err) => protocol_error(context, err),
        BridgeError::EmptyPayload
        | BridgeError::PayloadTooLarge { .. }
        | BridgeError::PolicyViolation(_) => CliError::new(USAGE, format!("{context}: {err}")),
        BridgeError::Config(_) | BridgeError::Json(_) => {
            CliError::new(CONFIG_INVALID, format!("{context}: {err}"))
        }
        BridgeError::Io(source) => io_error(context, source),
        BridgeError::NotRunning | BridgeError::Cancelled | BridgeError::MissingResponse(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use copyline_frame::MessageId;

    use super::*;

    #[test]
    fn ack_timeout_maps_to_timeout() {
        let err = BridgeError::AckTimeout {
            message_id: MessageId::default(),
            index: 2,
            timeout: Duration::from_millis(100),
        };
        assert_eq!(bridge_error("send", err).code, TIMEOUT);
    }

    #[test]
    fn policy_violation_is_a_usage_error() {
        let err = bridge_error("command", BridgeError::PolicyViolation("inside".into()));
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("command: "));
    }

    #[test]
    fn bad_frames_are_invalid_data() {
        let err = protocol_error(
            "inspect",
            ProtocolError::Truncated { len: 3, min: 55 },
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn hardware_fault_is_a_transport_error() {
        let err = bridge_error(
            "send",
            BridgeError::Hardware(TransportError::Fault("unplugged".into())),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}

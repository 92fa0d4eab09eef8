/// Errors that can occur in copy-line transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No matching device is attached.
    #[error("copy-line device not found (vid 0x{vendor_id:04X}, pid 0x{product_id:04X})")]
    NotFound { vendor_id: u16, product_id: u16 },

    /// The device was found but could not be opened.
    #[error("failed to open copy-line device: {0}")]
    Open(String),

    /// Claiming the bulk interface failed.
    #[error("failed to claim interface {interface}: {reason}")]
    Claim { interface: u8, reason: String },

    /// A bulk transfer or control transfer failed at the hardware boundary.
    #[error("transfer failed: {0}")]
    Transfer(#[from] std::io::Error),

    /// The data path is broken and the device handle can no longer be trusted.
    #[error("hardware fault: {0}")]
    Fault(String),

    /// The transport was used before `open` or after `close`.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether this error invalidates the whole bridge session.
    ///
    /// Fatal errors are hardware faults: the Manager tears the session down
    /// and reopens the transport. Everything else leaves the link OFFLINE
    /// until the next status refresh succeeds.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Fault(_) | TransportError::Claim { .. } | TransportError::Transfer(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

use std::fmt;

/// Static hardware descriptor of a copy-line chip.
///
/// Populated once when the device is opened; the endpoint and interface
/// fields are only trustworthy when `from_device` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopylineInfo {
    /// Chip name, e.g. `PL27A7`.
    pub name: &'static str,
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// Bulk IN endpoint address.
    pub bulk_in: u8,
    /// Bulk OUT endpoint address.
    pub bulk_out: u8,
    /// Claimed bulk interface number.
    pub interface: u8,
    /// Whether the endpoint data was read from the attached device.
    pub from_device: bool,
}

/// Prolific PL25A1 USB 3.0 bridge.
pub const PL25A1: CopylineInfo = CopylineInfo {
    name: "PL25A1",
    vendor_id: 0x067B,
    product_id: 0x25A1,
    bulk_in: 0x81,
    bulk_out: 0x02,
    interface: 0,
    from_device: false,
};

/// Prolific PL27A7 USB 3.0 bridge.
pub const PL27A7: CopylineInfo = CopylineInfo {
    name: "PL27A7",
    vendor_id: 0x067B,
    product_id: 0x27A7,
    bulk_in: 0x81,
    bulk_out: 0x02,
    interface: 0,
    from_device: false,
};

impl fmt::Display for CopylineInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:04X}:0x{:04X}) in=0x{:02X} out=0x{:02X} if={}",
            self.name, self.vendor_id, self.product_id, self.bulk_in, self.bulk_out, self.interface
        )
    }
}

const SUSPENDED: u8 = 0b001;
const ATTACHED: u8 = 0b010;
const SUPER_SPEED: u8 = 0b100;

/// Raw attach/suspend/speed bits reported by the copy-line status query.
///
/// Status word layout (little-endian `u16`): the low byte describes the local
/// side, the high byte the remote side. Within each byte bit 0 is
/// "suspended", bit 1 is "attached" and bit 2 is "super-speed".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkRawState {
    pub local_attached: bool,
    pub local_suspended: bool,
    pub local_super_speed: bool,
    pub remote_attached: bool,
    pub remote_suspended: bool,
    pub remote_super_speed: bool,
}

impl LinkRawState {
    /// Both ends plugged in and awake.
    pub const BOTH_ATTACHED: LinkRawState = LinkRawState {
        local_attached: true,
        local_suspended: false,
        local_super_speed: true,
        remote_attached: true,
        remote_suspended: false,
        remote_super_speed: true,
    };

    /// Decode the 2-byte vendor status word.
    pub fn from_status_word(word: u16) -> Self {
        let [local, remote] = word.to_le_bytes();
        Self {
            local_attached: local & ATTACHED != 0,
            local_suspended: local & SUSPENDED != 0,
            local_super_speed: local & SUPER_SPEED != 0,
            remote_attached: remote & ATTACHED != 0,
            remote_suspended: remote & SUSPENDED != 0,
            remote_super_speed: remote & SUPER_SPEED != 0,
        }
    }

    /// Encode back into the vendor status word.
    pub fn to_status_word(self) -> u16 {
        let side = |attached: bool, suspended: bool, speed: bool| -> u8 {
            let mut bits = 0;
            if suspended {
                bits |= SUSPENDED;
            }
            if attached {
                bits |= ATTACHED;
            }
            if speed {
                bits |= SUPER_SPEED;
            }
            bits
        };
        u16::from_le_bytes([
            side(
                self.local_attached,
                self.local_suspended,
                self.local_super_speed,
            ),
            side(
                self.remote_attached,
                self.remote_suspended,
                self.remote_super_speed,
            ),
        ])
    }
}

//! Link status derivation.
//!
//! The link is ONLINE exactly when both ends of the cable report attached.
//! Every refresh recomputes from the latest raw snapshot; no history is kept.

use std::fmt;

use copyline_transport::LinkRawState;
use serde::Serialize;

/// Derived realtime link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkState {
    Online,
    #[default]
    Offline,
}

impl LinkState {
    /// ONLINE iff both ends are attached.
    pub fn derive(local_attached: bool, remote_attached: bool) -> Self {
        if local_attached && remote_attached {
            LinkState::Online
        } else {
            LinkState::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == LinkState::Online
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Online => f.write_str("ONLINE"),
            LinkState::Offline => f.write_str("OFFLINE"),
        }
    }
}

/// Latest raw snapshot plus its derived state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopylineStatus {
    pub raw: LinkRawState,
    pub link: LinkState,
}

impl CopylineStatus {
    pub fn from_raw(raw: LinkRawState) -> Self {
        Self {
            raw,
            link: LinkState::derive(raw.local_attached, raw.remote_attached),
        }
    }

    /// Status used after a failed refresh.
    pub fn offline() -> Self {
        Self::default()
    }
}

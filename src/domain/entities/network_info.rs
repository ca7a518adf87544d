//! Snapshot of the device's network state.

use serde::{Deserialize, Serialize};

/// Kind of active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Wimax,
    Ethernet,
    Mobile,
    Other,
}

/// Cellular technology, meaningful when the connection is [`ConnectionType::Mobile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MobileSubtype {
    Lte,
    Hspap,
    Ehrpd,
    Umts,
    Cdma,
    Evdo0,
    EvdoA,
    EvdoB,
    Gprs,
    Edge,
    Unknown,
}

/// Network state as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub connected: bool,
    pub connection_type: ConnectionType,
    pub subtype: Option<MobileSubtype>,
}

impl NetworkInfo {
    /// A connected network of the given type.
    #[must_use]
    pub const fn connected(connection_type: ConnectionType) -> Self {
        Self {
            connected: true,
            connection_type,
            subtype: None,
        }
    }

    /// A connected mobile network with the given technology.
    #[must_use]
    pub const fn mobile(subtype: MobileSubtype) -> Self {
        Self {
            connected: true,
            connection_type: ConnectionType::Mobile,
            subtype: Some(subtype),
        }
    }

    /// No connectivity.
    #[must_use]
    pub const fn disconnected() -> Self {
        Self {
            connected: false,
            connection_type: ConnectionType::Other,
            subtype: None,
        }
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }
}

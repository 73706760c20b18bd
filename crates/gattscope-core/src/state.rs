//! Observable connection state.

use serde::{Deserialize, Serialize};

use gattscope_types::{DeviceInfo, ServiceInfo};

/// Lifecycle of the manager's GATT session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Nothing has been connected yet.
    #[default]
    Idle,
    /// A GATT session is being opened.
    Connecting,
    /// The session is open; services have not been enumerated.
    Connected,
    /// The session is open and the service list is populated.
    ServicesDiscovered,
    /// A session existed and has been closed.
    Disconnected,
}

impl ConnectionStatus {
    /// Whether a GATT session is open.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::ServicesDiscovered)
    }
}

/// Which view a front end should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Scan and device selection.
    Landing,
    /// Services and characteristics of the connected device.
    Dashboard,
}

/// Snapshot of everything the connection manager exposes to front ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// A device request is in progress. Independent of `status`.
    pub scanning: bool,
    /// The current (or last selected) device.
    pub device: Option<DeviceInfo>,
    /// Services from the last discovery on the current session.
    pub services: Vec<ServiceInfo>,
    /// Message of the most recent failure, if not cleared since.
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// The view to show for this state; leaves the dashboard as soon as the
    /// session closes.
    pub fn route(&self) -> Route {
        if self.is_connected() {
            Route::Dashboard
        } else {
            Route::Landing
        }
    }

    /// Total number of characteristics across discovered services.
    pub fn characteristic_count(&self) -> usize {
        self.services.iter().map(|s| s.characteristics.len()).sum()
    }
}

//! Error types for gattscope-core.
//!
//! Every failure that reaches the [`ConnectionManager`](crate::ConnectionManager)
//! is both returned to the caller and copied, as its display string, into the
//! manager's error slot. The display strings are therefore written for end
//! users: the two host conditions a user can cause directly (cancelling the
//! device chooser and refusing Bluetooth permission) have fixed messages.
//!
//! Nothing in this crate retries. Every error is terminal for the operation
//! that produced it and the user has to start the operation again.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use gattscope_types::uuid::format_uuid;

/// Errors that can occur while inspecting a BLE device.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the native stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(btleplug::Error),

    /// The device chooser was dismissed or nothing matched the request.
    #[error("No device selected")]
    DeviceNotSelected,

    /// The host refused access to Bluetooth.
    #[error("Bluetooth access denied")]
    AccessDenied,

    /// The selected device does not expose a GATT server.
    #[error("Device {device_id} does not support GATT connections")]
    GattUnsupported {
        /// Host identifier of the device.
        device_id: String,
    },

    /// Operation attempted while not connected to a device.
    #[error("Not connected to device")]
    NotConnected,

    /// The service was not part of the last discovery.
    #[error("Service not found: {}", format_uuid(.uuid))]
    ServiceNotFound {
        /// The service that was looked up.
        uuid: Uuid,
    },

    /// The characteristic was not part of the last discovery.
    #[error("Characteristic {} not found in service {}", format_uuid(.uuid), format_uuid(.service))]
    CharacteristicNotFound {
        /// The owning service.
        service: Uuid,
        /// The characteristic that was looked up.
        uuid: Uuid,
    },

    /// The characteristic does not advertise the requested capability.
    #[error("Characteristic {} does not support {operation}", format_uuid(.uuid))]
    NotSupported {
        /// The characteristic.
        uuid: Uuid,
        /// The operation that was attempted ("read", "write", "notifications").
        operation: &'static str,
    },

    /// Notifications were already started for the characteristic.
    #[error("Notifications already active for {}", format_uuid(.uuid))]
    NotificationsAlreadyActive {
        /// The characteristic.
        uuid: Uuid,
    },

    /// Notifications were not started for the characteristic.
    #[error("Notifications not active for {}", format_uuid(.uuid))]
    NotificationsNotActive {
        /// The characteristic.
        uuid: Uuid,
    },

    /// A host operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The device request options were rejected before reaching the host.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Failure reported by the host as a plain message.
    #[error("{0}")]
    Host(String),

    /// User input could not be parsed.
    #[error(transparent)]
    Parse(#[from] gattscope_types::ParseError),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a host error from a message.
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Whether the error means the user backed out of the device chooser.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::DeviceNotSelected)
    }
}

impl From<btleplug::Error> for Error {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => Error::AccessDenied,
            btleplug::Error::NotConnected => Error::NotConnected,
            other => Error::Bluetooth(other),
        }
    }
}

/// Result type alias using gattscope-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

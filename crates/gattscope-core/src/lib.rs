//! Connection manager and Bluetooth host abstraction for gattscope.
//!
//! This crate owns everything between "the user clicked scan" and "the
//! dashboard shows a characteristic value": asking the host for a device,
//! opening a GATT session, enumerating services, reading, writing and
//! subscribing to characteristics, and tracking the session through to
//! disconnection.
//!
//! # Features
//!
//! - **Device requests**: filter on name, name prefix or advertised services,
//!   then let a [`DeviceChooser`] pick one of the matches
//! - **Single-session manager**: [`ConnectionManager`] keeps at most one GATT
//!   session and converges to the same state whether the link was closed on
//!   purpose or dropped
//! - **Observable state**: [`ConnectionState`] snapshots over a `watch`
//!   channel, plus discrete [`ConnectionEvent`]s (notifications included)
//! - **Host independence**: the manager only sees the [`BluetoothHost`] and
//!   [`HostDevice`] traits; [`BtleHost`] drives a real adapter through
//!   btleplug and [`MockHost`] runs entirely in memory
//!
//! # Platform Differences
//!
//! Device identifiers come from the host. Linux and Windows report the MAC
//! address; macOS reports a CoreBluetooth UUID that is stable per machine
//! but differs between machines. Reconnecting to a remembered device
//! therefore goes through a filtered device request rather than a lookup by
//! identifier; see [`ConnectionManager::connect_to_known_device`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use gattscope_core::{BtleHost, ConnectionManager, DeviceFilter, RequestOptions};
//! use gattscope_core::uuid::{BATTERY_LEVEL, BATTERY_SERVICE};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::new(Arc::new(BtleHost::new().await?));
//!
//!     let options = RequestOptions::new()
//!         .filter(DeviceFilter::service(BATTERY_SERVICE));
//!     let device = manager.scan(options).await?;
//!     println!("Connected to {}", device);
//!
//!     let level = manager.read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL).await?;
//!     println!("Battery: {}%", level.first().copied().unwrap_or_default());
//!
//!     manager.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod connection;
pub mod error;
pub mod events;
pub mod mock;
pub mod scan;
pub mod state;
pub mod traits;

// Re-export the shared model so dependents need only this crate.
pub use gattscope_types::types;
pub use gattscope_types::uuid;
pub use gattscope_types::value;

pub use btle::{BtleDevice, BtleHost, ConnectionConfig};
pub use connection::{ConnectionManager, ManagerConfig};
pub use error::{Error, Result};
pub use events::{ConnectionEvent, DisconnectReason, EventDispatcher, EventReceiver};
pub use mock::{MockDevice, MockDeviceBuilder, MockFailure, MockHost, MockWrite};
pub use scan::{DEFAULT_SCAN_DURATION, DeviceChooser, DeviceFilter, RequestOptions, StrongestSignal};
pub use state::{ConnectionState, ConnectionStatus, Route};
pub use traits::{BluetoothHost, DeviceHandle, DeviceRecorder, HostDevice, NotificationStream};

pub use gattscope_types::{
    CharacteristicInfo, CharacteristicProperties, DeviceInfo, ParseError, ServiceInfo,
};

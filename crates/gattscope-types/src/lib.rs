//! Platform-agnostic types for the gattscope BLE inspector.
//!
//! This crate provides the data model shared by the connection manager
//! (gattscope-core), the device history (gattscope-store) and front ends.
//!
//! # Features
//!
//! - Device, service and characteristic descriptions
//! - Bluetooth UUID parsing and well-known attribute names
//! - The payload codec used for reads, writes and notifications
//! - Error types for parsing user input
//!
//! # Example
//!
//! ```
//! use gattscope_types::{DeviceInfo, value::format_value};
//!
//! let device = DeviceInfo::new("AA:BB:CC:DD:EE:FF").with_name("Thermo");
//! assert_eq!(device.display_name(), "Thermo");
//! assert_eq!(format_value(&[0x00, 0x2a]), "00 2a");
//! ```

pub mod error;
pub mod types;
pub mod uuid;
pub mod value;

pub use error::{ParseError, ParseResult};
pub use types::{
    CharacteristicInfo, CharacteristicProperties, DeviceInfo, PATH_LOSS_EXPONENT,
    REFERENCE_TX_POWER, ServiceInfo, estimate_distance,
};

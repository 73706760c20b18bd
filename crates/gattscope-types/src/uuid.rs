//! Bluetooth UUID helpers.
//!
//! GATT attributes defined by the Bluetooth SIG use 16-bit or 32-bit short
//! identifiers that expand into the Bluetooth base UUID
//! `0000xxxx-0000-1000-8000-00805f9b34fb`. This module parses both forms and
//! names the handful of well-known attributes an inspector runs into most.

use uuid::{Uuid, uuid};

use crate::error::{ParseError, ParseResult};

/// The Bluetooth base UUID that short identifiers expand into.
pub const BLUETOOTH_BASE_UUID: Uuid = uuid!("00000000-0000-1000-8000-00805f9b34fb");

// --- Standard BLE Service UUIDs ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Generic Attribute Profile (GATT) service.
pub const GATT_SERVICE: Uuid = uuid!("00001801-0000-1000-8000-00805f9b34fb");

/// Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");

/// Heart Rate service.
pub const HEART_RATE_SERVICE: Uuid = uuid!("0000180d-0000-1000-8000-00805f9b34fb");

/// Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

/// Environmental Sensing service.
pub const ENVIRONMENTAL_SENSING_SERVICE: Uuid = uuid!("0000181a-0000-1000-8000-00805f9b34fb");

/// Nordic UART service (vendor specific, but ubiquitous on dev boards).
pub const NORDIC_UART_SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

// --- Standard BLE Characteristic UUIDs ---

/// Device Name characteristic.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

/// Appearance characteristic.
pub const APPEARANCE: Uuid = uuid!("00002a01-0000-1000-8000-00805f9b34fb");

/// Battery Level characteristic.
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");

/// Model Number String characteristic.
pub const MODEL_NUMBER: Uuid = uuid!("00002a24-0000-1000-8000-00805f9b34fb");

/// Serial Number String characteristic.
pub const SERIAL_NUMBER: Uuid = uuid!("00002a25-0000-1000-8000-00805f9b34fb");

/// Firmware Revision String characteristic.
pub const FIRMWARE_REVISION: Uuid = uuid!("00002a26-0000-1000-8000-00805f9b34fb");

/// Hardware Revision String characteristic.
pub const HARDWARE_REVISION: Uuid = uuid!("00002a27-0000-1000-8000-00805f9b34fb");

/// Software Revision String characteristic.
pub const SOFTWARE_REVISION: Uuid = uuid!("00002a28-0000-1000-8000-00805f9b34fb");

/// Manufacturer Name String characteristic.
pub const MANUFACTURER_NAME: Uuid = uuid!("00002a29-0000-1000-8000-00805f9b34fb");

/// Heart Rate Measurement characteristic.
pub const HEART_RATE_MEASUREMENT: Uuid = uuid!("00002a37-0000-1000-8000-00805f9b34fb");

/// Temperature characteristic.
pub const TEMPERATURE: Uuid = uuid!("00002a6e-0000-1000-8000-00805f9b34fb");

/// Humidity characteristic.
pub const HUMIDITY: Uuid = uuid!("00002a6f-0000-1000-8000-00805f9b34fb");

/// Nordic UART RX characteristic (central writes here).
pub const NORDIC_UART_RX: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// Nordic UART TX characteristic (peripheral notifies here).
pub const NORDIC_UART_TX: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");

const KNOWN_UUIDS: &[(Uuid, &str)] = &[
    (GAP_SERVICE, "Generic Access"),
    (GATT_SERVICE, "Generic Attribute"),
    (DEVICE_INFO_SERVICE, "Device Information"),
    (HEART_RATE_SERVICE, "Heart Rate"),
    (BATTERY_SERVICE, "Battery Service"),
    (ENVIRONMENTAL_SENSING_SERVICE, "Environmental Sensing"),
    (NORDIC_UART_SERVICE, "Nordic UART"),
    (DEVICE_NAME, "Device Name"),
    (APPEARANCE, "Appearance"),
    (BATTERY_LEVEL, "Battery Level"),
    (MODEL_NUMBER, "Model Number String"),
    (SERIAL_NUMBER, "Serial Number String"),
    (FIRMWARE_REVISION, "Firmware Revision String"),
    (HARDWARE_REVISION, "Hardware Revision String"),
    (SOFTWARE_REVISION, "Software Revision String"),
    (MANUFACTURER_NAME, "Manufacturer Name String"),
    (HEART_RATE_MEASUREMENT, "Heart Rate Measurement"),
    (TEMPERATURE, "Temperature"),
    (HUMIDITY, "Humidity"),
    (NORDIC_UART_RX, "Nordic UART RX"),
    (NORDIC_UART_TX, "Nordic UART TX"),
];

/// Name a well-known service or characteristic.
pub fn describe_uuid(uuid: &Uuid) -> Option<&'static str> {
    KNOWN_UUIDS
        .iter()
        .find(|(known, _)| known == uuid)
        .map(|(_, name)| *name)
}

/// Expand a 16-bit or 32-bit SIG identifier into a full UUID.
pub const fn from_short(short: u32) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | BLUETOOTH_BASE_UUID.as_u128())
}

/// Return the short SIG identifier if `uuid` is derived from the base UUID.
pub fn to_short(uuid: &Uuid) -> Option<u32> {
    let value = uuid.as_u128();
    let low_bits = value & ((1u128 << 96) - 1);
    (low_bits == BLUETOOTH_BASE_UUID.as_u128()).then_some((value >> 96) as u32)
}

/// Parse a Bluetooth UUID from user input.
///
/// Accepts 16-bit (`180f`, `0x180F`), 32-bit (`0000180f`) and full 128-bit
/// forms, with or without hyphens.
///
/// # Examples
///
/// ```
/// use gattscope_types::uuid::{parse_uuid, BATTERY_SERVICE};
///
/// assert_eq!(parse_uuid("0x180F").unwrap(), BATTERY_SERVICE);
/// assert_eq!(parse_uuid("0000180f-0000-1000-8000-00805f9b34fb").unwrap(), BATTERY_SERVICE);
/// assert!(parse_uuid("not-a-uuid").is_err());
/// ```
pub fn parse_uuid(input: &str) -> ParseResult<Uuid> {
    let trimmed = input.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let invalid = || ParseError::InvalidUuid(input.to_string());

    match hex.len() {
        4 | 8 if hex.chars().all(|c| c.is_ascii_hexdigit()) => {
            let short = u32::from_str_radix(hex, 16).map_err(|_| invalid())?;
            Ok(from_short(short))
        }
        _ => Uuid::parse_str(hex).map_err(|_| invalid()),
    }
}

/// Format a UUID compactly: `0x180f` for SIG identifiers, full form otherwise.
pub fn format_uuid(uuid: &Uuid) -> String {
    match to_short(uuid) {
        Some(short) if short <= 0xFFFF => format!("0x{:04x}", short),
        Some(short) => format!("0x{:08x}", short),
        None => uuid.to_string(),
    }
}

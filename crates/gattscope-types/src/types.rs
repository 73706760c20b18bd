//! Core types describing BLE peripherals and their GATT layout.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::uuid::describe_uuid;

/// Reference transmit power at one metre, in dBm.
pub const REFERENCE_TX_POWER: i16 = -59;

/// Path-loss exponent for free space.
pub const PATH_LOSS_EXPONENT: f64 = 2.0;

/// Estimate the distance to a transmitter from its RSSI.
///
/// Uses the log-distance path-loss model
/// `10^((tx_power - rssi) / (10 * n))` with [`REFERENCE_TX_POWER`] and
/// [`PATH_LOSS_EXPONENT`]. The result is a rough indication only; walls,
/// antenna orientation and the peripheral's real transmit power all skew it.
///
/// # Examples
///
/// ```
/// use gattscope_types::estimate_distance;
///
/// assert!((estimate_distance(-59) - 1.0).abs() < 1e-9);
/// assert!((estimate_distance(-79) - 10.0).abs() < 1e-9);
/// ```
#[must_use]
pub fn estimate_distance(rssi: i16) -> f64 {
    let exponent = f64::from(REFERENCE_TX_POWER - rssi) / (10.0 * PATH_LOSS_EXPONENT);
    10f64.powf(exponent)
}

/// A BLE peripheral as seen by the inspector.
///
/// The `id` is assigned by the host Bluetooth stack. It is stable for a given
/// device on a given host (a MAC address on Linux/Windows, a CoreBluetooth
/// UUID on macOS) but must be treated as opaque.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    /// Host-assigned identifier.
    pub id: String,
    /// Advertised local name, if any.
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: Option<String>,
    /// When the device was last seen or connected.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub last_seen: OffsetDateTime,
    /// Received signal strength in dBm, when the host reported one.
    #[cfg_attr(feature = "serde", serde(default))]
    pub rssi: Option<i16>,
    /// Estimated distance in metres, derived from `rssi`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub distance: Option<f64>,
    /// Service UUIDs advertised by or discovered on the device.
    #[cfg_attr(feature = "serde", serde(default))]
    pub service_uuids: Vec<Uuid>,
}

impl DeviceInfo {
    /// Create a device record seen now, with no signal or service data.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            last_seen: OffsetDateTime::now_utc(),
            rssi: None,
            distance: None,
            service_uuids: Vec::new(),
        }
    }

    /// Set the advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the RSSI and derive the distance estimate from it.
    #[must_use]
    pub fn with_rssi(mut self, rssi: Option<i16>) -> Self {
        self.rssi = rssi;
        self.distance = rssi.map(estimate_distance);
        self
    }

    /// Set the known service UUIDs.
    #[must_use]
    pub fn with_services(mut self, services: Vec<Uuid>) -> Self {
        self.service_uuids = services;
        self
    }

    /// Name for display, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Capability flags of a GATT characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Whether any kind of write is supported.
    pub fn writable(&self) -> bool {
        self.write || self.write_without_response
    }

    /// Whether the characteristic can push values (notify or indicate).
    pub fn subscribable(&self) -> bool {
        self.notify || self.indicate
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::with_capacity(5);
        if self.read {
            flags.push("read");
        }
        if self.write {
            flags.push("write");
        }
        if self.write_without_response {
            flags.push("write-no-resp");
        }
        if self.notify {
            flags.push("notify");
        }
        if self.indicate {
            flags.push("indicate");
        }
        if flags.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", flags.join(","))
        }
    }
}

/// A characteristic discovered inside a GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    /// Last value read from or notified by the characteristic.
    #[cfg_attr(feature = "serde", serde(default))]
    pub value: Option<Vec<u8>>,
}

impl CharacteristicInfo {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            properties,
            value: None,
        }
    }

    /// Well-known name for this characteristic, if any.
    pub fn known_name(&self) -> Option<&'static str> {
        describe_uuid(&self.uuid)
    }
}

/// A GATT service and its characteristics, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub is_primary: bool,
    pub characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    pub fn new(uuid: Uuid, is_primary: bool) -> Self {
        Self {
            uuid,
            is_primary,
            characteristics: Vec::new(),
        }
    }

    /// Well-known name for this service, if any.
    pub fn known_name(&self) -> Option<&'static str> {
        describe_uuid(&self.uuid)
    }

    /// Look up a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicInfo> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }

    /// Look up a characteristic by UUID, mutably.
    pub fn characteristic_mut(&mut self, uuid: &Uuid) -> Option<&mut CharacteristicInfo> {
        self.characteristics.iter_mut().find(|c| &c.uuid == uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uuid::{BATTERY_LEVEL, BATTERY_SERVICE};

    #[test]
    fn test_estimate_distance_reference_point() {
        assert!((estimate_distance(REFERENCE_TX_POWER) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_distance_grows_as_signal_weakens() {
        assert!(estimate_distance(-90) > estimate_distance(-70));
        assert!(estimate_distance(-40) < 1.0);
    }

    #[test]
    fn test_device_info_with_rssi_derives_distance() {
        let device = DeviceInfo::new("AA:BB").with_rssi(Some(-79));
        assert_eq!(device.rssi, Some(-79));
        assert!((device.distance.unwrap() - 10.0).abs() < 1e-9);

        let device = device.with_rssi(None);
        assert!(device.distance.is_none());
    }

    #[test]
    fn test_device_display() {
        let named = DeviceInfo::new("AA:BB").with_name("Thermo");
        assert_eq!(named.to_string(), "Thermo (AA:BB)");
        assert_eq!(named.display_name(), "Thermo");

        let anonymous = DeviceInfo::new("AA:BB");
        assert_eq!(anonymous.to_string(), "AA:BB");
        assert_eq!(anonymous.display_name(), "AA:BB");
    }

    #[test]
    fn test_properties_display() {
        let props = CharacteristicProperties {
            read: true,
            notify: true,
            ..Default::default()
        };
        assert_eq!(props.to_string(), "read,notify");
        assert_eq!(CharacteristicProperties::default().to_string(), "-");
        assert!(!props.writable());
        assert!(props.subscribable());
    }

    #[test]
    fn test_service_characteristic_lookup() {
        let mut service = ServiceInfo::new(BATTERY_SERVICE, true);
        service.characteristics.push(CharacteristicInfo::new(
            BATTERY_LEVEL,
            CharacteristicProperties {
                read: true,
                ..Default::default()
            },
        ));

        assert_eq!(service.known_name(), Some("Battery Service"));
        assert!(service.characteristic(&BATTERY_LEVEL).is_some());
        assert!(service.characteristic(&BATTERY_SERVICE).is_none());

        service.characteristic_mut(&BATTERY_LEVEL).unwrap().value = Some(vec![85]);
        assert_eq!(
            service.characteristic(&BATTERY_LEVEL).unwrap().value,
            Some(vec![85])
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_device_info_timestamp_round_trips_as_text() {
        let device = DeviceInfo::new("AA:BB").with_name("Thermo");
        let json = serde_json::to_string(&device).unwrap();
        assert!(json.contains("\"last_seen\":\""));

        let parsed: DeviceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.last_seen, device.last_seen);
        assert_eq!(parsed, device);
    }
}

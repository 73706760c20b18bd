//! Device request options and the device chooser.
//!
//! A device request works like a browser's Bluetooth chooser: the caller
//! describes which devices are acceptable, the host collects advertisers for
//! a while, and a [`DeviceChooser`] picks one of the matches (or none, which
//! counts as a cancellation).

use std::time::Duration;

use uuid::Uuid;

use gattscope_types::DeviceInfo;

use crate::error::{Error, Result};

/// Default time the host spends collecting advertisers.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

/// A single acceptance criterion for a device request.
///
/// Every criterion that is set must match. Leaving all of them unset matches
/// every device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Exact advertised name.
    pub name: Option<String>,
    /// Advertised name prefix.
    pub name_prefix: Option<String>,
    /// Services that must all be advertised.
    pub services: Vec<Uuid>,
}

impl DeviceFilter {
    /// Filter on an exact name.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Filter on a name prefix.
    pub fn name_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    /// Filter on an advertised service.
    pub fn service(uuid: Uuid) -> Self {
        Self {
            services: vec![uuid],
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.name.is_none() && self.name_prefix.is_none() && self.services.is_empty()
    }

    /// Check an advertiser against this filter.
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        if let Some(expected) = &self.name {
            if name != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.name_prefix {
            if !name.is_some_and(|n| n.starts_with(prefix.as_str())) {
                return false;
            }
        }
        self.services.iter().all(|uuid| services.contains(uuid))
    }
}

/// Options for [`BluetoothHost::request_device`](crate::BluetoothHost::request_device).
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// A device is acceptable when any filter matches.
    pub filters: Vec<DeviceFilter>,
    /// Accept every device regardless of filters.
    pub accept_all_devices: bool,
    /// Services the caller wants to access beyond those in `filters`.
    pub optional_services: Vec<Uuid>,
    /// How long to collect advertisers before showing the chooser.
    pub scan_duration: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            accept_all_devices: false,
            optional_services: Vec::new(),
            scan_duration: DEFAULT_SCAN_DURATION,
        }
    }
}

impl RequestOptions {
    /// Create empty options. Add a filter or call [`Self::accept_all`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that accept any device.
    pub fn accept_all() -> Self {
        Self {
            accept_all_devices: true,
            ..Default::default()
        }
    }

    /// Add a filter.
    #[must_use]
    pub fn filter(mut self, filter: DeviceFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an optional service.
    #[must_use]
    pub fn optional_service(mut self, uuid: Uuid) -> Self {
        self.optional_services.push(uuid);
        self
    }

    /// Set the scan duration.
    #[must_use]
    pub fn scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Set the scan duration in seconds.
    #[must_use]
    pub fn scan_duration_secs(mut self, secs: u64) -> Self {
        self.scan_duration = Duration::from_secs(secs);
        self
    }

    /// Options used to find a device again from what was remembered about it.
    ///
    /// Filters on the stored name, either exactly or as a prefix of the
    /// advertised name, and accepts any device when no name was stored. Stored services are requested as optional services. Hosts
    /// give no guarantee that the same physical device is offered again.
    pub fn for_known_device(device: &DeviceInfo) -> Self {
        let options = match &device.name {
            Some(name) => Self::new()
                .filter(DeviceFilter::name(name.clone()))
                .filter(DeviceFilter::name_prefix(name.clone())),
            None => Self::accept_all(),
        };
        Self {
            optional_services: device.service_uuids.clone(),
            ..options
        }
    }

    /// Check that the request can be satisfied at all.
    pub fn validate(&self) -> Result<()> {
        if !self.accept_all_devices && self.filters.is_empty() {
            return Err(Error::invalid_request(
                "either accept all devices or provide at least one filter",
            ));
        }
        if self.accept_all_devices && !self.filters.is_empty() {
            return Err(Error::invalid_request(
                "filters cannot be combined with accepting all devices",
            ));
        }
        if self.filters.iter().any(DeviceFilter::is_empty) {
            return Err(Error::invalid_request("filters must not be empty"));
        }
        if self.scan_duration.is_zero() {
            return Err(Error::invalid_request("scan duration must be non-zero"));
        }
        Ok(())
    }

    /// Check an advertiser against the request.
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        self.accept_all_devices || self.filters.iter().any(|f| f.matches(name, services))
    }
}

/// Picks one device out of the advertisers that matched a request.
pub trait DeviceChooser: Send + Sync {
    /// Return the index of the chosen candidate, or `None` to cancel.
    fn choose(&self, candidates: &[DeviceInfo]) -> Option<usize>;
}

/// Chooser that takes the candidate with the strongest signal.
///
/// Candidates without an RSSI rank below all others; ties keep the
/// discovery order.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrongestSignal;

impl DeviceChooser for StrongestSignal {
    fn choose(&self, candidates: &[DeviceInfo]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|(_, device)| device.rssi.unwrap_or(i16::MIN))
            .map(|(index, _)| index)
    }
}

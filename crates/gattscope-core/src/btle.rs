//! btleplug implementation of the host traits.
//!
//! A device request starts a scan, polls the adapter's peripheral list for
//! the requested duration, and hands every matching advertiser to a
//! [`DeviceChooser`]. All GATT operations are bounded by the timeouts in
//! [`ConnectionConfig`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use gattscope_types::{CharacteristicInfo, CharacteristicProperties, DeviceInfo, ServiceInfo};

use crate::error::{Error, Result};
use crate::scan::{DeviceChooser, RequestOptions, StrongestSignal};
use crate::traits::{BluetoothHost, DeviceHandle, HostDevice, NotificationStream};

/// How often the adapter's peripheral list is polled during a request.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Default timeout for characteristic reads.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for characteristic writes.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for opening a GATT session.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts for GATT operations.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use gattscope_core::btle::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(20))
///     .read_timeout(Duration::from_secs(15));
/// assert_eq!(config.read_timeout, Duration::from_secs(15));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for opening a GATT session.
    pub connection_timeout: Duration,
    /// Timeout for characteristic reads.
    pub read_timeout: Duration,
    /// Timeout for characteristic writes.
    pub write_timeout: Duration,
    /// Timeout for service discovery.
    pub discovery_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longer timeouts for noisy RF environments or distant devices.
    pub fn challenging_environment() -> Self {
        Self {
            connection_timeout: Duration::from_secs(25),
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            discovery_timeout: Duration::from_secs(15),
        }
    }

    /// Short timeouts for nearby devices with a strong signal.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }
}

/// Get the first Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::host("No Bluetooth adapter found"))
}

/// Stable key for a peripheral.
///
/// Platforms that hide MAC addresses report `00:00:00:00:00:00`; the
/// platform peripheral ID is used there instead.
fn peripheral_key(address: BDAddr, id: &PeripheralId) -> String {
    let address = address.to_string();
    if address == "00:00:00:00:00:00" {
        format!("{:?}", id)
            .trim_start_matches("PeripheralId(")
            .trim_end_matches(')')
            .to_string()
    } else {
        address
    }
}

fn properties_from_flags(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

fn service_info(service: &Service) -> ServiceInfo {
    let mut info = ServiceInfo::new(service.uuid, service.primary);
    info.characteristics = service
        .characteristics
        .iter()
        .map(|c| CharacteristicInfo::new(c.uuid, properties_from_flags(c.properties)))
        .collect();
    info
}

/// Host backed by the system Bluetooth adapter.
pub struct BtleHost {
    adapter: Adapter,
    config: ConnectionConfig,
    chooser: Arc<dyn DeviceChooser>,
}

impl BtleHost {
    /// Use the first adapter and pick the strongest matching device.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_adapter(get_adapter().await?))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            config: ConnectionConfig::default(),
            chooser: Arc::new(StrongestSignal),
        }
    }

    /// Set the GATT timeouts applied to devices handed out by this host.
    #[must_use]
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the chooser that picks among matching devices.
    #[must_use]
    pub fn with_chooser(mut self, chooser: Arc<dyn DeviceChooser>) -> Self {
        self.chooser = chooser;
        self
    }

    /// Poll the adapter until the deadline, keeping the latest sighting of
    /// every matching peripheral in discovery order.
    async fn collect_candidates(&self, options: &RequestOptions) -> Result<Vec<BtleDevice>> {
        let deadline = Instant::now() + options.scan_duration;
        let mut candidates: Vec<BtleDevice> = Vec::new();

        loop {
            for peripheral in self.adapter.peripherals().await? {
                let Some(properties) = peripheral.properties().await? else {
                    continue;
                };
                if !options.matches(properties.local_name.as_deref(), &properties.services) {
                    continue;
                }
                let device = BtleDevice::new(
                    self.adapter.clone(),
                    peripheral,
                    &properties,
                    self.config.clone(),
                );
                match candidates.iter_mut().find(|c| c.id == device.id) {
                    Some(existing) => *existing = device,
                    None => {
                        debug!("Found {} ({:?})", device.id, device.name);
                        candidates.push(device);
                    }
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        }

        Ok(candidates)
    }
}

#[async_trait]
impl BluetoothHost for BtleHost {
    #[tracing::instrument(level = "info", skip_all, fields(duration = ?options.scan_duration))]
    async fn request_device(&self, options: &RequestOptions) -> Result<DeviceHandle> {
        options.validate()?;

        info!("Scanning for devices...");
        self.adapter.start_scan(ScanFilter::default()).await?;
        let collected = self.collect_candidates(options).await;
        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", err);
        }
        let mut candidates = collected?;
        info!("{} matching devices", candidates.len());
        if candidates.is_empty() {
            return Err(Error::DeviceNotSelected);
        }

        let infos: Vec<DeviceInfo> = candidates.iter().map(BtleDevice::info).collect();
        let chooser = Arc::clone(&self.chooser);
        let choice = tokio::task::spawn_blocking(move || chooser.choose(&infos))
            .await
            .map_err(|e| Error::host(format!("Device chooser failed: {}", e)))?;

        match choice {
            Some(index) if index < candidates.len() => Ok(Arc::new(candidates.swap_remove(index))),
            _ => Err(Error::DeviceNotSelected),
        }
    }
}

/// A peripheral seen during a device request.
#[derive(Clone)]
pub struct BtleDevice {
    adapter: Adapter,
    peripheral: Peripheral,
    id: String,
    name: Option<String>,
    rssi: Option<i16>,
    services: Vec<Uuid>,
    config: ConnectionConfig,
}

impl std::fmt::Debug for BtleDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("rssi", &self.rssi)
            .finish_non_exhaustive()
    }
}

impl BtleDevice {
    fn new(
        adapter: Adapter,
        peripheral: Peripheral,
        properties: &PeripheralProperties,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            id: peripheral_key(properties.address, &peripheral.id()),
            name: properties.local_name.clone(),
            rssi: properties.rssi,
            services: properties.services.clone(),
            adapter,
            peripheral,
            config,
        }
    }

    fn info(&self) -> DeviceInfo {
        let mut info = DeviceInfo::new(&self.id)
            .with_rssi(self.rssi)
            .with_services(self.services.clone());
        info.name = self.name.clone();
        info
    }

    /// Look up a characteristic from the last service discovery.
    fn find_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Characteristic> {
        let services = self.peripheral.services();
        let found = services
            .iter()
            .find(|s| s.uuid == service)
            .ok_or(Error::ServiceNotFound { uuid: service })?;
        found
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
            .cloned()
            .ok_or(Error::CharacteristicNotFound {
                service,
                uuid: characteristic,
            })
    }
}

#[async_trait]
impl HostDevice for BtleDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    fn advertised_services(&self) -> Vec<Uuid> {
        self.services.clone()
    }

    fn has_gatt(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<()> {
        let duration = self.config.connection_timeout;
        timeout(duration, self.peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect to device", duration))??;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnected(&self) {
        // Subscribe before checking so a drop in between is not missed.
        let mut events = match self.adapter.events().await {
            Ok(events) => events,
            Err(err) => {
                warn!("Failed to subscribe to adapter events: {}", err);
                return;
            }
        };
        if !self.is_connected().await {
            return;
        }
        let id = self.peripheral.id();
        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDisconnected(other) = event {
                if other == id {
                    debug!("{} disconnected", self.id);
                    return;
                }
            }
        }
    }

    async fn primary_services(&self) -> Result<Vec<ServiceInfo>> {
        let duration = self.config.discovery_timeout;
        timeout(duration, self.peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", duration))??;

        Ok(self
            .peripheral
            .services()
            .iter()
            .filter(|s| s.primary)
            .map(service_info)
            .collect())
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        let chr = self.find_characteristic(service, characteristic)?;
        let duration = self.config.read_timeout;
        let value = timeout(duration, self.peripheral.read(&chr))
            .await
            .map_err(|_| Error::timeout(format!("read {}", characteristic), duration))??;
        Ok(value)
    }

    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let chr = self.find_characteristic(service, characteristic)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        let duration = self.config.write_timeout;
        timeout(duration, self.peripheral.write(&chr, data, write_type))
            .await
            .map_err(|_| Error::timeout(format!("write {}", characteristic), duration))??;
        Ok(())
    }

    async fn subscribe(&self, service: Uuid, characteristic: Uuid) -> Result<NotificationStream> {
        let chr = self.find_characteristic(service, characteristic)?;
        self.peripheral.subscribe(&chr).await?;
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .filter_map(move |n| {
                futures::future::ready((n.uuid == characteristic).then_some(n.value))
            })
            .boxed())
    }

    async fn unsubscribe(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
        let chr = self.find_characteristic(service, characteristic)?;
        self.peripheral.unsubscribe(&chr).await?;
        Ok(())
    }
}

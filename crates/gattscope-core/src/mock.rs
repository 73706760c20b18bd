//! In-memory host and device for testing.
//!
//! [`MockHost`] and [`MockDevice`] implement the host traits without any
//! Bluetooth hardware, so the connection manager (and anything built on it)
//! can be exercised in ordinary unit tests.
//!
//! # Features
//!
//! - **Failure injection**: make the next device request fail, make
//!   connects fail, or make every GATT operation fail
//! - **Latency simulation**: delay device requests to observe the scanning flag
//! - **Link loss**: drop the connection from the device side
//! - **Notifications**: push values to subscribed characteristics

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use tokio::sync::watch;
use uuid::Uuid;

use gattscope_types::uuid::{
    BATTERY_LEVEL, BATTERY_SERVICE, DEVICE_INFO_SERVICE, MANUFACTURER_NAME, MODEL_NUMBER,
    NORDIC_UART_RX, NORDIC_UART_SERVICE, NORDIC_UART_TX,
};
use gattscope_types::{CharacteristicInfo, CharacteristicProperties, DeviceInfo, ServiceInfo};

use crate::error::{Error, Result};
use crate::scan::{DeviceChooser, RequestOptions, StrongestSignal};
use crate::traits::{BluetoothHost, DeviceHandle, HostDevice, NotificationStream};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A failure to inject into the next device request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// The user dismissed the chooser.
    Cancelled,
    /// The host refused Bluetooth access.
    AccessDenied,
    /// Any other host failure, with its raw message.
    Message(String),
}

impl From<MockFailure> for Error {
    fn from(failure: MockFailure) -> Self {
        match failure {
            MockFailure::Cancelled => Error::DeviceNotSelected,
            MockFailure::AccessDenied => Error::AccessDenied,
            MockFailure::Message(message) => Error::Host(message),
        }
    }
}

/// A mock host that offers a fixed set of devices.
///
/// Devices matching a request are handed to a [`StrongestSignal`] chooser.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use gattscope_core::{ConnectionManager, MockDeviceBuilder, MockHost, RequestOptions};
///
/// #[tokio::main]
/// async fn main() {
///     let device = MockDeviceBuilder::new("AA:BB").name("Thermo").with_standard_services().build();
///     let host = MockHost::new().with_device(device);
///     let manager = ConnectionManager::new(Arc::new(host));
///
///     let info = manager.scan(RequestOptions::accept_all()).await.unwrap();
///     assert_eq!(info.name.as_deref(), Some("Thermo"));
/// }
/// ```
#[derive(Default)]
pub struct MockHost {
    devices: Mutex<Vec<MockDevice>>,
    next_failure: Mutex<Option<MockFailure>>,
    last_options: Mutex<Option<RequestOptions>>,
    request_count: AtomicU32,
    request_latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHost")
            .field("devices", &lock(&self.devices).len())
            .field("request_count", &self.request_count())
            .finish_non_exhaustive()
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device (builder style).
    #[must_use]
    pub fn with_device(self, device: MockDevice) -> Self {
        self.add_device(device);
        self
    }

    /// Add a device to the advertisers the host can offer.
    pub fn add_device(&self, device: MockDevice) {
        lock(&self.devices).push(device);
    }

    /// Remove all devices.
    pub fn clear_devices(&self) {
        lock(&self.devices).clear();
    }

    /// Fail the next device request.
    pub fn fail_next_request(&self, failure: MockFailure) {
        *lock(&self.next_failure) = Some(failure);
    }

    /// Delay every device request.
    pub fn set_request_latency(&self, latency: Duration) {
        self.request_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of device requests made.
    pub fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Options passed to the most recent device request.
    pub fn last_options(&self) -> Option<RequestOptions> {
        lock(&self.last_options).clone()
    }
}

#[async_trait]
impl BluetoothHost for MockHost {
    async fn request_device(&self, options: &RequestOptions) -> Result<DeviceHandle> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_options) = Some(options.clone());
        options.validate()?;

        let latency = self.request_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if let Some(failure) = lock(&self.next_failure).take() {
            return Err(failure.into());
        }

        let candidates: Vec<MockDevice> = lock(&self.devices)
            .iter()
            .filter(|d| options.matches(d.name(), &d.inner.advertised))
            .cloned()
            .collect();
        let infos: Vec<DeviceInfo> = candidates.iter().map(MockDevice::info).collect();

        StrongestSignal
            .choose(&infos)
            .and_then(|index| candidates.into_iter().nth(index))
            .map(|device| Arc::new(device) as DeviceHandle)
            .ok_or(Error::DeviceNotSelected)
    }
}

/// A write recorded by a [`MockDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub data: Vec<u8>,
    pub with_response: bool,
}

struct MockState {
    id: String,
    name: Option<String>,
    rssi: Option<i16>,
    advertised: Vec<Uuid>,
    has_gatt: bool,
    services: Vec<ServiceInfo>,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    writes: Mutex<Vec<MockWrite>>,
    subscribers: Mutex<HashMap<Uuid, UnboundedSender<Vec<u8>>>>,
    connected: watch::Sender<bool>,
    connect_count: AtomicU32,
    fail_connect: AtomicBool,
    fail_operations: AtomicBool,
    fail_message: Mutex<String>,
}

/// A mock peripheral.
///
/// Clones share state, so a test can keep one handle while the manager
/// owns another.
#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<MockState>,
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDevice")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("connected", &self.is_connected_sync())
            .finish_non_exhaustive()
    }
}

impl MockDevice {
    /// Device info as a host would report it.
    pub fn info(&self) -> DeviceInfo {
        let mut info = DeviceInfo::new(&self.inner.id)
            .with_rssi(self.inner.rssi)
            .with_services(self.inner.advertised.clone());
        info.name = self.inner.name.clone();
        info
    }

    pub fn is_connected_sync(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> u32 {
        self.inner.connect_count.load(Ordering::Relaxed)
    }

    /// Make connects fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// Make reads, writes and subscriptions fail.
    pub fn set_fail_operations(&self, fail: bool) {
        self.inner.fail_operations.store(fail, Ordering::Relaxed);
    }

    /// Set the message of injected failures.
    pub fn set_fail_message(&self, message: &str) {
        *lock(&self.inner.fail_message) = message.to_string();
    }

    /// Set a characteristic's value.
    pub fn set_value(&self, characteristic: Uuid, value: Vec<u8>) {
        lock(&self.inner.values).insert(characteristic, value);
    }

    /// Current value of a characteristic.
    pub fn value(&self, characteristic: Uuid) -> Option<Vec<u8>> {
        lock(&self.inner.values).get(&characteristic).cloned()
    }

    /// All writes received, oldest first.
    pub fn writes(&self) -> Vec<MockWrite> {
        lock(&self.inner.writes).clone()
    }

    /// Push a value to a subscribed characteristic.
    ///
    /// Returns `false` when nobody is subscribed.
    pub fn notify(&self, characteristic: Uuid, value: Vec<u8>) -> bool {
        let subscribers = lock(&self.inner.subscribers);
        match subscribers.get(&characteristic) {
            Some(tx) => tx.unbounded_send(value).is_ok(),
            None => false,
        }
    }

    /// Drop the link from the device side.
    pub fn simulate_link_loss(&self) {
        lock(&self.inner.subscribers).clear();
        self.inner.connected.send_replace(false);
    }

    fn check_operation(&self) -> Result<()> {
        if !self.is_connected_sync() {
            return Err(Error::NotConnected);
        }
        if self.inner.fail_operations.load(Ordering::Relaxed) {
            return Err(Error::Host(lock(&self.inner.fail_message).clone()));
        }
        Ok(())
    }

    fn find(&self, service: Uuid, characteristic: Uuid) -> Result<&CharacteristicInfo> {
        self.inner
            .services
            .iter()
            .find(|s| s.uuid == service)
            .ok_or(Error::ServiceNotFound { uuid: service })?
            .characteristic(&characteristic)
            .ok_or(Error::CharacteristicNotFound {
                service,
                uuid: characteristic,
            })
    }
}

#[async_trait]
impl HostDevice for MockDevice {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    fn rssi(&self) -> Option<i16> {
        self.inner.rssi
    }

    fn advertised_services(&self) -> Vec<Uuid> {
        self.inner.advertised.clone()
    }

    fn has_gatt(&self) -> bool {
        self.inner.has_gatt
    }

    async fn connect(&self) -> Result<()> {
        if !self.inner.has_gatt {
            return Err(Error::GattUnsupported {
                device_id: self.inner.id.clone(),
            });
        }
        if self.inner.fail_connect.load(Ordering::Relaxed) {
            return Err(Error::Host(lock(&self.inner.fail_message).clone()));
        }
        self.inner.connect_count.fetch_add(1, Ordering::Relaxed);
        self.inner.connected.send_replace(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        lock(&self.inner.subscribers).clear();
        self.inner.connected.send_replace(false);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.is_connected_sync()
    }

    async fn disconnected(&self) {
        let mut rx = self.inner.connected.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn primary_services(&self) -> Result<Vec<ServiceInfo>> {
        self.check_operation()?;
        Ok(self
            .inner
            .services
            .iter()
            .filter(|s| s.is_primary)
            .cloned()
            .collect())
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        self.check_operation()?;
        self.find(service, characteristic)?;
        Ok(self.value(characteristic).unwrap_or_default())
    }

    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        self.check_operation()?;
        self.find(service, characteristic)?;
        lock(&self.inner.writes).push(MockWrite {
            service,
            characteristic,
            data: data.to_vec(),
            with_response,
        });
        self.set_value(characteristic, data.to_vec());
        Ok(())
    }

    async fn subscribe(&self, service: Uuid, characteristic: Uuid) -> Result<NotificationStream> {
        self.check_operation()?;
        self.find(service, characteristic)?;
        let (tx, rx) = unbounded();
        lock(&self.inner.subscribers).insert(characteristic, tx);
        Ok(rx.boxed())
    }

    async fn unsubscribe(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
        self.find(service, characteristic)?;
        lock(&self.inner.subscribers).remove(&characteristic);
        Ok(())
    }
}

/// Builder for [`MockDevice`].
#[derive(Debug)]
pub struct MockDeviceBuilder {
    id: String,
    name: Option<String>,
    rssi: Option<i16>,
    advertised: Vec<Uuid>,
    has_gatt: bool,
    services: Vec<ServiceInfo>,
    values: HashMap<Uuid, Vec<u8>>,
}

impl MockDeviceBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            rssi: None,
            advertised: Vec::new(),
            has_gatt: true,
            services: Vec::new(),
            values: HashMap::new(),
        }
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Advertise a service UUID.
    #[must_use]
    pub fn advertise(mut self, uuid: Uuid) -> Self {
        self.advertised.push(uuid);
        self
    }

    /// Make the device reject GATT connections.
    #[must_use]
    pub fn without_gatt(mut self) -> Self {
        self.has_gatt = false;
        self
    }

    /// Add a service to the GATT table.
    #[must_use]
    pub fn service(mut self, service: ServiceInfo) -> Self {
        self.services.push(service);
        self
    }

    /// Set an initial characteristic value.
    #[must_use]
    pub fn value(mut self, characteristic: Uuid, value: impl Into<Vec<u8>>) -> Self {
        self.values.insert(characteristic, value.into());
        self
    }

    /// Battery, device information and Nordic UART services with
    /// plausible values.
    #[must_use]
    pub fn with_standard_services(self) -> Self {
        let read = CharacteristicProperties {
            read: true,
            ..Default::default()
        };
        let read_notify = CharacteristicProperties {
            read: true,
            notify: true,
            ..Default::default()
        };
        let write = CharacteristicProperties {
            write: true,
            write_without_response: true,
            ..Default::default()
        };
        let notify = CharacteristicProperties {
            notify: true,
            ..Default::default()
        };

        let mut battery = ServiceInfo::new(BATTERY_SERVICE, true);
        battery
            .characteristics
            .push(CharacteristicInfo::new(BATTERY_LEVEL, read_notify));

        let mut device_info = ServiceInfo::new(DEVICE_INFO_SERVICE, true);
        device_info
            .characteristics
            .push(CharacteristicInfo::new(MANUFACTURER_NAME, read));
        device_info
            .characteristics
            .push(CharacteristicInfo::new(MODEL_NUMBER, read));

        let mut uart = ServiceInfo::new(NORDIC_UART_SERVICE, true);
        uart.characteristics
            .push(CharacteristicInfo::new(NORDIC_UART_RX, write));
        uart.characteristics
            .push(CharacteristicInfo::new(NORDIC_UART_TX, notify));

        self.advertise(BATTERY_SERVICE)
            .service(battery)
            .service(device_info)
            .service(uart)
            .value(BATTERY_LEVEL, vec![85])
            .value(MANUFACTURER_NAME, "Acme Sensors")
            .value(MODEL_NUMBER, "TH-1")
    }

    pub fn build(self) -> MockDevice {
        let (connected, _) = watch::channel(false);
        MockDevice {
            inner: Arc::new(MockState {
                id: self.id,
                name: self.name,
                rssi: self.rssi,
                advertised: self.advertised,
                has_gatt: self.has_gatt,
                services: self.services,
                values: Mutex::new(self.values),
                writes: Mutex::new(Vec::new()),
                subscribers: Mutex::new(HashMap::new()),
                connected,
                connect_count: AtomicU32::new(0),
                fail_connect: AtomicBool::new(false),
                fail_operations: AtomicBool::new(false),
                fail_message: Mutex::new("Mock failure".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::DeviceFilter;

    fn device() -> MockDevice {
        MockDeviceBuilder::new("AA:01")
            .name("Thermo")
            .rssi(-70)
            .with_standard_services()
            .build()
    }

    #[tokio::test]
    async fn test_connect_and_read() {
        let device = device();
        assert!(!device.is_connected().await);

        device.connect().await.unwrap();
        assert!(device.is_connected().await);
        assert_eq!(device.connect_count(), 1);

        let value = device.read(BATTERY_SERVICE, BATTERY_LEVEL).await.unwrap();
        assert_eq!(value, vec![85]);
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let device = device();
        let err = device.read(BATTERY_SERVICE, BATTERY_LEVEL).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let device = device();
        device.set_fail_connect(true);
        device.set_fail_message("Radio busy");
        let err = device.connect().await.unwrap_err();
        assert_eq!(err.to_string(), "Radio busy");

        device.set_fail_connect(false);
        device.connect().await.unwrap();
        device.set_fail_operations(true);
        assert!(device.primary_services().await.is_err());
    }

    #[tokio::test]
    async fn test_write_is_recorded() {
        let device = device();
        device.connect().await.unwrap();
        device
            .write(NORDIC_UART_SERVICE, NORDIC_UART_RX, b"hi", false)
            .await
            .unwrap();

        let writes = device.writes();
        assert_eq!(writes.len(), 1);
        assert!(!writes[0].with_response);
        assert_eq!(device.value(NORDIC_UART_RX), Some(b"hi".to_vec()));
    }

    #[tokio::test]
    async fn test_notifications() {
        let device = device();
        device.connect().await.unwrap();
        let mut stream = device
            .subscribe(NORDIC_UART_SERVICE, NORDIC_UART_TX)
            .await
            .unwrap();

        assert!(device.notify(NORDIC_UART_TX, vec![1, 2]));
        assert_eq!(stream.next().await, Some(vec![1, 2]));

        device.simulate_link_loss();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_disconnected_resolves() {
        let device = device();
        // No session: returns immediately.
        device.disconnected().await;

        device.connect().await.unwrap();
        let waiter = tokio::spawn({
            let device = device.clone();
            async move { device.disconnected().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        device.simulate_link_loss();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_host_filters_and_chooses() {
        let host = MockHost::new()
            .with_device(
                MockDeviceBuilder::new("weak")
                    .name("Thermo A")
                    .rssi(-90)
                    .build(),
            )
            .with_device(
                MockDeviceBuilder::new("strong")
                    .name("Thermo B")
                    .rssi(-40)
                    .build(),
            )
            .with_device(MockDeviceBuilder::new("other").name("Scale").rssi(-30).build());

        let options = RequestOptions::new().filter(DeviceFilter::name_prefix("Thermo"));
        let device = host.request_device(&options).await.unwrap();
        assert_eq!(device.id(), "strong");
        assert_eq!(host.request_count(), 1);

        let options = RequestOptions::new().filter(DeviceFilter::name("Nothing"));
        let err = host.request_device(&options).await.err().unwrap();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_host_failure_injection_is_one_shot() {
        let host = MockHost::new().with_device(device());
        host.fail_next_request(MockFailure::AccessDenied);

        let err = host
            .request_device(&RequestOptions::accept_all())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::AccessDenied));
        assert!(host.request_device(&RequestOptions::accept_all()).await.is_ok());
    }
}

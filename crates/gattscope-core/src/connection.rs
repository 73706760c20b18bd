//! The connection manager.
//!
//! [`ConnectionManager`] owns the one GATT session an inspector works with
//! and drives it through scan → connect → discover → interact → disconnect.
//! Its state is published as [`ConnectionState`] snapshots; failures are
//! written into the snapshot's error slot *and* returned to the caller.
//!
//! The only code that touches the state from outside a method call is the
//! disconnect observer spawned for each session. Sessions are numbered, so
//! an observer that outlives its session cannot clear a newer one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gattscope_types::value::{encode_text, format_value};
use gattscope_types::{CharacteristicProperties, DeviceInfo, ServiceInfo};

use crate::error::{Error, Result};
use crate::events::{ConnectionEvent, DisconnectReason, EventDispatcher, EventReceiver};
use crate::scan::{DEFAULT_SCAN_DURATION, RequestOptions};
use crate::state::{ConnectionState, ConnectionStatus};
use crate::traits::{BluetoothHost, DeviceHandle, DeviceRecorder, HostDevice, NotificationStream};

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Event channel capacity.
    pub event_capacity: usize,
    /// Scan duration used when reconnecting to a remembered device.
    pub known_device_scan_duration: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_capacity: 100,
            known_device_scan_duration: DEFAULT_SCAN_DURATION,
        }
    }
}

/// One open GATT session and the tasks attached to it.
struct Session {
    generation: u64,
    device: DeviceHandle,
    observer: JoinHandle<()>,
    notifications: HashMap<(Uuid, Uuid), JoinHandle<()>>,
}

impl Session {
    /// Stop the session's background tasks and hand back the device.
    fn release(self, abort_observer: bool) -> DeviceHandle {
        for (_, task) in self.notifications {
            task.abort();
        }
        if abort_observer {
            self.observer.abort();
        }
        self.device
    }
}

struct Inner {
    state: ConnectionState,
    session: Option<Session>,
    generation: u64,
}

/// State shared between the manager and its background tasks.
struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    events: EventDispatcher,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate under the lock and publish the resulting snapshot.
    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.lock();
        let result = f(&mut inner);
        self.state_tx.send_replace(inner.state.clone());
        result
    }

    /// Put an error into the error slot and broadcast it.
    fn report(&self, err: &Error) {
        let message = err.to_string();
        warn!("{}", message);
        self.update(|inner| inner.state.last_error = Some(message.clone()));
        self.events.send(ConnectionEvent::Error { message });
    }

    /// End the session numbered `generation`, or whatever session is open
    /// when `generation` is `None`.
    ///
    /// Always leaves the state not connected with an empty service list.
    /// Returns the device of the session that was ended, if any.
    fn end_session(
        &self,
        generation: Option<u64>,
        reason: DisconnectReason,
        abort_observer: bool,
    ) -> Option<DeviceHandle> {
        let session = self.update(|inner| {
            let current = inner.session.as_ref().map(|s| s.generation);
            if generation.is_some() && generation != current {
                // A newer session owns the state now.
                return None;
            }
            let session = inner.session.take();
            inner.state.services.clear();
            if session.is_some() || inner.state.status != ConnectionStatus::Idle {
                inner.state.status = ConnectionStatus::Disconnected;
            }
            session
        })?;

        let device = session.release(abort_observer);
        info!(device = device.id(), ?reason, "Session closed");
        self.events.send(ConnectionEvent::Disconnected {
            device_id: device.id().to_string(),
            reason,
        });
        Some(device)
    }

    /// Store a read or notified value on the discovered characteristic.
    fn cache_value(&self, generation: u64, service: Uuid, characteristic: Uuid, value: &[u8]) {
        self.update(|inner| {
            if inner.session.as_ref().map(|s| s.generation) != Some(generation) {
                return;
            }
            if let Some(chr) = inner
                .state
                .services
                .iter_mut()
                .find(|s| s.uuid == service)
                .and_then(|s| s.characteristic_mut(&characteristic))
            {
                chr.value = Some(value.to_vec());
            }
        });
    }
}

/// Clears the scanning flag when a scan ends, however it ends.
struct ScanGuard<'a> {
    shared: &'a Shared,
}

impl<'a> ScanGuard<'a> {
    fn begin(shared: &'a Shared) -> Self {
        shared.update(|inner| {
            inner.state.scanning = true;
            inner.state.last_error = None;
        });
        shared.events.send(ConnectionEvent::ScanStarted);
        Self { shared }
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.shared.update(|inner| inner.state.scanning = false);
    }
}

/// Build the inspector's view of a host device.
fn describe(device: &dyn HostDevice) -> DeviceInfo {
    let mut info = DeviceInfo::new(device.id())
        .with_rssi(device.rssi())
        .with_services(device.advertised_services());
    info.name = device.name().map(str::to_string);
    info
}

/// Wait for the session's link to drop, then converge the state.
fn spawn_observer(shared: Weak<Shared>, device: DeviceHandle, generation: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        device.disconnected().await;
        if let Some(shared) = shared.upgrade() {
            shared.end_session(Some(generation), DisconnectReason::LinkLost, false);
        }
    })
}

/// Forward a characteristic's notifications into the state and event stream.
async fn forward_notifications(
    shared: Weak<Shared>,
    generation: u64,
    device_id: String,
    service: Uuid,
    characteristic: Uuid,
    mut stream: NotificationStream,
) {
    while let Some(value) = stream.next().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.cache_value(generation, service, characteristic, &value);
        let text = format_value(&value);
        debug!(%characteristic, %text, "Notification");
        shared.events.send(ConnectionEvent::Notification {
            device_id: device_id.clone(),
            service,
            characteristic,
            value,
            text,
        });
    }
    debug!(%characteristic, "Notification stream ended");
}

/// Manages the single GATT session of an inspector.
///
/// Construct one per application session and pass it by reference to
/// whatever needs it; there is no global instance.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use gattscope_core::{BtleHost, ConnectionManager, RequestOptions};
///
/// # async fn example() -> gattscope_core::Result<()> {
/// let host = BtleHost::new().await?;
/// let manager = ConnectionManager::new(Arc::new(host));
///
/// let device = manager.scan(RequestOptions::accept_all()).await?;
/// println!("Connected to {}", device);
/// for service in manager.services() {
///     println!("{}: {} characteristics", service.uuid, service.characteristics.len());
/// }
/// manager.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    host: Arc<dyn BluetoothHost>,
    shared: Arc<Shared>,
    recorder: Option<Arc<dyn DeviceRecorder>>,
    config: ManagerConfig,
}

impl ConnectionManager {
    /// Create a manager on top of a host.
    pub fn new(host: Arc<dyn BluetoothHost>) -> Self {
        Self::with_config(host, ManagerConfig::default())
    }

    /// Create a manager with custom configuration.
    pub fn with_config(host: Arc<dyn BluetoothHost>, config: ManagerConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ConnectionState::default(),
                session: None,
                generation: 0,
            }),
            state_tx,
            events: EventDispatcher::new(config.event_capacity),
        });
        Self {
            host,
            shared,
            recorder: None,
            config,
        }
    }

    /// Record every successful connection into `recorder`.
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn DeviceRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    // --- Observation ---

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state.clone()
    }

    /// Receive a snapshot after every state change.
    ///
    /// The receiver always holds the latest snapshot; dropping it
    /// unsubscribes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Receive discrete connection events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().state.is_connected()
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.lock().state.scanning
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().state.last_error.clone()
    }

    /// Empty the error slot.
    pub fn clear_error(&self) {
        self.shared.update(|inner| inner.state.last_error = None);
    }

    /// The current or last selected device.
    pub fn device(&self) -> Option<DeviceInfo> {
        self.shared.lock().state.device.clone()
    }

    /// Services from the last discovery.
    pub fn services(&self) -> Vec<ServiceInfo> {
        self.shared.lock().state.services.clone()
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // --- Lifecycle ---

    /// Ask the host for a device and connect to it.
    ///
    /// Must be called as the direct result of a user action; hosts with a
    /// permission model refuse device requests otherwise. The scanning flag
    /// is set for the duration of the call and cleared on every exit path,
    /// including cancellation of the returned future.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn scan(&self, options: RequestOptions) -> Result<DeviceInfo> {
        let _scanning = ScanGuard::begin(&self.shared);

        if let Err(err) = options.validate() {
            return self.fail(err);
        }

        let device = match self.host.request_device(&options).await {
            Ok(device) => device,
            Err(err) => return self.fail(err),
        };

        let info = describe(device.as_ref());
        info!("Selected {}", info);
        self.shared
            .events
            .send(ConnectionEvent::DeviceSelected { device: info });

        self.connect(device).await
    }

    /// Open a GATT session with `device`, discover its services and record
    /// the connection.
    ///
    /// Any session that is already open is closed first.
    #[tracing::instrument(level = "info", skip_all, fields(device = device.id()))]
    pub async fn connect(&self, device: DeviceHandle) -> Result<DeviceInfo> {
        if !device.has_gatt() {
            return self.fail(Error::GattUnsupported {
                device_id: device.id().to_string(),
            });
        }

        if let Some(previous) =
            self.shared
                .end_session(None, DisconnectReason::Replaced, true)
        {
            if let Err(err) = previous.disconnect().await {
                warn!("Failed to close previous session: {}", err);
            }
        }

        let mut info = describe(device.as_ref());
        self.shared.update(|inner| {
            inner.state.status = ConnectionStatus::Connecting;
            inner.state.device = Some(info.clone());
            inner.state.services.clear();
            inner.state.last_error = None;
        });

        info!("Connecting...");
        if let Err(err) = device.connect().await {
            self.shared
                .update(|inner| inner.state.status = ConnectionStatus::Disconnected);
            return self.fail(err);
        }

        info.last_seen = OffsetDateTime::now_utc();
        let weak = Arc::downgrade(&self.shared);
        let generation = self.shared.update(|inner| {
            inner.generation += 1;
            let generation = inner.generation;
            inner.session = Some(Session {
                generation,
                device: Arc::clone(&device),
                observer: spawn_observer(weak, Arc::clone(&device), generation),
                notifications: HashMap::new(),
            });
            inner.state.status = ConnectionStatus::Connected;
            inner.state.device = Some(info.clone());
            generation
        });
        info!("Connected to {}", info);
        self.shared
            .events
            .send(ConnectionEvent::Connected { device: info.clone() });

        if let Err(err) = self.discover_services().await {
            // Half-open sessions are torn down; the error slot is already set.
            if let Some(device) =
                self.shared
                    .end_session(Some(generation), DisconnectReason::UserRequested, true)
            {
                if let Err(close_err) = device.disconnect().await {
                    warn!("Failed to close session after discovery failed: {}", close_err);
                }
            }
            return Err(err);
        }

        let info = self.device().unwrap_or(info);
        if let Some(recorder) = &self.recorder {
            recorder.record_connection(&info);
        }
        Ok(info)
    }

    /// Enumerate the primary services of the connected device.
    ///
    /// Replaces the service list and back-fills the device's known service
    /// UUIDs. Characteristic values are not read.
    pub async fn discover_services(&self) -> Result<Vec<ServiceInfo>> {
        let Some((device, generation)) = self.session_device() else {
            return self.fail(Error::NotConnected);
        };

        info!("Discovering services...");
        let services = match device.primary_services().await {
            Ok(services) => services,
            Err(err) => return self.fail(err),
        };

        let applied = self.shared.update(|inner| {
            if inner.session.as_ref().map(|s| s.generation) != Some(generation) {
                return false;
            }
            inner.state.services = services.clone();
            if let Some(info) = inner.state.device.as_mut() {
                info.service_uuids = services.iter().map(|s| s.uuid).collect();
                info.last_seen = OffsetDateTime::now_utc();
            }
            inner.state.status = ConnectionStatus::ServicesDiscovered;
            true
        });
        if !applied {
            return self.fail(Error::NotConnected);
        }

        let characteristics: usize = services.iter().map(|s| s.characteristics.len()).sum();
        for service in &services {
            debug!("  Service: {}", service.uuid);
            for chr in &service.characteristics {
                debug!("    Characteristic: {} [{}]", chr.uuid, chr.properties);
            }
        }
        info!(
            "Found {} services with {} characteristics",
            services.len(),
            characteristics
        );
        self.shared.events.send(ConnectionEvent::ServicesDiscovered {
            device_id: device.id().to_string(),
            services: services.len(),
            characteristics,
        });

        Ok(services)
    }

    /// Close the session.
    ///
    /// With a live session the link is closed and the state converges to
    /// disconnected before this returns; the disconnect observer finds
    /// nothing left to do. Without one the same cleanup runs directly and
    /// the call succeeds.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn disconnect(&self) -> Result<()> {
        let Some(device) = self
            .shared
            .end_session(None, DisconnectReason::UserRequested, true)
        else {
            debug!("No session to close");
            return Ok(());
        };

        if device.is_connected().await {
            if let Err(err) = device.disconnect().await {
                return self.fail(err);
            }
        }
        Ok(())
    }

    /// Try to get back to a device from the history.
    ///
    /// Hosts cannot silently reconnect to a remembered peripheral, so this
    /// runs a device request filtered on what was stored and connects to
    /// whatever the host returns. If that turns out to be a different
    /// device, a warning is logged and the connection is kept.
    pub async fn connect_to_known_device(&self, known: &DeviceInfo) -> Result<DeviceInfo> {
        let options = RequestOptions::for_known_device(known)
            .scan_duration(self.config.known_device_scan_duration);
        let connected = self.scan(options).await?;
        if connected.id != known.id {
            warn!(
                "Asked for {} but the host returned {}",
                known.display_name(),
                connected
            );
        }
        Ok(connected)
    }

    // --- Characteristic operations ---

    /// Read a characteristic value.
    pub async fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        let (device, generation, properties) = self.characteristic_handle(service, characteristic)?;
        if !properties.read {
            return self.fail(Error::NotSupported {
                uuid: characteristic,
                operation: "read",
            });
        }

        let value = match device.read(service, characteristic).await {
            Ok(value) => value,
            Err(err) => return self.fail(err),
        };
        self.shared
            .cache_value(generation, service, characteristic, &value);
        Ok(value)
    }

    /// Read a characteristic value and render it for display.
    pub async fn read_characteristic_text(&self, service: Uuid, characteristic: Uuid) -> Result<String> {
        let value = self.read_characteristic(service, characteristic).await?;
        Ok(format_value(&value))
    }

    /// Write raw bytes to a characteristic.
    ///
    /// Uses an acknowledged write when the characteristic supports one.
    pub async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<()> {
        let (device, _, properties) = self.characteristic_handle(service, characteristic)?;
        if !properties.writable() {
            return self.fail(Error::NotSupported {
                uuid: characteristic,
                operation: "write",
            });
        }

        debug!(%characteristic, len = data.len(), "Writing");
        if let Err(err) = device
            .write(service, characteristic, data, properties.write)
            .await
        {
            return self.fail(err);
        }
        Ok(())
    }

    /// Write text to a characteristic.
    ///
    /// The text is sent as UTF-8. Hex strings are not decoded.
    pub async fn write_text(&self, service: Uuid, characteristic: Uuid, text: &str) -> Result<()> {
        self.write_characteristic(service, characteristic, &encode_text(text))
            .await
    }

    /// Subscribe to a characteristic.
    ///
    /// Pushed values arrive as [`ConnectionEvent::Notification`] and are
    /// cached on the characteristic.
    pub async fn start_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
        let (device, generation, properties) = self.characteristic_handle(service, characteristic)?;
        if !properties.subscribable() {
            return self.fail(Error::NotSupported {
                uuid: characteristic,
                operation: "notifications",
            });
        }
        if self.notifications_active(service, characteristic) {
            return self.fail(Error::NotificationsAlreadyActive {
                uuid: characteristic,
            });
        }

        let stream = match device.subscribe(service, characteristic).await {
            Ok(stream) => stream,
            Err(err) => return self.fail(err),
        };
        let task = tokio::spawn(forward_notifications(
            Arc::downgrade(&self.shared),
            generation,
            device.id().to_string(),
            service,
            characteristic,
            stream,
        ));

        let rejected = {
            let mut inner = self.shared.lock();
            match inner.session.as_mut() {
                Some(session) if session.generation == generation => {
                    if session.notifications.contains_key(&(service, characteristic)) {
                        Some((
                            task,
                            Error::NotificationsAlreadyActive {
                                uuid: characteristic,
                            },
                        ))
                    } else {
                        session
                            .notifications
                            .insert((service, characteristic), task);
                        None
                    }
                }
                _ => Some((task, Error::NotConnected)),
            }
        };
        if let Some((task, err)) = rejected {
            task.abort();
            return self.fail(err);
        }

        info!(%characteristic, "Notifications started");
        Ok(())
    }

    /// Unsubscribe from a characteristic.
    pub async fn stop_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
        let (device, _, _) = self.characteristic_handle(service, characteristic)?;

        let task = self
            .shared
            .lock()
            .session
            .as_mut()
            .and_then(|s| s.notifications.remove(&(service, characteristic)));
        let Some(task) = task else {
            return self.fail(Error::NotificationsNotActive {
                uuid: characteristic,
            });
        };
        task.abort();

        if let Err(err) = device.unsubscribe(service, characteristic).await {
            return self.fail(err);
        }
        info!(%characteristic, "Notifications stopped");
        Ok(())
    }

    /// Whether notifications are running for a characteristic.
    pub fn notifications_active(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.shared
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| s.notifications.contains_key(&(service, characteristic)))
    }

    // --- Internals ---

    /// Report an error through the error slot and return it.
    fn fail<T>(&self, err: Error) -> Result<T> {
        self.shared.report(&err);
        Err(err)
    }

    fn session_device(&self) -> Option<(DeviceHandle, u64)> {
        self.shared
            .lock()
            .session
            .as_ref()
            .map(|s| (Arc::clone(&s.device), s.generation))
    }

    /// Resolve a discovered characteristic on the live session.
    fn characteristic_handle(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(DeviceHandle, u64, CharacteristicProperties)> {
        let lookup = {
            let inner = self.shared.lock();
            match inner.session.as_ref() {
                None => Err(Error::NotConnected),
                Some(session) => inner
                    .state
                    .services
                    .iter()
                    .find(|s| s.uuid == service)
                    .ok_or(Error::ServiceNotFound { uuid: service })
                    .and_then(|s| {
                        s.characteristic(&characteristic)
                            .ok_or(Error::CharacteristicNotFound {
                                service,
                                uuid: characteristic,
                            })
                    })
                    .map(|chr| (Arc::clone(&session.device), session.generation, chr.properties)),
            }
        };
        lookup.or_else(|err| self.fail(err))
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let session = self.shared.lock().session.take();
        if let Some(session) = session {
            let device = session.release(true);
            warn!(
                "ConnectionManager dropped while connected to {}; call disconnect() first",
                device.id()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockDeviceBuilder, MockFailure, MockHost};
    use crate::scan::DeviceFilter;
    use crate::state::Route;
    use gattscope_types::uuid::{
        BATTERY_LEVEL, BATTERY_SERVICE, DEVICE_INFO_SERVICE, MANUFACTURER_NAME, NORDIC_UART_RX,
        NORDIC_UART_SERVICE, NORDIC_UART_TX,
    };

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Default)]
    struct Recorded(Mutex<Vec<DeviceInfo>>);

    impl DeviceRecorder for Recorded {
        fn record_connection(&self, device: &DeviceInfo) {
            self.0.lock().unwrap().push(device.clone());
        }
    }

    fn sample_device(id: &str, name: &str) -> MockDevice {
        MockDeviceBuilder::new(id)
            .name(name)
            .rssi(-60)
            .with_standard_services()
            .build()
    }

    fn manager_with(devices: &[MockDevice]) -> (ConnectionManager, Arc<MockHost>) {
        let host = Arc::new(MockHost::new());
        for device in devices {
            host.add_device(device.clone());
        }
        (ConnectionManager::new(host.clone()), host)
    }

    async fn wait_until(
        manager: &ConnectionManager,
        predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> ConnectionState {
        let mut rx = manager.subscribe_state();
        tokio::time::timeout(WAIT, rx.wait_for(predicate))
            .await
            .expect("state did not converge")
            .expect("manager dropped")
            .clone()
    }

    #[tokio::test]
    async fn test_scan_connects_and_discovers() {
        let device = sample_device("AA:01", "Thermo");
        let (manager, _host) = manager_with(&[device.clone()]);
        let recorded = Arc::new(Recorded::default());
        let manager = manager.with_recorder(recorded.clone());

        let info = manager.scan(RequestOptions::accept_all()).await.unwrap();

        assert_eq!(info.id, "AA:01");
        assert_eq!(info.name.as_deref(), Some("Thermo"));
        assert_eq!(info.rssi, Some(-60));
        assert!(info.distance.is_some());

        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::ServicesDiscovered);
        assert!(!state.scanning);
        assert!(state.last_error.is_none());
        assert_eq!(state.route(), Route::Dashboard);
        assert_eq!(state.services.len(), 3);
        assert!(device.is_connected_sync());

        // Discovered services are back-filled onto the device.
        let stored = state.device.unwrap();
        assert!(stored.service_uuids.contains(&BATTERY_SERVICE));
        assert!(stored.service_uuids.contains(&NORDIC_UART_SERVICE));

        let recorded = recorded.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].service_uuids, stored.service_uuids);
    }

    #[tokio::test]
    async fn test_scan_cancelled_reports_no_device_selected() {
        let (manager, host) = manager_with(&[sample_device("AA:01", "Thermo")]);
        host.fail_next_request(MockFailure::Cancelled);

        let err = manager.scan(RequestOptions::accept_all()).await.unwrap_err();

        assert!(err.is_cancellation());
        assert_eq!(manager.last_error().as_deref(), Some("No device selected"));
        assert!(!manager.is_scanning());
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_scan_permission_denied() {
        let (manager, host) = manager_with(&[sample_device("AA:01", "Thermo")]);
        host.fail_next_request(MockFailure::AccessDenied);

        manager.scan(RequestOptions::accept_all()).await.unwrap_err();

        assert_eq!(manager.last_error().as_deref(), Some("Bluetooth access denied"));
        assert!(!manager.is_scanning());
    }

    #[tokio::test]
    async fn test_scan_other_failure_surfaces_raw_message() {
        let (manager, host) = manager_with(&[sample_device("AA:01", "Thermo")]);
        host.fail_next_request(MockFailure::Message("Adapter is powered off".into()));

        manager.scan(RequestOptions::accept_all()).await.unwrap_err();

        assert_eq!(manager.last_error().as_deref(), Some("Adapter is powered off"));
    }

    #[tokio::test]
    async fn test_scan_without_match_is_a_cancellation() {
        let (manager, _host) = manager_with(&[sample_device("AA:01", "Thermo")]);

        let options = RequestOptions::new().filter(DeviceFilter::name("Other"));
        let err = manager.scan(options).await.unwrap_err();

        assert!(err.is_cancellation());
        assert!(!manager.is_scanning());
    }

    #[tokio::test]
    async fn test_scan_rejects_invalid_options() {
        let (manager, host) = manager_with(&[sample_device("AA:01", "Thermo")]);

        let err = manager.scan(RequestOptions::new()).await.unwrap_err();

        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(host.request_count(), 0);
        assert!(!manager.is_scanning());
    }

    #[tokio::test]
    async fn test_scanning_flag_visible_during_request() {
        let device = sample_device("AA:01", "Thermo");
        let (manager, host) = manager_with(&[device]);
        host.set_request_latency(Duration::from_millis(50));
        let manager = Arc::new(manager);

        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.scan(RequestOptions::accept_all()).await }
        });
        wait_until(&manager, |s| s.scanning).await;
        task.await.unwrap().unwrap();
        assert!(!manager.is_scanning());
    }

    #[tokio::test]
    async fn test_connect_rejects_device_without_gatt() {
        let device = MockDeviceBuilder::new("AA:02").without_gatt().build();
        let (manager, _host) = manager_with(&[]);

        let err = manager.connect(Arc::new(device.clone())).await.unwrap_err();

        assert!(matches!(err, Error::GattUnsupported { .. }));
        assert!(!manager.is_connected());
        assert_eq!(device.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let device = sample_device("AA:01", "Thermo");
        device.set_fail_connect(true);
        let (manager, _host) = manager_with(&[]);
        let recorded = Arc::new(Recorded::default());
        let manager = manager.with_recorder(recorded.clone());

        let err = manager.connect(Arc::new(device)).await.unwrap_err();

        assert!(matches!(err, Error::Host(_)));
        assert!(!manager.is_connected());
        assert_eq!(manager.state().status, ConnectionStatus::Disconnected);
        assert!(manager.last_error().is_some());
        assert!(recorded.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_failure_closes_session() {
        let device = sample_device("AA:01", "Thermo");
        device.set_fail_operations(true);
        let (manager, _host) = manager_with(&[]);
        let recorded = Arc::new(Recorded::default());
        let manager = manager.with_recorder(recorded.clone());
        let mut events = manager.subscribe_events();

        let err = manager.connect(Arc::new(device.clone())).await.unwrap_err();

        assert!(matches!(err, Error::Host(_)));
        assert!(!manager.is_connected());
        assert_eq!(manager.state().status, ConnectionStatus::Disconnected);
        assert_eq!(manager.state().route(), Route::Landing);
        assert!(manager.services().is_empty());
        assert!(manager.last_error().is_some());
        assert!(!device.is_connected_sync());
        assert!(recorded.0.lock().unwrap().is_empty());

        let mut disconnected = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ConnectionEvent::Disconnected { .. }) {
                disconnected = true;
            }
        }
        assert!(disconnected);

        // The manager is usable again once the device recovers.
        device.set_fail_operations(false);
        manager.connect(Arc::new(device.clone())).await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(recorded.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_discover_requires_session() {
        let (manager, _host) = manager_with(&[]);
        let err = manager.discover_services().await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(manager.last_error().as_deref(), Some("Not connected to device"));
    }

    #[tokio::test]
    async fn test_read_caches_value() {
        let device = sample_device("AA:01", "Thermo");
        let (manager, _host) = manager_with(&[device]);
        manager.scan(RequestOptions::accept_all()).await.unwrap();

        let value = manager
            .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
            .await
            .unwrap();
        assert_eq!(value, vec![85]);

        let text = manager
            .read_characteristic_text(DEVICE_INFO_SERVICE, MANUFACTURER_NAME)
            .await
            .unwrap();
        assert_eq!(text, "Acme Sensors");

        let services = manager.services();
        let battery = services.iter().find(|s| s.uuid == BATTERY_SERVICE).unwrap();
        assert_eq!(battery.characteristic(&BATTERY_LEVEL).unwrap().value, Some(vec![85]));
    }

    #[tokio::test]
    async fn test_read_binary_value_renders_hex() {
        let device = sample_device("AA:01", "Thermo");
        device.set_value(BATTERY_LEVEL, vec![0x00, 0x64]);
        let (manager, _host) = manager_with(&[device]);
        manager.scan(RequestOptions::accept_all()).await.unwrap();

        let text = manager
            .read_characteristic_text(BATTERY_SERVICE, BATTERY_LEVEL)
            .await
            .unwrap();
        assert_eq!(text, "00 64");
    }

    #[tokio::test]
    async fn test_operation_errors_use_both_channels() {
        let device = sample_device("AA:01", "Thermo");
        let (manager, _host) = manager_with(&[device.clone()]);
        manager.scan(RequestOptions::accept_all()).await.unwrap();

        let err = manager
            .read_characteristic(BATTERY_SERVICE, NORDIC_UART_TX)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
        assert_eq!(manager.last_error(), Some(err.to_string()));

        manager.clear_error();
        assert!(manager.last_error().is_none());

        device.set_fail_operations(true);
        let err = manager
            .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
            .await
            .unwrap_err();
        assert_eq!(manager.last_error(), Some(err.to_string()));
        // A failed read does not end the session.
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let (manager, _host) = manager_with(&[]);
        let err = manager
            .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        let err = manager
            .write_text(NORDIC_UART_SERVICE, NORDIC_UART_RX, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_write_text() {
        let device = sample_device("AA:01", "Thermo");
        let (manager, _host) = manager_with(&[device.clone()]);
        manager.scan(RequestOptions::accept_all()).await.unwrap();

        manager
            .write_text(NORDIC_UART_SERVICE, NORDIC_UART_RX, "AT+RST")
            .await
            .unwrap();

        let writes = device.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].characteristic, NORDIC_UART_RX);
        assert_eq!(writes[0].data, b"AT+RST".to_vec());
        assert!(writes[0].with_response);
    }

    #[tokio::test]
    async fn test_write_read_only_characteristic_fails() {
        let device = sample_device("AA:01", "Thermo");
        let (manager, _host) = manager_with(&[device.clone()]);
        manager.scan(RequestOptions::accept_all()).await.unwrap();

        let err = manager
            .write_characteristic(BATTERY_SERVICE, BATTERY_LEVEL, &[1])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported { operation: "write", .. }));
        assert!(device.writes().is_empty());
    }

    #[tokio::test]
    async fn test_notifications_flow() {
        let device = sample_device("AA:01", "Thermo");
        let (manager, _host) = manager_with(&[device.clone()]);
        manager.scan(RequestOptions::accept_all()).await.unwrap();
        let mut events = manager.subscribe_events();

        manager
            .start_notifications(NORDIC_UART_SERVICE, NORDIC_UART_TX)
            .await
            .unwrap();
        assert!(manager.notifications_active(NORDIC_UART_SERVICE, NORDIC_UART_TX));

        assert!(device.notify(NORDIC_UART_TX, b"ready".to_vec()));

        let event = tokio::time::timeout(WAIT, async {
            loop {
                if let ConnectionEvent::Notification { value, text, .. } = events.recv().await.unwrap() {
                    return (value, text);
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, (b"ready".to_vec(), "ready".to_string()));

        let state = wait_until(&manager, |s| {
            s.services
                .iter()
                .find(|svc| svc.uuid == NORDIC_UART_SERVICE)
                .and_then(|svc| svc.characteristic(&NORDIC_UART_TX))
                .is_some_and(|c| c.value.is_some())
        })
        .await;
        assert!(state.is_connected());

        let err = manager
            .start_notifications(NORDIC_UART_SERVICE, NORDIC_UART_TX)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotificationsAlreadyActive { .. }));

        manager
            .stop_notifications(NORDIC_UART_SERVICE, NORDIC_UART_TX)
            .await
            .unwrap();
        assert!(!manager.notifications_active(NORDIC_UART_SERVICE, NORDIC_UART_TX));
        assert!(!device.notify(NORDIC_UART_TX, b"late".to_vec()));

        let err = manager
            .stop_notifications(NORDIC_UART_SERVICE, NORDIC_UART_TX)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotificationsNotActive { .. }));
    }

    #[tokio::test]
    async fn test_notifications_require_capability() {
        let device = sample_device("AA:01", "Thermo");
        let (manager, _host) = manager_with(&[device]);
        manager.scan(RequestOptions::accept_all()).await.unwrap();

        let err = manager
            .start_notifications(DEVICE_INFO_SERVICE, MANUFACTURER_NAME)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotSupported {
                operation: "notifications",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_ok() {
        let (manager, _host) = manager_with(&[]);

        manager.disconnect().await.unwrap();

        assert!(!manager.is_connected());
        assert!(manager.last_error().is_none());
        assert_eq!(manager.state().status, ConnectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_live_session() {
        let device = sample_device("AA:01", "Thermo");
        let (manager, _host) = manager_with(&[device.clone()]);
        manager.scan(RequestOptions::accept_all()).await.unwrap();
        manager
            .start_notifications(NORDIC_UART_SERVICE, NORDIC_UART_TX)
            .await
            .unwrap();

        manager.disconnect().await.unwrap();

        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert!(state.services.is_empty());
        assert_eq!(state.route(), Route::Landing);
        assert!(!device.is_connected_sync());
        assert!(!manager.notifications_active(NORDIC_UART_SERVICE, NORDIC_UART_TX));

        // A second disconnect converges on the same state.
        manager.disconnect().await.unwrap();
        assert_eq!(manager.state().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_link_loss_converges_to_disconnected() {
        let device = sample_device("AA:01", "Thermo");
        let (manager, _host) = manager_with(&[device.clone()]);
        manager.scan(RequestOptions::accept_all()).await.unwrap();
        let mut events = manager.subscribe_events();

        device.simulate_link_loss();

        let state = wait_until(&manager, |s| !s.is_connected()).await;
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert!(state.services.is_empty());
        assert_eq!(state.route(), Route::Landing);

        let reason = tokio::time::timeout(WAIT, async {
            loop {
                if let ConnectionEvent::Disconnected { reason, .. } = events.recv().await.unwrap() {
                    return reason;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reason, DisconnectReason::LinkLost);

        // Same end state as an explicit disconnect.
        manager.disconnect().await.unwrap();
        assert_eq!(manager.state().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_new_connection_replaces_session() {
        let first = sample_device("AA:01", "Thermo");
        let second = sample_device("AA:02", "Hygro");
        let (manager, _host) = manager_with(&[]);

        manager.connect(Arc::new(first.clone())).await.unwrap();
        manager.connect(Arc::new(second.clone())).await.unwrap();

        assert!(!first.is_connected_sync());
        assert!(second.is_connected_sync());

        // The first session's link going away must not touch the second.
        first.simulate_link_loss();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let state = manager.state();
        assert!(state.is_connected());
        assert_eq!(state.device.unwrap().id, "AA:02");
    }

    #[tokio::test]
    async fn test_connect_to_known_device() {
        let device = sample_device("AA:01", "Thermo");
        let (manager, host) = manager_with(&[sample_device("AA:09", "Other"), device]);

        let known = DeviceInfo::new("AA:01")
            .with_name("Thermo")
            .with_services(vec![BATTERY_SERVICE]);
        let connected = manager.connect_to_known_device(&known).await.unwrap();

        assert_eq!(connected.id, "AA:01");
        let options = host.last_options().unwrap();
        assert_eq!(
            options.filters,
            vec![DeviceFilter::name("Thermo"), DeviceFilter::name_prefix("Thermo")]
        );
        assert_eq!(options.optional_services, vec![BATTERY_SERVICE]);
    }

    #[tokio::test]
    async fn test_connect_to_known_device_with_suffixed_name() {
        let (manager, _host) = manager_with(&[sample_device("AA:01", "Thermo 2F")]);

        let known = DeviceInfo::new("AA:01").with_name("Thermo");
        let connected = manager.connect_to_known_device(&known).await.unwrap();

        assert_eq!(connected.id, "AA:01");
        assert_eq!(connected.name.as_deref(), Some("Thermo 2F"));
    }

    #[tokio::test]
    async fn test_connect_to_known_device_accepts_different_id() {
        // Hosts may hand out a new identifier for the same peripheral.
        let (manager, _host) = manager_with(&[sample_device("BB:01", "Thermo")]);

        let known = DeviceInfo::new("AA:01").with_name("Thermo");
        let connected = manager.connect_to_known_device(&known).await.unwrap();

        assert_eq!(connected.id, "BB:01");
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_state_watch_sees_latest_value() {
        let (manager, _host) = manager_with(&[sample_device("AA:01", "Thermo")]);
        let rx = manager.subscribe_state();
        assert_eq!(rx.borrow().status, ConnectionStatus::Idle);

        manager.scan(RequestOptions::accept_all()).await.unwrap();
        assert_eq!(rx.borrow().status, ConnectionStatus::ServicesDiscovered);
    }
}

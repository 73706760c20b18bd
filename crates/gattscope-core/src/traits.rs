//! Trait abstractions over the host Bluetooth stack.
//!
//! The inspector never talks to a radio itself. Everything it knows about a
//! peripheral comes through [`BluetoothHost`] (the device chooser) and
//! [`HostDevice`] (one peripheral's GATT server). The btleplug backend in
//! [`crate::btle`] and the in-memory backend in [`crate::mock`] implement
//! both.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use gattscope_types::{DeviceInfo, ServiceInfo};

use crate::error::Result;
use crate::scan::RequestOptions;

/// Stream of raw values pushed by a subscribed characteristic.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// Shared handle to a peripheral returned by the host.
pub type DeviceHandle = Arc<dyn HostDevice>;

/// Entry point into the host Bluetooth stack.
#[async_trait]
pub trait BluetoothHost: Send + Sync {
    /// Ask the user to pick a device matching `options`.
    ///
    /// Hosts with a permission model only honour this when it directly
    /// follows a user action (a click or a command invocation). That
    /// precondition is the caller's responsibility; the host cannot check it.
    ///
    /// Returns [`Error::DeviceNotSelected`](crate::Error::DeviceNotSelected)
    /// when the chooser is dismissed or nothing matched, and
    /// [`Error::AccessDenied`](crate::Error::AccessDenied) when the host
    /// refuses Bluetooth access.
    async fn request_device(&self, options: &RequestOptions) -> Result<DeviceHandle>;
}

/// A peripheral handed out by a [`BluetoothHost`].
#[async_trait]
pub trait HostDevice: Send + Sync {
    // --- Identity ---

    /// Host-assigned identifier.
    fn id(&self) -> &str;

    /// Advertised local name, if any.
    fn name(&self) -> Option<&str>;

    /// Signal strength observed while choosing the device, if the host
    /// reports one.
    fn rssi(&self) -> Option<i16>;

    /// Service UUIDs seen in the device's advertisements.
    fn advertised_services(&self) -> Vec<Uuid>;

    /// Whether the device exposes a GATT server at all.
    fn has_gatt(&self) -> bool;

    // --- Connection ---

    /// Open a GATT session.
    async fn connect(&self) -> Result<()>;

    /// Close the GATT session.
    async fn disconnect(&self) -> Result<()>;

    /// Check whether a GATT session is currently open.
    async fn is_connected(&self) -> bool;

    /// Resolve once the session closes, whoever closed it.
    ///
    /// Returns immediately when no session is open.
    async fn disconnected(&self);

    // --- GATT ---

    /// Enumerate primary services and their characteristics.
    ///
    /// Only capability flags are collected; no values are read.
    async fn primary_services(&self) -> Result<Vec<ServiceInfo>>;

    /// Read a characteristic value.
    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Write a characteristic value.
    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<()>;

    /// Enable notifications or indications and return the value stream.
    async fn subscribe(&self, service: Uuid, characteristic: Uuid) -> Result<NotificationStream>;

    /// Disable notifications or indications.
    async fn unsubscribe(&self, service: Uuid, characteristic: Uuid) -> Result<()>;
}

/// Sink for successful connections, typically the device history.
pub trait DeviceRecorder: Send + Sync {
    /// Record that `device` was just connected.
    fn record_connection(&self, device: &DeviceInfo);
}

//! Persisted history of connected devices.
//!
//! [`DeviceHistory`] keeps at most [`DEFAULT_CAPACITY`] entries, newest
//! first, one per device id. Reconnecting a known device bumps its counter
//! and timestamp but leaves its position alone; the list is only ever
//! reordered by eviction from the tail. Favorites are not protected from
//! eviction.
//!
//! Every mutation rewrites the whole list as JSON under [`HISTORY_KEY`].
//! Storage problems never reach the caller: a history that cannot be loaded
//! starts empty, and a save that fails is logged and dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use gattscope_core::DeviceRecorder;
use gattscope_types::DeviceInfo;
use gattscope_types::uuid::format_uuid;

use crate::error::Result;
use crate::kv::KvStore;

/// Maximum number of entries kept by default.
pub const DEFAULT_CAPACITY: usize = 50;

/// Storage key holding the serialized history.
pub const HISTORY_KEY: &str = "device_history";

/// A device the user has connected to before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceHistoryEntry {
    pub device: DeviceInfo,
    pub is_favorite: bool,
    pub connection_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub last_connected: OffsetDateTime,
}

impl DeviceHistoryEntry {
    pub fn id(&self) -> &str {
        &self.device.id
    }
}

/// Bounded, persisted device history.
pub struct DeviceHistory {
    entries: Vec<DeviceHistoryEntry>,
    capacity: usize,
    store: Box<dyn KvStore>,
}

impl std::fmt::Debug for DeviceHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHistory")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl DeviceHistory {
    /// Load the history from `store` with the default capacity.
    pub fn load(store: Box<dyn KvStore>) -> Self {
        Self::with_capacity(store, DEFAULT_CAPACITY)
    }

    /// Load the history from `store`, keeping at most `capacity` entries.
    pub fn with_capacity(store: Box<dyn KvStore>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut entries = match read_entries(store.as_ref()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to load device history, starting empty: {}", e);
                Vec::new()
            }
        };

        // Tolerate hand-edited or older data.
        let mut seen = std::collections::HashSet::new();
        entries.retain(|entry| seen.insert(entry.device.id.clone()));
        entries.truncate(capacity);
        debug!("Loaded {} history entries", entries.len());

        Self {
            entries,
            capacity,
            store,
        }
    }

    /// Record a connection to `device` now.
    pub fn add_device(&mut self, device: DeviceInfo) {
        self.add_device_at(device, OffsetDateTime::now_utc());
    }

    /// Record a connection to `device` at `at`.
    ///
    /// A known device has its info, counter and timestamp updated in place.
    /// A new device goes to the front; the oldest entries beyond capacity
    /// are dropped.
    pub fn add_device_at(&mut self, device: DeviceInfo, at: OffsetDateTime) {
        match self.entries.iter_mut().find(|e| e.device.id == device.id) {
            Some(entry) => {
                entry.connection_count = entry.connection_count.saturating_add(1);
                entry.last_connected = at;
                entry.device = device;
            }
            None => {
                self.entries.insert(
                    0,
                    DeviceHistoryEntry {
                        device,
                        is_favorite: false,
                        connection_count: 1,
                        last_connected: at,
                    },
                );
                if self.entries.len() > self.capacity {
                    for evicted in self.entries.drain(self.capacity..) {
                        debug!("Evicting {} from history", evicted.device.id);
                    }
                }
            }
        }
        self.save();
    }

    /// Flip the favorite flag of `id`.
    ///
    /// Returns the new flag, or `None` if `id` is not in the history.
    pub fn toggle_favorite(&mut self, id: &str) -> Option<bool> {
        let entry = self.entries.iter_mut().find(|e| e.device.id == id)?;
        entry.is_favorite = !entry.is_favorite;
        let favorite = entry.is_favorite;
        self.save();
        Some(favorite)
    }

    /// Remove `id`. Returns whether an entry was removed.
    pub fn remove_device(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.device.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.save();
        }
        removed
    }

    /// Remove every entry.
    pub fn clear_history(&mut self) {
        self.entries.clear();
        self.save();
    }

    /// Favorite entries in stored order.
    pub fn favorites(&self) -> Vec<&DeviceHistoryEntry> {
        self.entries.iter().filter(|e| e.is_favorite).collect()
    }

    /// Up to `limit` entries, most recently connected first.
    ///
    /// The stored order is not affected.
    pub fn recent_devices(&self, limit: usize) -> Vec<&DeviceHistoryEntry> {
        let mut recent: Vec<&DeviceHistoryEntry> = self.entries.iter().collect();
        recent.sort_by(|a, b| b.last_connected.cmp(&a.last_connected));
        recent.truncate(limit);
        recent
    }

    pub fn get(&self, id: &str) -> Option<&DeviceHistoryEntry> {
        self.entries.iter().find(|e| e.device.id == id)
    }

    /// All entries in stored order.
    pub fn entries(&self) -> &[DeviceHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Serialize the history as pretty-printed JSON.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    /// Serialize the history as CSV with a header row.
    pub fn export_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for entry in &self.entries {
            writer.serialize(CsvRow::from(entry))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn save(&self) {
        let json = match serde_json::to_string(&self.entries) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize device history: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(HISTORY_KEY, &json) {
            warn!("Failed to save device history: {}", e);
        }
    }
}

fn read_entries(store: &dyn KvStore) -> Result<Vec<DeviceHistoryEntry>> {
    match store.get(HISTORY_KEY)? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    name: &'a str,
    favorite: bool,
    connection_count: u32,
    last_connected: String,
    rssi: Option<i16>,
    services: String,
}

impl<'a> From<&'a DeviceHistoryEntry> for CsvRow<'a> {
    fn from(entry: &'a DeviceHistoryEntry) -> Self {
        let last_connected = entry
            .last_connected
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        let services = entry
            .device
            .service_uuids
            .iter()
            .map(format_uuid)
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            id: &entry.device.id,
            name: entry.device.name.as_deref().unwrap_or(""),
            favorite: entry.is_favorite,
            connection_count: entry.connection_count,
            last_connected,
            rssi: entry.device.rssi,
            services,
        }
    }
}

/// A [`DeviceHistory`] shared between the connection manager and a front end.
#[derive(Debug, Clone)]
pub struct SharedHistory {
    inner: Arc<Mutex<DeviceHistory>>,
}

impl SharedHistory {
    pub fn new(history: DeviceHistory) -> Self {
        Self {
            inner: Arc::new(Mutex::new(history)),
        }
    }

    /// Lock the history for direct access.
    pub fn lock(&self) -> MutexGuard<'_, DeviceHistory> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn entries(&self) -> Vec<DeviceHistoryEntry> {
        self.lock().entries().to_vec()
    }

    pub fn favorites(&self) -> Vec<DeviceHistoryEntry> {
        self.lock().favorites().into_iter().cloned().collect()
    }

    pub fn recent_devices(&self, limit: usize) -> Vec<DeviceHistoryEntry> {
        self.lock()
            .recent_devices(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<DeviceHistoryEntry> {
        self.lock().get(id).cloned()
    }
}

impl DeviceRecorder for SharedHistory {
    fn record_connection(&self, device: &DeviceInfo) {
        self.lock().add_device(device.clone());
    }
}

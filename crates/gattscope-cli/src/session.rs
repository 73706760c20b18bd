//! Opening the device history and connecting to a device.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gattscope_core::uuid::parse_uuid;
use gattscope_core::{
    BluetoothHost, BtleHost, ConnectionManager, DEFAULT_SCAN_DURATION, DeviceFilter,
    ManagerConfig, RequestOptions,
};
use gattscope_store::{
    DEFAULT_CAPACITY, DeviceHistory, DeviceHistoryEntry, SharedHistory, SqliteKv,
    default_db_path,
};
use gattscope_types::DeviceInfo;
use indicatif::ProgressBar;
use tracing::{debug, warn};

use crate::chooser::TerminalChooser;
use crate::cli::TargetArgs;
use crate::config::{Config, update_last_device};
use crate::style;

/// Settings shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub no_color: bool,
    pub database: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

/// Open the device history, sized and located per config.
pub fn open_history(opts: &GlobalOptions, config: &Config) -> Result<SharedHistory> {
    let path = opts
        .database
        .clone()
        .or_else(|| config.database.clone())
        .unwrap_or_else(default_db_path);
    debug!("Using device history at {}", path.display());

    let store = SqliteKv::open(&path)
        .with_context(|| format!("Failed to open device history at {}", path.display()))?;
    let capacity = config.history_capacity.unwrap_or(DEFAULT_CAPACITY);
    Ok(SharedHistory::new(DeviceHistory::with_capacity(
        Box::new(store),
        capacity,
    )))
}

/// Look a remembered device up by identifier, then by name.
pub fn find_entry(history: &SharedHistory, query: &str) -> Option<DeviceHistoryEntry> {
    history.get(query).or_else(|| {
        history
            .entries()
            .into_iter()
            .find(|entry| entry.device.name.as_deref() == Some(query))
    })
}

/// What to connect to.
#[derive(Debug)]
pub enum Target {
    /// A device from the history.
    Known(DeviceInfo),
    /// A fresh device request.
    Request(RequestOptions),
}

/// Decide what to connect to from the command line and config.
pub fn resolve_target(
    target: &TargetArgs,
    config: &Config,
    history: &SharedHistory,
) -> Result<Target> {
    if let Some(query) = &target.device {
        return Ok(match find_entry(history, query) {
            Some(entry) => Target::Known(entry.device),
            None => {
                debug!("{} is not in the history; requesting it by name", query);
                Target::Request(RequestOptions::new().filter(DeviceFilter::name(query.clone())))
            }
        });
    }

    if target.has_filters() {
        let services = target
            .services
            .iter()
            .map(|s| parse_uuid(s).with_context(|| format!("Invalid service filter: {}", s)))
            .collect::<Result<Vec<_>>>()?;
        let filter = DeviceFilter {
            name: target.name.clone(),
            name_prefix: target.prefix.clone(),
            services,
        };
        return Ok(Target::Request(RequestOptions::new().filter(filter)));
    }

    if !target.all && !config.accept_all_devices {
        if let Some(entry) = config
            .last_device
            .as_deref()
            .and_then(|id| history.get(id))
        {
            return Ok(Target::Known(entry.device));
        }
    }

    Ok(Target::Request(RequestOptions::accept_all()))
}

/// A connection manager wired to the device history.
pub struct DeviceSession {
    manager: ConnectionManager,
    progress: ProgressBar,
    scan_duration: Duration,
    config_path: Option<PathBuf>,
    quiet: bool,
}

impl DeviceSession {
    /// Open the Bluetooth adapter.
    pub async fn open(
        history: SharedHistory,
        opts: &GlobalOptions,
        config: &Config,
        timeout: Option<u64>,
    ) -> Result<Self> {
        let progress = ProgressBar::hidden();
        let host = BtleHost::new()
            .await
            .context("Failed to access the Bluetooth adapter")?
            .with_chooser(Arc::new(TerminalChooser::new(progress.clone())));

        let mut session = Self::with_host(Arc::new(host), history, scan_duration(timeout, config));
        session.progress = progress;
        session.config_path = Some(Config::path());
        session.quiet = opts.quiet;
        Ok(session)
    }

    /// Build a session over any host. The last device is not remembered.
    pub fn with_host(host: Arc<dyn BluetoothHost>, history: SharedHistory, scan_duration: Duration) -> Self {
        let manager_config = ManagerConfig {
            known_device_scan_duration: scan_duration,
            ..Default::default()
        };
        let manager =
            ConnectionManager::with_config(host, manager_config).with_recorder(Arc::new(history));
        Self {
            manager,
            progress: ProgressBar::hidden(),
            scan_duration,
            config_path: None,
            quiet: true,
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Connect to the target and enumerate its services.
    pub async fn connect(&self, target: Target) -> Result<DeviceInfo> {
        if !self.quiet {
            style::start_spinner(
                &self.progress,
                format!("Scanning for devices... ({}s)", self.scan_duration.as_secs()),
            );
        }

        let result = match target {
            Target::Known(device) => {
                debug!("Reconnecting to remembered device {}", device);
                self.manager.connect_to_known_device(&device).await
            }
            Target::Request(options) => {
                self.manager
                    .scan(options.scan_duration(self.scan_duration))
                    .await
            }
        };
        self.progress.finish_and_clear();

        let device = result?;
        if let Some(path) = &self.config_path {
            if let Err(e) = update_last_device(path, &device.id, device.name.as_deref()) {
                warn!("Failed to remember last device: {}", e);
            }
        }
        Ok(device)
    }

    /// Close the session, logging rather than failing.
    pub async fn close(&self) {
        if let Err(e) = self.manager.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
    }
}

/// Scan duration from the flag, then config, then the default.
pub fn scan_duration(timeout: Option<u64>, config: &Config) -> Duration {
    timeout
        .or(config.scan_timeout)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SCAN_DURATION)
}

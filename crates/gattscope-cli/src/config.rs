//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// How long a device request scans, in seconds
    #[serde(default)]
    pub scan_timeout: Option<u64>,

    /// Maximum number of remembered devices
    #[serde(default)]
    pub history_capacity: Option<usize>,

    /// Device history database location
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Offer every nearby device when no filter is given
    #[serde(default)]
    pub accept_all_devices: bool,

    /// Last successfully connected device (auto-updated)
    #[serde(default)]
    pub last_device: Option<String>,

    /// Name of the last connected device (for display)
    #[serde(default)]
    pub last_device_name: Option<String>,
}

impl Config {
    /// Get the config file path.
    ///
    /// `GATTSCOPE_CONFIG` overrides the platform location.
    pub fn path() -> PathBuf {
        if let Some(path) = std::env::var_os("GATTSCOPE_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gattscope")
            .join("config.toml")
    }

    /// Load config from file, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Set a key from its command-line spelling.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "scan_timeout" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid scan_timeout: {}", value))?;
                if secs == 0 {
                    bail!("scan_timeout must be at least 1 second");
                }
                self.scan_timeout = Some(secs);
            }
            "history_capacity" => {
                let capacity: usize = value
                    .parse()
                    .with_context(|| format!("Invalid history_capacity: {}", value))?;
                if capacity == 0 {
                    bail!("history_capacity must be at least 1");
                }
                self.history_capacity = Some(capacity);
            }
            "database" => self.database = Some(PathBuf::from(value)),
            "accept_all_devices" => {
                self.accept_all_devices = value
                    .parse()
                    .with_context(|| format!("Invalid accept_all_devices: {} (use true/false)", value))?;
            }
            _ => bail!(
                "Unknown key: {}. Valid keys: scan_timeout, history_capacity, database, accept_all_devices",
                key
            ),
        }
        Ok(())
    }

    /// Reset a key to its default.
    pub fn unset(&mut self, key: &str) -> Result<()> {
        match key {
            "scan_timeout" => self.scan_timeout = None,
            "history_capacity" => self.history_capacity = None,
            "database" => self.database = None,
            "accept_all_devices" => self.accept_all_devices = false,
            "last_device" => {
                self.last_device = None;
                self.last_device_name = None;
            }
            _ => bail!("Unknown key: {}", key),
        }
        Ok(())
    }
}

/// Remember the device that was just connected.
pub fn update_last_device(path: &Path, identifier: &str, name: Option<&str>) -> Result<()> {
    let mut config = Config::load_from(path);
    config.last_device = Some(identifier.to_string());
    config.last_device_name = name.map(|n| n.to_string());
    config.save_to(path)
}

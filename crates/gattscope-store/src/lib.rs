//! Local persistence for the gattscope BLE inspector.
//!
//! This crate keeps the history of devices the user has connected to. The
//! history is small, so it is stored as a single JSON document in a
//! key-value table rather than as relational rows.
//!
//! # Features
//!
//! - Bounded history (50 entries by default), newest first
//! - Favorites and per-device connection counters
//! - "Recent N" view sorted by last connection
//! - JSON and CSV export
//! - SQLite or in-memory storage behind the [`KvStore`] trait
//!
//! # Example
//!
//! ```no_run
//! use gattscope_store::{DeviceHistory, SqliteKv};
//!
//! let store = SqliteKv::open_default()?;
//! let history = DeviceHistory::load(Box::new(store));
//!
//! for entry in history.recent_devices(5) {
//!     println!("{} ({} connections)", entry.device, entry.connection_count);
//! }
//! # Ok::<(), gattscope_store::Error>(())
//! ```

mod error;
mod history;
mod kv;

pub use error::{Error, Result};
pub use history::{DEFAULT_CAPACITY, DeviceHistory, DeviceHistoryEntry, HISTORY_KEY, SharedHistory};
pub use kv::{KvStore, MemoryKv, SCHEMA_VERSION, SqliteKv};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/gattscope/data.db`
/// - macOS: `~/Library/Application Support/gattscope/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\gattscope\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("gattscope")
        .join("data.db")
}

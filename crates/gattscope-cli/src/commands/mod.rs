//! Command implementations for the CLI.

mod config;
mod gatt;
mod history;
mod inspect;

pub use config::cmd_config;
pub use gatt::{NotifyArgs, cmd_notify, cmd_read, cmd_write, parse_characteristic};
pub use history::cmd_history;
pub use inspect::{cmd_inspect, known_target};

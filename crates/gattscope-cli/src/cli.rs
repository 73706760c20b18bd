//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Export format for the device history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

/// How to find the device to talk to.
///
/// `--device` names a remembered device (by identifier or name). The filter
/// flags build a fresh device request; several flags combine into one
/// filter. With nothing given, the last connected device is used, and
/// failing that every nearby device is offered.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// Remembered device (identifier or name), or use GATTSCOPE_DEVICE env var
    #[arg(short, long, env = "GATTSCOPE_DEVICE")]
    pub device: Option<String>,

    /// Only offer devices advertising exactly this name
    #[arg(long, conflicts_with = "device")]
    pub name: Option<String>,

    /// Only offer devices whose name starts with this prefix
    #[arg(long, conflicts_with = "device")]
    pub prefix: Option<String>,

    /// Only offer devices advertising this service (repeatable)
    #[arg(long = "service-filter", value_name = "UUID", conflicts_with = "device")]
    pub services: Vec<String>,

    /// Offer every nearby device
    #[arg(long, conflicts_with_all = ["device", "name", "prefix", "services"])]
    pub all: bool,

    /// Scan duration in seconds (overrides config)
    #[arg(short = 'T', long)]
    pub timeout: Option<u64>,
}

impl TargetArgs {
    /// Whether any request filter was given on the command line.
    pub fn has_filters(&self) -> bool {
        self.name.is_some() || self.prefix.is_some() || !self.services.is_empty()
    }
}

/// A characteristic addressed by service and characteristic UUID.
#[derive(Debug, Clone, Args)]
pub struct CharacteristicArgs {
    /// Service UUID (16-bit like 180f, or full form)
    pub service: String,

    /// Characteristic UUID (16-bit like 2a19, or full form)
    pub characteristic: String,
}

#[derive(Parser)]
#[command(name = "gattscope")]
#[command(author, version, about = "Inspector for Bluetooth Low Energy GATT devices", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Device history database (overrides config)
    #[arg(long, global = true, env = "GATTSCOPE_DB", value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request a device, connect and list its GATT services
    Scan {
        #[command(flatten)]
        target: TargetArgs,

        /// Read every readable characteristic before printing
        #[arg(short = 'r', long)]
        read_values: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Reconnect to a remembered device and list its GATT services
    Connect {
        /// Remembered device (identifier or name); defaults to the last one
        #[arg(env = "GATTSCOPE_DEVICE")]
        device: Option<String>,

        /// Scan duration in seconds (overrides config)
        #[arg(short = 'T', long)]
        timeout: Option<u64>,

        /// Read every readable characteristic before printing
        #[arg(short = 'r', long)]
        read_values: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Read a characteristic value
    Read {
        #[command(flatten)]
        characteristic: CharacteristicArgs,

        #[command(flatten)]
        target: TargetArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a value to a characteristic
    Write {
        #[command(flatten)]
        characteristic: CharacteristicArgs,

        /// Value to write; sent as UTF-8 text unless --hex is given
        value: String,

        /// Interpret the value as hex bytes ("01 ff 2a")
        #[arg(long)]
        hex: bool,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Subscribe to a characteristic and print pushed values
    Notify {
        #[command(flatten)]
        characteristic: CharacteristicArgs,

        #[command(flatten)]
        target: TargetArgs,

        /// Stop after this many values (0 waits for Ctrl+C)
        #[arg(short = 'n', long, default_value = "0")]
        count: usize,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Output format (json prints one object per line)
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Inspect and manage remembered devices
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum HistoryAction {
    /// List all remembered devices, most recently added first
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// List favorite devices
    Favorites {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// List the most recently connected devices
    Recent {
        /// Number of devices to show
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Toggle the favorite flag of a device
    Favorite {
        /// Device identifier or name
        device: String,
    },
    /// Forget a device
    Remove {
        /// Device identifier or name
        device: String,
    },
    /// Forget every device
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Export the history
    Export {
        /// Export format
        #[arg(short, long, value_enum, default_value = "json")]
        format: ExportFormat,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Set a configuration value
    Set {
        /// Key to set (scan_timeout, history_capacity, database, accept_all_devices)
        key: String,
        /// Value to set
        value: String,
    },
    /// Clear a configuration value
    Unset {
        /// Key to clear
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_write_with_hex() {
        let cli = Cli::try_parse_from([
            "gattscope", "write", "180f", "2a19", "01 02", "--hex", "--name", "Thermo",
        ])
        .unwrap();
        match cli.command {
            Commands::Write {
                characteristic,
                value,
                hex,
                target,
            } => {
                assert_eq!(characteristic.service, "180f");
                assert_eq!(characteristic.characteristic, "2a19");
                assert_eq!(value, "01 02");
                assert!(hex);
                assert_eq!(target.name.as_deref(), Some("Thermo"));
                assert!(target.has_filters());
            }
            _ => panic!("expected write"),
        }
    }

    #[test]
    fn test_all_conflicts_with_filters() {
        let result = Cli::try_parse_from(["gattscope", "scan", "--all", "--prefix", "Th"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_history_defaults_to_list() {
        let cli = Cli::try_parse_from(["gattscope", "history"]).unwrap();
        assert!(matches!(cli.command, Commands::History { action: None }));
    }

    #[test]
    fn test_global_database_flag() {
        let cli =
            Cli::try_parse_from(["gattscope", "history", "list", "--database", "/tmp/x.db"])
                .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/x.db")));
    }
}

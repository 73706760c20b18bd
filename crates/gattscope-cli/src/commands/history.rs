//! History command implementation.
//!
//! Lists and edits the devices remembered from earlier connections.

use anyhow::{Result, bail};
use gattscope_store::{DeviceHistoryEntry, SharedHistory};

use crate::cli::{ExportFormat, HistoryAction, OutputFormat};
use crate::format::{format_history_json, format_history_text};
use crate::session::{GlobalOptions, find_entry};
use crate::style;
use crate::util::{confirm, write_output};

pub fn cmd_history(
    history: &SharedHistory,
    action: HistoryAction,
    opts: &GlobalOptions,
) -> Result<()> {
    match action {
        HistoryAction::List { format } => print_entries(&history.entries(), format, opts),
        HistoryAction::Favorites { format } => print_entries(&history.favorites(), format, opts),
        HistoryAction::Recent { limit, format } => {
            print_entries(&history.recent_devices(limit), format, opts)
        }
        HistoryAction::Favorite { device } => {
            let entry = require_entry(history, &device)?;
            let is_favorite = history.lock().toggle_favorite(entry.id());
            if !opts.quiet {
                let message = match is_favorite {
                    Some(true) => format!("Marked {} as favorite", entry.device),
                    _ => format!("Removed {} from favorites", entry.device),
                };
                eprintln!("{}", style::format_success(&message, opts.no_color));
            }
            Ok(())
        }
        HistoryAction::Remove { device } => {
            let entry = require_entry(history, &device)?;
            history.lock().remove_device(entry.id());
            if !opts.quiet {
                eprintln!(
                    "{}",
                    style::format_success(&format!("Forgot {}", entry.device), opts.no_color)
                );
            }
            Ok(())
        }
        HistoryAction::Clear { yes } => {
            let count = history.lock().len();
            if count == 0 {
                if !opts.quiet {
                    eprintln!("{}", style::format_info("History is already empty", opts.no_color));
                }
                return Ok(());
            }
            if !yes && !confirm(&format!("Forget all {} devices?", count))? {
                return Ok(());
            }
            history.lock().clear_history();
            if !opts.quiet {
                eprintln!(
                    "{}",
                    style::format_success(&format!("Forgot {} devices", count), opts.no_color)
                );
            }
            Ok(())
        }
        HistoryAction::Export { format } => {
            let content = {
                let guard = history.lock();
                match format {
                    ExportFormat::Json => guard.export_json()?,
                    ExportFormat::Csv => guard.export_csv()?,
                }
            };
            write_output(opts.output.as_ref(), &content)
        }
    }
}

fn require_entry(history: &SharedHistory, device: &str) -> Result<DeviceHistoryEntry> {
    match find_entry(history, device) {
        Some(entry) => Ok(entry),
        None => bail!("'{}' is not in the device history", device),
    }
}

fn print_entries(
    entries: &[DeviceHistoryEntry],
    format: OutputFormat,
    opts: &GlobalOptions,
) -> Result<()> {
    let content = match format {
        OutputFormat::Json => format_history_json(entries)?,
        OutputFormat::Text if entries.is_empty() => {
            if !opts.quiet {
                eprintln!("No devices found.");
                eprintln!();
                eprintln!("Devices are remembered after connecting with: gattscope scan");
            }
            return Ok(());
        }
        OutputFormat::Text => format_history_text(entries, opts.no_color),
    };
    write_output(opts.output.as_ref(), &content)
}

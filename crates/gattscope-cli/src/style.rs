//! Visual styling utilities for the CLI.
//!
//! Spinners for device requests, status line prefixes, property and signal
//! rendering, and table styling.

use std::time::Duration;

use gattscope_types::CharacteristicProperties;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;

/// Standard spinner tick characters (Braille dots animation)
const SPINNER_TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Standard spinner tick interval
const SPINNER_TICK_MS: u64 = 80;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_TICK_CHARS)
}

/// Turn a hidden progress bar into a visible spinner on stderr.
///
/// The device request spinner is created hidden up front so the chooser
/// can hold on to it and suspend it while prompting.
pub fn start_spinner(pb: &ProgressBar, message: impl Into<String>) {
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(spinner_style());
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
}

/// Format a success message.
pub fn format_success(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[OK] {}", message)
    } else {
        format!("{} {}", "[OK]".green(), message)
    }
}

/// Format an info message.
pub fn format_info(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[--] {}", message)
    } else {
        format!("{} {}", "[--]".cyan(), message)
    }
}

/// Format a warning message.
pub fn format_warning(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[!!] {}", message)
    } else {
        format!("{} {}", "[!!]".yellow(), message)
    }
}

/// Format RSSI as a visual signal bar.
/// RSSI typically ranges from -100 dBm (weak) to -30 dBm (strong).
pub fn format_signal_bar(rssi: Option<i16>, no_color: bool) -> String {
    let rssi = match rssi {
        Some(r) => r,
        None => return "N/A".to_string(),
    };

    // -30 dBm = excellent (10), -100 dBm = very weak (0)
    let strength = ((rssi + 100).clamp(0, 70) as f32 / 7.0).round() as usize;
    let filled = strength.min(10);
    let empty = 10 - filled;

    let bar = format!("{}{}", "█".repeat(filled), "░".repeat(empty));

    if no_color {
        format!("{} {:>3}", bar, rssi)
    } else if filled >= 7 {
        format!("{} {:>3}", bar.green(), rssi)
    } else if filled >= 4 {
        format!("{} {:>3}", bar.yellow(), rssi)
    } else {
        format!("{} {:>3}", bar.red(), rssi)
    }
}

/// Render characteristic properties, highlighting the interactive ones.
pub fn format_properties(properties: &CharacteristicProperties, no_color: bool) -> String {
    let plain = properties.to_string();
    if no_color {
        plain
    } else if properties.subscribable() {
        plain.magenta().to_string()
    } else if properties.writable() {
        plain.yellow().to_string()
    } else {
        plain
    }
}

/// Apply the standard rounded table style.
pub fn apply_table_style(table: &mut tabled::Table) {
    use tabled::settings::Style;
    table.with(Style::rounded());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_prefixes_without_color() {
        assert_eq!(format_success("Done", true), "[OK] Done");
        assert_eq!(format_info("Note", true), "[--] Note");
        assert_eq!(format_warning("Careful", true), "[!!] Careful");
    }

    #[test]
    fn test_signal_bar() {
        assert_eq!(format_signal_bar(None, true), "N/A");
        assert_eq!(format_signal_bar(Some(-30), true), "██████████ -30");
        assert_eq!(format_signal_bar(Some(-100), true), "░░░░░░░░░░ -100");
        assert_eq!(format_signal_bar(Some(-65), true), "█████░░░░░ -65");
    }

    #[test]
    fn test_properties_without_color() {
        let properties = CharacteristicProperties {
            read: true,
            notify: true,
            ..Default::default()
        };
        assert_eq!(format_properties(&properties, true), "read,notify");
        assert_eq!(format_properties(&CharacteristicProperties::default(), true), "-");
    }
}

//! Interactive device picker.

use std::io::{self, IsTerminal};

use dialoguer::Select;
use dialoguer::theme::ColorfulTheme;
use gattscope_core::{DeviceChooser, StrongestSignal};
use gattscope_types::DeviceInfo;
use indicatif::ProgressBar;
use tracing::warn;

/// Lets the user pick one of the matching devices in the terminal.
///
/// A lone candidate is taken without asking. Without a terminal (pipes,
/// scripts) the strongest signal wins. Pressing Esc or `q` in the prompt
/// cancels the request.
pub struct TerminalChooser {
    progress: ProgressBar,
}

impl TerminalChooser {
    /// `progress` is suspended while the prompt is on screen.
    pub fn new(progress: ProgressBar) -> Self {
        Self { progress }
    }
}

impl DeviceChooser for TerminalChooser {
    fn choose(&self, candidates: &[DeviceInfo]) -> Option<usize> {
        if candidates.len() <= 1 {
            return (!candidates.is_empty()).then_some(0);
        }
        if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
            return StrongestSignal.choose(candidates);
        }

        let items: Vec<String> = candidates.iter().map(candidate_label).collect();
        let default = StrongestSignal.choose(candidates).unwrap_or(0);

        let selection = self.progress.suspend(|| {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Select a device")
                .items(&items)
                .default(default)
                .interact_opt()
        });

        match selection {
            Ok(choice) => choice,
            Err(e) => {
                warn!("Device selection failed: {}", e);
                None
            }
        }
    }
}

/// One line per candidate: name, identifier, signal.
pub fn candidate_label(device: &DeviceInfo) -> String {
    let name = device.name.as_deref().unwrap_or("Unknown");
    match device.rssi {
        Some(rssi) => format!("{} ({}) {} dBm", name, device.id, rssi),
        None => format!("{} ({})", name, device.id),
    }
}

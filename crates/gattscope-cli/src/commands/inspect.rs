//! Scan and connect: request a device and print its GATT layout.

use anyhow::{Result, bail};
use gattscope_store::SharedHistory;
use tracing::warn;

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{format_device_text, format_inspection_json, format_services_text};
use crate::session::{DeviceSession, GlobalOptions, Target, find_entry};
use crate::util::write_output;

/// Pick a remembered device for `connect`.
pub fn known_target(
    query: Option<&str>,
    config: &Config,
    history: &SharedHistory,
) -> Result<Target> {
    match query {
        Some(query) => match find_entry(history, query) {
            Some(entry) => Ok(Target::Known(entry.device)),
            None => bail!(
                "'{}' is not in the device history.\n\
                 Run 'gattscope history' to list remembered devices.",
                query
            ),
        },
        None => match config.last_device.as_deref().and_then(|id| history.get(id)) {
            Some(entry) => Ok(Target::Known(entry.device)),
            None => bail!(
                "No device specified and no previous connection to fall back on.\n\
                 Run 'gattscope scan' to pick a device first."
            ),
        },
    }
}

/// Connect, optionally read every readable characteristic, print, disconnect.
pub async fn cmd_inspect(
    session: &DeviceSession,
    target: Target,
    read_values: bool,
    format: OutputFormat,
    opts: &GlobalOptions,
) -> Result<()> {
    session.connect(target).await?;

    if read_values {
        read_all(session).await;
    }

    let manager = session.manager();
    let (device, services) = match manager.device() {
        Some(device) => (device, manager.services()),
        None => {
            bail!("Device disconnected during discovery");
        }
    };
    session.close().await;

    let content = match format {
        OutputFormat::Json => format_inspection_json(&device, &services)?,
        OutputFormat::Text => {
            let mut out = format_device_text(&device, opts.no_color);
            out.push('\n');
            out.push_str(&format_services_text(&services, opts.no_color));
            out
        }
    };
    write_output(opts.output.as_ref(), &content)
}

/// Read what can be read. Values land in the manager's service cache.
async fn read_all(session: &DeviceSession) {
    let manager = session.manager();
    for service in manager.services() {
        for characteristic in service.characteristics.iter().filter(|c| c.properties.read) {
            if let Err(e) = manager
                .read_characteristic(service.uuid, characteristic.uuid)
                .await
            {
                warn!("Failed to read {}: {}", characteristic.uuid, e);
            }
        }
    }
    manager.clear_error();
}

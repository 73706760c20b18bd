//! Characteristic commands: read, write, notify.

use std::time::Duration;

use anyhow::{Context, Result};
use gattscope_core::ConnectionEvent;
use gattscope_core::uuid::{describe_uuid, format_uuid, parse_uuid};
use gattscope_core::value::{encode_text, format_value, parse_hex};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cli::{CharacteristicArgs, OutputFormat};
use crate::format::format_value_json;
use crate::session::{DeviceSession, GlobalOptions, Target};
use crate::style;
use crate::util::write_output;

/// Parse the service and characteristic UUIDs given on the command line.
pub fn parse_characteristic(args: &CharacteristicArgs) -> Result<(Uuid, Uuid)> {
    let service = parse_uuid(&args.service)
        .with_context(|| format!("Invalid service UUID: {}", args.service))?;
    let characteristic = parse_uuid(&args.characteristic)
        .with_context(|| format!("Invalid characteristic UUID: {}", args.characteristic))?;
    Ok((service, characteristic))
}

fn label(uuid: &Uuid) -> String {
    match describe_uuid(uuid) {
        Some(name) => format!("{} ({})", name, format_uuid(uuid)),
        None => format_uuid(uuid),
    }
}

/// Read one characteristic and print its value.
pub async fn cmd_read(
    session: &DeviceSession,
    target: Target,
    (service, characteristic): (Uuid, Uuid),
    format: OutputFormat,
    opts: &GlobalOptions,
) -> Result<()> {
    session.connect(target).await?;
    let result = session
        .manager()
        .read_characteristic(service, characteristic)
        .await;
    session.close().await;
    let value = result.with_context(|| format!("Failed to read {}", label(&characteristic)))?;

    let content = match format {
        OutputFormat::Json => format!(
            "{}\n",
            format_value_json(service, characteristic, &value, None)?
        ),
        OutputFormat::Text => format!("{}: {}\n", label(&characteristic), format_value(&value)),
    };
    write_output(opts.output.as_ref(), &content)
}

/// Write text (or hex bytes) to one characteristic.
pub async fn cmd_write(
    session: &DeviceSession,
    target: Target,
    (service, characteristic): (Uuid, Uuid),
    value: &str,
    hex: bool,
    opts: &GlobalOptions,
) -> Result<()> {
    // Bad input fails before anything is connected.
    let data = if hex {
        parse_hex(value).with_context(|| format!("Invalid hex value: {}", value))?
    } else {
        encode_text(value)
    };

    session.connect(target).await?;
    let result = session
        .manager()
        .write_characteristic(service, characteristic, &data)
        .await;
    session.close().await;
    result.with_context(|| format!("Failed to write {}", label(&characteristic)))?;

    if !opts.quiet {
        eprintln!(
            "{}",
            style::format_success(
                &format!("Wrote {} bytes to {}", data.len(), label(&characteristic)),
                opts.no_color
            )
        );
    }
    Ok(())
}

/// Options for [`cmd_notify`].
#[derive(Debug, Clone)]
pub struct NotifyArgs {
    /// Stop after this many values; zero means no limit.
    pub count: usize,
    pub duration: Option<Duration>,
    pub format: OutputFormat,
}

/// Subscribe to one characteristic and print values until stopped.
///
/// Stops after `count` values, after `duration`, when `cancel` fires, or
/// when the device goes away.
pub async fn cmd_notify(
    session: &DeviceSession,
    target: Target,
    (service, characteristic): (Uuid, Uuid),
    args: NotifyArgs,
    cancel: CancellationToken,
    opts: &GlobalOptions,
) -> Result<()> {
    let NotifyArgs {
        count,
        duration,
        format,
    } = args;
    let device = session.connect(target).await?;
    let manager = session.manager();

    let mut events = manager.subscribe_events();
    if let Err(e) = manager.start_notifications(service, characteristic).await {
        session.close().await;
        return Err(e).with_context(|| format!("Failed to subscribe to {}", label(&characteristic)));
    }

    if !opts.quiet {
        eprintln!(
            "{}",
            style::format_info(
                &format!(
                    "Listening to {} on {}. Press Ctrl+C to stop.",
                    label(&characteristic),
                    device.display_name()
                ),
                opts.no_color
            )
        );
    }

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    // Lines are streamed to stdout, or collected when writing to a file.
    let mut collected = String::new();
    let mut received = 0usize;
    let mut lost = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(ConnectionEvent::Notification { service: s, characteristic: c, value, text, .. })
                    if s == service && c == characteristic =>
                {
                    let line = match format {
                        OutputFormat::Json => {
                            let at = OffsetDateTime::now_utc().format(&Rfc3339).ok();
                            format_value_json(service, characteristic, &value, at.as_deref())?
                        }
                        OutputFormat::Text => {
                            let now = OffsetDateTime::now_utc();
                            format!(
                                "[{:02}:{:02}:{:02}] {}",
                                now.hour(),
                                now.minute(),
                                now.second(),
                                text
                            )
                        }
                    };
                    if opts.output.is_some() {
                        collected.push_str(&line);
                        collected.push('\n');
                    } else {
                        println!("{}", line);
                    }
                    received += 1;
                    if count > 0 && received >= count {
                        break;
                    }
                }
                Ok(ConnectionEvent::Disconnected { .. }) => {
                    lost = true;
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} events; output fell behind", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    if lost {
        if !opts.quiet {
            eprintln!(
                "{}",
                style::format_warning("Device disconnected", opts.no_color)
            );
        }
    } else {
        if let Err(e) = manager.stop_notifications(service, characteristic).await {
            debug!("Stopping notifications failed: {}", e);
        }
        session.close().await;
    }

    if opts.output.is_some() {
        write_output(opts.output.as_ref(), &collected)?;
    }
    debug!("Received {} notifications", received);
    Ok(())
}

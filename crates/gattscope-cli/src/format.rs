//! Output formatting for devices, GATT tables, values and the history.

use anyhow::Result;
use gattscope_core::uuid::{describe_uuid, format_uuid};
use gattscope_core::value::{format_value, to_hex};
use gattscope_store::DeviceHistoryEntry;
use gattscope_types::{DeviceInfo, ServiceInfo};
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::builder::Builder;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::style;

/// Short UTC timestamp: `2026-01-31 14:05`.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    format!(
        "{}-{:02}-{:02} {:02}:{:02}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute()
    )
}

/// The device header printed above a GATT table.
pub fn format_device_text(device: &DeviceInfo, no_color: bool) -> String {
    let mut out = String::new();
    let name = device.name.as_deref().unwrap_or("Unknown");
    if no_color {
        out.push_str(&format!("{}\n", name));
    } else {
        out.push_str(&format!("{}\n", name.bold()));
    }
    out.push_str(&format!("  Identifier: {}\n", device.id));
    out.push_str(&format!(
        "  Signal:     {}\n",
        style::format_signal_bar(device.rssi, no_color)
    ));
    if let Some(distance) = device.distance {
        out.push_str(&format!("  Distance:   ~{:.1} m\n", distance));
    }
    if !device.service_uuids.is_empty() {
        let services: Vec<String> = device.service_uuids.iter().map(format_uuid).collect();
        out.push_str(&format!("  Services:   {}\n", services.join(", ")));
    }
    out
}

/// One row per characteristic, grouped under its service.
pub fn format_services_text(services: &[ServiceInfo], no_color: bool) -> String {
    if services.is_empty() {
        return "No services found.\n".to_string();
    }

    let mut builder = Builder::default();
    builder.push_record(["Service", "Characteristic", "Name", "Properties", "Value"]);

    for service in services {
        let service_label = match service.known_name() {
            Some(name) => format!("{} {}", format_uuid(&service.uuid), name),
            None => format_uuid(&service.uuid),
        };

        if service.characteristics.is_empty() {
            builder.push_record([service_label, String::new(), String::new(), String::new(), String::new()]);
            continue;
        }

        for (i, characteristic) in service.characteristics.iter().enumerate() {
            builder.push_record([
                if i == 0 { service_label.clone() } else { String::new() },
                format_uuid(&characteristic.uuid),
                characteristic.known_name().unwrap_or("").to_string(),
                style::format_properties(&characteristic.properties, no_color),
                characteristic
                    .value
                    .as_deref()
                    .map(format_value)
                    .unwrap_or_default(),
            ]);
        }
    }

    let mut table = builder.build();
    style::apply_table_style(&mut table);
    format!("{}\n", table)
}

#[derive(Serialize)]
struct Inspection<'a> {
    device: &'a DeviceInfo,
    services: &'a [ServiceInfo],
}

/// Device and services as one JSON document.
pub fn format_inspection_json(device: &DeviceInfo, services: &[ServiceInfo]) -> Result<String> {
    let json = serde_json::to_string_pretty(&Inspection { device, services })?;
    Ok(format!("{}\n", json))
}

#[derive(Serialize)]
struct ValueRecord<'a> {
    service: Uuid,
    characteristic: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'static str>,
    hex: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    received_at: Option<&'a str>,
}

/// A characteristic value as a compact JSON object.
pub fn format_value_json(
    service: Uuid,
    characteristic: Uuid,
    value: &[u8],
    received_at: Option<&str>,
) -> Result<String> {
    let record = ValueRecord {
        service,
        characteristic,
        name: describe_uuid(&characteristic),
        hex: to_hex(value),
        text: format_value(value),
        received_at,
    };
    Ok(serde_json::to_string(&record)?)
}

/// The history as a table, in the order given.
pub fn format_history_text(entries: &[DeviceHistoryEntry], no_color: bool) -> String {
    let mut builder = Builder::default();
    builder.push_record(["", "Name", "Identifier", "Connections", "Last connected", "Services"]);

    for entry in entries {
        let star = match (entry.is_favorite, no_color) {
            (false, _) => String::new(),
            (true, true) => "*".to_string(),
            (true, false) => "★".yellow().to_string(),
        };
        builder.push_record([
            star,
            entry.device.name.clone().unwrap_or_else(|| "Unknown".to_string()),
            entry.device.id.clone(),
            entry.connection_count.to_string(),
            format_timestamp(entry.last_connected),
            entry.device.service_uuids.len().to_string(),
        ]);
    }

    let mut table = builder.build();
    style::apply_table_style(&mut table);
    format!("{}\n", table)
}

/// The history as a JSON array.
pub fn format_history_json(entries: &[DeviceHistoryEntry]) -> Result<String> {
    Ok(format!("{}\n", serde_json::to_string_pretty(entries)?))
}

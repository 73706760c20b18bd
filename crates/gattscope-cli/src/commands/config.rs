//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::ConfigAction;
use crate::config::Config;
use crate::style;

pub fn cmd_config(action: ConfigAction, no_color: bool) -> Result<()> {
    run(&Config::path(), action, no_color)
}

fn run(path: &Path, action: ConfigAction, no_color: bool) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            let config = Config::load_from(path);
            let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("# {}", path.display());
            if content.trim().is_empty() {
                println!("# (all defaults)");
            } else {
                print!("{}", content);
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load_from(path);
            config.set(&key, &value)?;
            config.save_to(path)?;
            eprintln!("{}", style::format_success(&format!("Set {} = {}", key, value), no_color));
        }
        ConfigAction::Unset { key } => {
            let mut config = Config::load_from(path);
            config.unset(&key)?;
            config.save_to(path)?;
            eprintln!("{}", style::format_success(&format!("Cleared {}", key), no_color));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        run(
            &path,
            ConfigAction::Set {
                key: "scan_timeout".into(),
                value: "12".into(),
            },
            true,
        )
        .unwrap();
        assert_eq!(Config::load_from(&path).scan_timeout, Some(12));

        run(&path, ConfigAction::Unset { key: "scan_timeout".into() }, true).unwrap();
        assert_eq!(Config::load_from(&path).scan_timeout, None);
    }

    #[test]
    fn test_set_unknown_key_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let result = run(
            &path,
            ConfigAction::Set {
                key: "colour".into(),
                value: "red".into(),
            },
            true,
        );
        assert!(result.is_err());
        assert!(!path.exists());
    }
}

use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod chooser;
mod cli;
mod commands;
mod config;
mod format;
mod session;
mod style;
mod util;

use cli::{Cli, Commands, HistoryAction, OutputFormat};
use commands::{
    NotifyArgs, cmd_config, cmd_history, cmd_inspect, cmd_notify, cmd_read, cmd_write,
    known_target, parse_characteristic,
};
use config::Config;
use session::{DeviceSession, GlobalOptions, open_history, resolve_target};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "gattscope", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let opts = GlobalOptions {
        quiet: cli.quiet,
        no_color: cli.no_color,
        database: cli.database,
        output: cli.output,
    };
    let config = Config::load();

    match cli.command {
        Commands::Scan {
            target,
            read_values,
            format,
        } => {
            let history = open_history(&opts, &config)?;
            let timeout = target.timeout;
            let target = resolve_target(&target, &config, &history)?;
            let session = DeviceSession::open(history, &opts, &config, timeout).await?;
            cmd_inspect(&session, target, read_values, format, &opts).await?;
        }
        Commands::Connect {
            device,
            timeout,
            read_values,
            format,
        } => {
            let history = open_history(&opts, &config)?;
            let target = known_target(device.as_deref(), &config, &history)?;
            let session = DeviceSession::open(history, &opts, &config, timeout).await?;
            cmd_inspect(&session, target, read_values, format, &opts).await?;
        }
        Commands::Read {
            characteristic,
            target,
            format,
        } => {
            let characteristic = parse_characteristic(&characteristic)?;
            let history = open_history(&opts, &config)?;
            let timeout = target.timeout;
            let target = resolve_target(&target, &config, &history)?;
            let session = DeviceSession::open(history, &opts, &config, timeout).await?;
            cmd_read(&session, target, characteristic, format, &opts).await?;
        }
        Commands::Write {
            characteristic,
            value,
            hex,
            target,
        } => {
            let characteristic = parse_characteristic(&characteristic)?;
            let history = open_history(&opts, &config)?;
            let timeout = target.timeout;
            let target = resolve_target(&target, &config, &history)?;
            let session = DeviceSession::open(history, &opts, &config, timeout).await?;
            cmd_write(&session, target, characteristic, &value, hex, &opts).await?;
        }
        Commands::Notify {
            characteristic,
            target,
            count,
            duration,
            format,
        } => {
            let characteristic = parse_characteristic(&characteristic)?;
            let history = open_history(&opts, &config)?;
            let timeout = target.timeout;
            let target = resolve_target(&target, &config, &history)?;
            let session = DeviceSession::open(history, &opts, &config, timeout).await?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let args = NotifyArgs {
                count,
                duration: duration.map(Duration::from_secs),
                format,
            };
            cmd_notify(&session, target, characteristic, args, cancel, &opts).await?;
        }
        Commands::History { action } => {
            let history = open_history(&opts, &config)?;
            let action = action.unwrap_or(HistoryAction::List {
                format: OutputFormat::Text,
            });
            cmd_history(&history, action, &opts)?;
        }
        Commands::Config { action } => {
            cmd_config(action, opts.no_color)?;
        }
        // Handled before tracing init.
        Commands::Completions { .. } => {}
    }

    Ok(())
}

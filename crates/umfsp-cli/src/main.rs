#![deny(unsafe_code)]

// Use mimalloc for reduced allocation latency (enabled by default).
// Disable with `--no-default-features` if debugging allocator issues.
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;
mod exit_code;
mod service;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use umfsp_core::ProxyError;
use umfsp_mount::MountError;

use crate::commands::{classify, replay};
use crate::service::{Interrupted, ServiceLoop};

/// Host for the user-mode filesystem proxy
#[derive(Parser)]
#[command(name = "umfsp")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # How would this target be registered?
    umfsp classify '\\\\?\\C:\\mnt'

    # Replay a request script against an in-memory volume
    umfsp replay session.jsonl --workers 4 --config dispatch.toml

    # Same, with debug logging on stderr
    umfsp --debug replay session.jsonl
")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress log output
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a mount target
    Classify(classify::Args),

    /// Replay a JSON-lines request script through the dispatcher
    Replay(replay::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.debug);
    }

    match cli.command {
        Commands::Classify(args) => classify::execute(&args),
        Commands::Replay(args) => {
            let service = ServiceLoop::new();
            service.install_console_handler()?;
            replay::execute(&args, &service)
        }
    }
}

/// Log to stderr. `RUST_LOG` wins over the default level.
fn setup_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(io::stderr)
        .init();
}

/// Map an error chain to an exit code by downcasting.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if cause.downcast_ref::<Interrupted>().is_some() {
            return exit_code::INTERRUPTED;
        }
        if let Some(mount_err) = cause.downcast_ref::<MountError>() {
            return match mount_err {
                MountError::InvalidParameter(_) => exit_code::INVALID_INPUT,
                MountError::InvalidState { .. } | MountError::MountManager { .. } => {
                    exit_code::MOUNT_FAILED
                }
            };
        }
        if let Some(proxy_err) = cause.downcast_ref::<ProxyError>()
            && matches!(proxy_err, ProxyError::InvalidParameter(_))
        {
            return exit_code::INVALID_INPUT;
        }
        if cause.downcast_ref::<serde_json::Error>().is_some()
            || cause.downcast_ref::<toml::de::Error>().is_some()
        {
            return exit_code::INVALID_INPUT;
        }
    }
    exit_code::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_codes() {
        let e = anyhow::Error::new(MountError::InvalidParameter("\"\"".into())).context("classify");
        assert_eq!(categorize_error(&e), exit_code::INVALID_INPUT);

        let e: anyhow::Error = Interrupted.into();
        assert_eq!(categorize_error(&e.context("replay")), exit_code::INTERRUPTED);

        let e = serde_json::from_str::<u32>("x").context("line 1").unwrap_err();
        assert_eq!(categorize_error(&e), exit_code::INVALID_INPUT);

        assert_eq!(categorize_error(&anyhow::anyhow!("boom")), exit_code::FAILURE);
    }
}

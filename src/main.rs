#![forbid(unsafe_code)]

//! `instance-control`: start, stop, and inspect supervised instances.
//!
//! Loads the TOML configuration, opens the `SQLite` record store, and runs
//! one controller operation per invocation. `run` additionally stays in the
//! foreground until the instance exits or a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use instance_control::config::GlobalConfig;
use instance_control::persistence::SqliteStore;
use instance_control::{AppError, Controller, InstanceRecord, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "instance-control", about = "Supervise long-running instance processes", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start an instance and return once it is spawned.
    Start {
        /// Instance directory; working directory and record key.
        path: PathBuf,
        /// Launch command; falls back to `default_command` when omitted.
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Stop an instance, escalating to a kill after the grace period.
    Stop {
        /// Instance directory.
        path: PathBuf,
    },

    /// Print the instance record as JSON.
    Status {
        /// Instance directory.
        path: PathBuf,
    },

    /// Start an instance and supervise it in the foreground.
    ///
    /// Ctrl-C or SIGTERM stops the instance before exiting.
    Run {
        /// Instance directory.
        path: PathBuf,
        /// Launch command; falls back to `default_command` when omitted.
        #[arg(last = true)]
        command: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    let store = SqliteStore::connect(&config.db_path).await?;
    info!(db = %config.db_path.display(), "record store connected");

    let controller = Controller::new(config.controller_config(), Arc::new(store));

    match args.command {
        Command::Start { path, command } => {
            controller.start(&path, &command).await?;
            print_record(&controller.get_state(&path).await?)?;
        }
        Command::Stop { path } => {
            controller.stop(&path).await?;
            print_record(&controller.get_state(&path).await?)?;
        }
        Command::Status { path } => {
            print_record(&controller.get_state(&path).await?)?;
        }
        Command::Run { path, command } => {
            controller.start(&path, &command).await?;
            let record = tokio::select! {
                record = controller.wait_for_exit(&path) => record?,
                () = shutdown_signal() => {
                    info!("shutdown signal received, stopping instance");
                    controller.stop(&path).await?;
                    controller.get_state(&path).await?
                }
            };
            print_record(&record)?;
            controller.shutdown().await;
        }
    }

    Ok(())
}

fn print_record(record: &InstanceRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|err| AppError::Io(format!("failed to render record: {err}")))?;
    println!("{json}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

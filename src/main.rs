//! Spool - persistent single-host task queue
//!
//! Command-line front end for the queue in `spool-queue`.

mod cli;
mod cmd_queue;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{debug, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spool_config::{ConfigError, ConfigLoader, ConfigValidator};
use spool_queue::TaskQueue;

use crate::cli::Cli;
use crate::cmd_queue::handle_queue_command;

/// Default configuration file, `~/.spool/config.toml`.
fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".spool").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".spool/config.toml"))
}

/// Initialize tracing with console and file output.
///
/// Log files are written to `<data_dir>/logs/` with daily rotation. The
/// console layer goes to stderr so command output on stdout stays clean.
fn init_tracing(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("spool")
        .filename_suffix("log")
        .max_log_files(14)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the worker alive for the program duration so buffered lines are flushed.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = ConfigLoader::load_or_default(&config_path)?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    init_tracing(&config.storage.data_dir)?;
    debug!("Configuration: {}", config_path.display());

    let validation = ConfigValidator::validate(&config);
    for warning in &validation.warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }
    if let Some(error) = validation.errors.into_iter().next() {
        return Err(Box::<dyn std::error::Error>::from(ConfigError::InvalidValue {
            field: error.path,
            message: error.message,
        }));
    }

    let queue = TaskQueue::init(&config)?;
    handle_queue_command(cli.command, queue).await
}

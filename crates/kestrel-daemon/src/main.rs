//! Kestrel daemon entry point.
//!
//! Loads the configuration, discovers host-backed plugins and drives the
//! plugin runtime from an interactive console on stdin.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kestrel_core::Runtime;
use kestrel_core::config::{Config, Directories};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod console;

/// Kestrel daemon - plugin runtime for the kestrel launcher
#[derive(Parser, Debug)]
#[command(name = "kestrel-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (defaults to `$XDG_CONFIG_HOME/kestrel/config.json`)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory scanned for plugin manifests (defaults to `$XDG_CONFIG_HOME/kestrel/plugins`)
    #[arg(long, value_name = "DIR")]
    plugins_dir: Option<PathBuf>,
}

/// Set up logging with file output for debugging.
/// In debug builds, defaults to debug level and logs to a timestamped file
/// as well as stderr. In release builds, defaults to info level on stderr.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kestrel={default_level}")));

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("kestrel-daemon-{timestamp}.log");
        let log_path = temp_dir.join(&log_filename);

        #[cfg(unix)]
        {
            let symlink_path = temp_dir.join("kestrel-daemon.log");
            let _ = std::fs::remove_file(&symlink_path);
            let _ = std::os::unix::fs::symlink(&log_path, &symlink_path);
        }

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // The writer must outlive main
        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();

        eprintln!("Logging to: {} (and stderr)", log_path.display());
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging();

    info!("Starting kestrel daemon...");

    let dirs = Directories::new().context("resolving kestrel directories")?;
    let config_path = args.config.unwrap_or_else(|| dirs.config_file.clone());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    info!("Using config {}", config_path.display());

    let (runtime, updates) = Runtime::with_channel(config);
    let runtime = Arc::new(runtime);

    let plugins_dir = args.plugins_dir.unwrap_or(dirs.plugins);
    if plugins_dir.is_dir() {
        runtime
            .load_plugins_dir(&plugins_dir)
            .await
            .with_context(|| format!("scanning {}", plugins_dir.display()))?;
    } else {
        warn!(
            "Plugin directory {} does not exist, no plugins loaded",
            plugins_dir.display()
        );
    }

    console::run(runtime, updates).await;

    info!("Kestrel daemon stopped");
    Ok(())
}

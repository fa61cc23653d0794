use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Sends tracing output to `<dir>/checkit.log`; the terminal belongs to the
/// UI. `RUST_LOG` overrides `default_filter`. Keep the guard alive until
/// exit so buffered lines are flushed.
pub fn init(dir: &Path, default_filter: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;
    let appender = tracing_appender::rolling::never(dir, "checkit.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing log subscriber: {}", e))?;
    Ok(guard)
}

//! Logging setup and configuration

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Sub-directories of the output dir every process expects to exist.
pub const OUTPUT_LAYOUT: [&str; 4] = ["logs", "audit", "ipc", "approvals"];

pub struct LoggingGuard {
    pub _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Console plus an hourly rolling file under `<output_dir>/logs`.
/// Each process passes its own `file_name` so workers do not share a file.
/// `RUST_LOG` wins when set; otherwise everything at `info` and above.
pub fn setup_logging(output_dir: &Path, file_name: &str) -> Result<Arc<LoggingGuard>> {
    let appender = tracing_appender::rolling::hourly(output_dir.join("logs"), file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let console = fmt::layer().with_target(false).with_ansi(true);
    let file = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;

    Ok(Arc::new(LoggingGuard { _guard: guard }))
}

pub fn setup_output_directories(output_dir: &Path) -> Result<()> {
    for sub in OUTPUT_LAYOUT {
        std::fs::create_dir_all(output_dir.join(sub))?;
    }
    Ok(())
}

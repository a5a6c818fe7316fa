//! Logging setup.

use bootlab_shared::errors::{BootlabError, BootlabResult};
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// File name prefix of the daily log files.
pub const LOG_FILE: &str = "bootlab.log";

/// Filter from `RUST_LOG`, or `info` (`debug` with `debug` set).
pub fn env_filter(debug: bool) -> EnvFilter {
    let default = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter, ansi: bool) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(ansi),
        )
        .try_init();
}

/// Initialize tracing.
///
/// Logs go to `{log_dir}/bootlab.log.YYYY-MM-DD` with daily rotation when a
/// log directory is given, otherwise to stderr. The returned guard must be
/// kept alive until exit so buffered lines are written.
pub fn init_logging(log_dir: Option<&Path>, debug: bool) -> BootlabResult<WorkerGuard> {
    let filter = env_filter(debug);

    let Some(log_dir) = log_dir else {
        let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
        register_to_tracing(non_blocking, filter, true);
        return Ok(guard);
    };

    std::fs::create_dir_all(log_dir).map_err(|e| {
        BootlabError::Config(format!(
            "failed to create log directory {}: {}",
            log_dir.display(),
            e
        ))
    })?;
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    register_to_tracing(non_blocking, filter, false);
    Ok(guard)
}

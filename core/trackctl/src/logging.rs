//! File logging for trackctl.
//!
//! stdout belongs to command output, so logs go to a daily rolling file in
//! `~/.tracker/logs/`. The level comes from `TRACKCTL_LOG` (default `warn`).

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_ENV: &str = "TRACKCTL_LOG";
const LOG_FILE: &str = "trackctl.log";

/// Installs the subscriber. Logging is best-effort: without a home
/// directory or a writable log dir the command still runs, unlogged.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = log_directory()?;
    if let Err(err) = fs_err::create_dir_all(&log_dir) {
        eprintln!("trackctl: logging disabled: {}", err);
        return None;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    Some(guard)
}

fn log_directory() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tracker").join("logs"))
}

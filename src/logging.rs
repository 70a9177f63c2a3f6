//! Structured logging for vrclog, built on the `tracing` ecosystem.
//!
//! This crate does not assume it owns process-wide logging: calling
//! [`init_logging`] is optional and intended for a standalone consumer
//! (a CLI, a test harness). An embedding application is free to install
//! its own subscriber and simply use `tracing` directly — every
//! diagnostic emitted by the watcher, the tailer, and the plugin host
//! goes through `tracing` macros, never `println!`/`eprintln!`.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{Result, VrclogError};

/// Guard that must be held to ensure buffered log entries are flushed
/// on shutdown. Dropping it flushes and detaches the non-blocking
/// writer.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize logging: stderr (human-readable) plus, if `log_dir` is
/// given, a daily-rolling JSON-lines file under that directory.
///
/// `verbose` raises the default directive from `info` to `debug`;
/// `RUST_LOG` always takes precedence when set.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vrclog={default_level}")));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact();

    let file_guard = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .map_err(|e| VrclogError::io("creating log directory", dir.clone(), e))?;
            let appender = tracing_appender::rolling::daily(&dir, "vrclog.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .json()
                .with_span_events(FmtSpan::CLOSE);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()
                .ok();

            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init()
                .ok();
            None
        }
    };

    tracing::debug!(verbose, "vrclog logging initialized");

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

/// Minimal console-only logging for tests.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output goes to stderr; the file sink rotates daily and can emit
//! JSON lines for ingestion.

use std::path::Path;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{BeaconError, BeaconResult};

const LOG_FILE_PREFIX: &str = "beacon.log";

/// Transport crates that are chatty at debug level.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "tungstenite", "tokio_tungstenite"];

/// Build the filter for `level`, falling back to `info` when the directive
/// does not parse. Transport internals stay at `warn` unless named explicitly.
fn build_filter(level: &str) -> EnvFilter {
    let mut filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    for target in QUIET_TARGETS {
        if level.contains(target) {
            continue;
        }
        if let Ok(directive) = format!("{target}=warn").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Install the global subscriber: compact console layer plus a daily-rotated
/// file under `log_dir`.
///
/// `level` accepts a plain level or filter directives such as
/// `"info,beacon_socket=trace"`. The returned guard must be held for the
/// life of the process; dropping it flushes the file writer.
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> BeaconResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));

    let console = fmt::layer().with_writer(std::io::stderr).with_target(true).compact();

    let json_file = json_output.then(|| {
        fmt::layer()
            .with_writer(writer.clone())
            .json()
            .with_current_span(false)
            .with_file(true)
            .with_line_number(true)
    });
    let plain_file = (!json_output).then(|| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(console)
        .with(json_file)
        .with(plain_file)
        .try_init()
        .map_err(|e| BeaconError::Internal(format!("failed to install logger: {e}")))?;

    tracing::debug!(dir = %log_dir.display(), json = json_output, "file logging enabled");
    Ok(LogGuard { _guard: guard })
}

/// Keeps the non-blocking file writer alive.
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Console-only logger for tests and for when the log directory is unusable.
/// Does nothing if a subscriber is already installed.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

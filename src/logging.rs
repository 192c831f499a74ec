//! Tracing setup for the `hg` binary.
//!
//! `hg enqueue` and `hg drain` are short-lived, often one process per
//! inbound event, and print dispatched requests on stdout. Diagnostics
//! therefore always go to stderr. When `[logging] dir` is configured each
//! run also appends JSON records to a daily file under that directory, so
//! the history of many small runs ends up in one place.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the daily log files (`hg.log.YYYY-MM-DD`).
pub const LOG_FILE_PREFIX: &str = "hg.log";

/// Filter used with a log directory when `RUST_LOG` is unset.
const FILE_DEFAULT_FILTER: &str = "info";

/// Filter used for stderr-only runs when `RUST_LOG` is unset.
const STDERR_DEFAULT_FILTER: &str = "warn";

/// Keeps the background file writer alive. Dropping it flushes the file.
pub struct LoggingGuard {
    _writer: WorkerGuard,
}

/// Install the global subscriber for one `hg` run.
///
/// Without `dir`, records go to stderr at `warn`. With `dir`, JSON records
/// also go to a daily file in it and the default level is `info`.
/// `RUST_LOG` overrides either default. The returned guard must be held
/// until the run ends.
///
/// # Errors
///
/// Returns an error if `dir` cannot be created or a subscriber is already
/// installed.
pub fn init(dir: Option<&Path>) -> anyhow::Result<Option<LoggingGuard>> {
    match dir {
        None => {
            tracing_subscriber::registry()
                .with(filter(STDERR_DEFAULT_FILTER))
                .with(stderr_layer())
                .try_init()
                .context("failed to install stderr logging")?;
            Ok(None)
        }
        Some(dir) => init_with_file(dir).map(Some),
    }
}

fn init_with_file(dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(filter(FILE_DEFAULT_FILTER))
        .with(file_layer)
        .with(stderr_layer())
        .try_init()
        .context("failed to install file logging")?;

    Ok(LoggingGuard { _writer: guard })
}

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
}

//! Tracing subscriber setup.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{SandplaneError, SandplaneResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// File name prefix of the rolling log files.
const LOG_FILE_PREFIX: &str = "sandplane.log";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Installs the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the crate logs at `info`, or `debug` when `verbose`.
/// With a `log_dir`, output is also written to a daily rolling file; keep the returned
/// guard alive until shutdown or buffered lines are lost.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> SandplaneResult<Option<WorkerGuard>> {
    let default_level = if verbose { "sandplane=debug" } else { "sandplane=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stdout = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true);

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init()
        .map_err(SandplaneError::custom)?;

    Ok(guard)
}

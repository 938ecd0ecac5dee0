use std::path::MAIN_SEPARATOR;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub mod chain;
pub mod listing;
pub mod zipsort;

mod report;

const DEFAULT_LOG_FILTER: &str = "libpagegrab=debug,pagegrab=debug";

/// Sends library logs to an hourly rolling file in the working directory.
/// `RUST_LOG` overrides the default filter. Keep the guard alive until exit.
pub fn init_tracing(log_file_name: &str) -> WorkerGuard {
    let f_appender =
        tracing_appender::rolling::hourly(format!(".{}", MAIN_SEPARATOR), log_file_name);
    let (non_blk, guard) = tracing_appender::non_blocking(f_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_ansi(false)
        .event_format(tracing_subscriber::fmt::format().pretty())
        .with_writer(non_blk)
        .init();
    guard
}

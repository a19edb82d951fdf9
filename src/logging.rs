use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "KINBOARD_LOG";
pub const DEFAULT_FILTER: &str = "kinboard=info,sqlx=warn,tower_http=info";
const LOG_FILE_PREFIX: &str = "kinboard.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the JSON stdout subscriber, plus a daily rolling file sink when
/// `log_dir` is given. Keep the returned guard alive for the process lifetime
/// or buffered file lines are lost.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let _ = tracing_log::LogTracer::init();

    let stdout = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339());

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout)
        .with(file)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            target: "kinboard",
            event = "logging_ready",
            file_sink = ?log_dir
        );
    }
    guard
}

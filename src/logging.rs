use std::path::PathBuf;
use std::sync::{Once, OnceLock};

use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Structured logging backed by `tracing`.
///
/// A global subscriber is installed once; helper functions keep call-sites
/// one-liners so pipeline code stays readable.

static INIT_LOGGING: Once = Once::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn resolve_log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tabletalk")
        .join("logs")
}

fn build_file_appender() -> Option<(RollingFileAppender, PathBuf)> {
    let log_dir = resolve_log_dir();
    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        eprintln!(
            "[tabletalk][WARN] Failed to create log directory {}: {}",
            log_dir.display(),
            err
        );
        return None;
    }

    Some((RollingFileAppender::new(Rotation::DAILY, &log_dir, "tabletalk.log"), log_dir))
}

pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let (file_layer, log_dir) = if let Some((appender, dir)) = build_file_appender() {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(non_blocking);
            LOG_GUARD.set(guard).ok();
            (Some(layer), Some(dir))
        } else {
            (None, None)
        };

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| {
                EnvFilter::try_new(
                    std::env::var("TABLETALK_LOG_LEVEL").unwrap_or_else(|_| "info".into()),
                )
            })
            .unwrap_or_else(|_| EnvFilter::new("info"));

        // The chat REPL owns stdout; log lines go to the file sink and stderr
        // so interactive output and diagnostics stay apart.
        let stderr_layer = fmt::layer()
            .with_target(true)
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr);

        let registry = tracing_subscriber::registry().with(filter).with(stderr_layer);
        if let Some(file_layer) = file_layer {
            registry.with(file_layer).init();
        } else {
            registry.init();
        }

        if let Some(dir) = log_dir {
            app_info(format!(
                "Logging initialized; daily-rotated logs under {}",
                dir.display()
            ));
        } else {
            app_warn("Logging initialized without file sink (stderr only)");
        }
    });
}

pub fn app_info(message: impl AsRef<str>) {
    info!(target: "tabletalk", "{}", message.as_ref());
}

pub fn app_warn(message: impl AsRef<str>) {
    warn!(target: "tabletalk", "{}", message.as_ref());
}

pub fn app_error(message: impl AsRef<str>) {
    error!(target: "tabletalk", "{}", message.as_ref());
}

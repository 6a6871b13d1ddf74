//! Log sink initialization.
//!
//! Console output for humans plus an optional plain-text debug file the
//! external test harness parses post-run. The file layer is non-ANSI and
//! non-blocking; keep the returned guard alive for the process lifetime
//! or the tail of the log is lost.

use crate::error::NodeError;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Keeps the file appender worker alive; dropping it flushes buffered
/// output.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber. `level` is an `EnvFilter` directive
/// ("info", "debug", "mcc_gossip=trace", ...); `debug_file`, when set,
/// receives every event at the same level with timestamps and no colors.
///
/// Safe to call more than once: later calls keep the existing subscriber
/// and only hand back a guard.
pub fn init_logging(level: &str, debug_file: Option<&Path>) -> Result<LoggingGuard, NodeError> {
    let console_filter =
        EnvFilter::try_new(level).map_err(|e| NodeError::Config(format!("log level: {e}")))?;
    let console_layer = fmt::layer().with_target(true).with_filter(console_filter);

    let mut file_guard = None;
    let mut file_layer = None;
    if let Some(path) = debug_file {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| NodeError::Config(format!("debug log path {} has no file name", path.display())))?;
        std::fs::create_dir_all(dir).map_err(NodeError::Bind)?;
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        let filter =
            EnvFilter::try_new(level).map_err(|e| NodeError::Config(format!("log level: {e}")))?;
        file_layer = Some(
            fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(filter),
        );
    }

    // A second initialization (tests, embedders) is not an error; the
    // first subscriber stays in place.
    let _ = Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_is_a_config_error() {
        assert!(matches!(
            init_logging("no-such-level=%%", None),
            Err(NodeError::Config(_))
        ));
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        let dir = std::env::temp_dir().join("cinnabar-log-test");
        let file = dir.join("debug.log");
        let _g1 = init_logging("info", Some(&file)).unwrap();
        let _g2 = init_logging("debug", Some(&file)).unwrap();
        assert!(dir.exists());
    }
}

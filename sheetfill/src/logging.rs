//! Diagnostic log for one run

use std::io;
use std::path::{Path, PathBuf};

use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry, fmt};

const LOG_PREFIX: &str = "sheetfill";
const LOG_SUFFIX: &str = "log";
const FILE_LEVEL: LevelFilter = LevelFilter::INFO;
const CONSOLE_LEVEL: LevelFilter = LevelFilter::WARN;

/// Subscriber writing to `<dir>/sheetfill.log` and to stderr.
///
/// Events are only captured inside [`DiagnosticLog::in_scope`]. Pending lines
/// are flushed when the value is dropped.
pub struct DiagnosticLog {
    dispatch: Dispatch,
    path: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

impl DiagnosticLog {
    /// Open the log in `dir`, falling back to stderr only if the file cannot be created
    pub fn open(dir: &Path) -> Self {
        let appender = std::fs::create_dir_all(dir)
            .map_err(|e| e.to_string())
            .and_then(|()| {
                RollingFileAppender::builder()
                    .rotation(Rotation::NEVER)
                    .filename_prefix(LOG_PREFIX)
                    .filename_suffix(LOG_SUFFIX)
                    .build(dir)
                    .map_err(|e| e.to_string())
            });

        let (file_layer, guard, path, open_error) = match appender {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_timer(UtcTime::rfc_3339())
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(FILE_LEVEL);
                let path = dir.join(format!("{}.{}", LOG_PREFIX, LOG_SUFFIX));
                (Some(layer), Some(guard), Some(path), None)
            }
            Err(err) => (None, None, None, Some(err)),
        };

        let console_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .with_filter(CONSOLE_LEVEL);

        let subscriber = Registry::default().with(console_layer).with(file_layer);
        let log = Self {
            dispatch: Dispatch::new(subscriber),
            path,
            _guard: guard,
        };

        if let Some(err) = open_error {
            log.in_scope(|| {
                tracing::warn!(dir = %dir.display(), error = %err, "could not open log file");
            });
        }
        log
    }

    /// Path of the log file, if one could be opened
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with this log as the active subscriber
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_events_reach_log_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = DiagnosticLog::open(dir.path());
            assert_eq!(log.path(), Some(dir.path().join("sheetfill.log").as_path()));
            log.in_scope(|| tracing::info!(operation = 3, "written to the log"));
            tracing::info!("outside the scope");
        }

        let content = fs::read_to_string(dir.path().join("sheetfill.log")).unwrap();
        assert!(content.contains("written to the log"));
        assert!(content.contains("operation=3"));
        assert!(!content.contains("outside the scope"));
    }

    #[test]
    fn test_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        for run in 0..2 {
            let log = DiagnosticLog::open(dir.path());
            log.in_scope(|| tracing::warn!(run, "run finished"));
        }
        let content = fs::read_to_string(dir.path().join("sheetfill.log")).unwrap();
        assert_eq!(content.matches("run finished").count(), 2);
    }

    #[test]
    fn test_unusable_dir_falls_back_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();

        let log = DiagnosticLog::open(&blocker.join("logs"));
        assert!(log.path().is_none());
        assert_eq!(log.in_scope(|| 7), 7);
    }
}

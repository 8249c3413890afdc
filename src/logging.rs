use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogLevel, LoggingConfig, expand_tilde};

/// Keeps the file writer flushing until dropped at process exit.
#[derive(Default)]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// The filter directive for the given settings. `RUST_LOG` wins over both.
fn filter_for(config: &LoggingConfig, debug: bool) -> EnvFilter {
    let level = if debug { LogLevel::Debug } else { config.level };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

fn split_log_path(path: &Path) -> (PathBuf, PathBuf) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("couchctl.log"));
    (dir, name)
}

/// Initializes logging to stderr, plus the configured log file. Calling it
/// twice leaves the first subscriber in place.
pub fn init(config: &LoggingConfig, debug: bool) -> LogGuard {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let mut guard = LogGuard::default();
    let file_layer = if config.file_output {
        let (dir, name) = split_log_path(&expand_tilde(Path::new(&config.file_path)));
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::never(dir, name);
                let (writer, file_guard) = tracing_appender::non_blocking(appender);
                guard._file = Some(file_guard);
                Some(fmt::layer().with_writer(writer).with_ansi(false))
            }
            Err(e) => {
                eprintln!("Failed to create log directory {}: {e}", dir.display());
                None
            }
        }
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(filter_for(config, debug))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/var/log/couchctl.log", "/var/log", "couchctl.log")]
    #[case("couchctl.log", ".", "couchctl.log")]
    #[case("logs/debug.log", "logs", "debug.log")]
    fn test_split_log_path(#[case] path: &str, #[case] dir: &str, #[case] name: &str) {
        let (got_dir, got_name) = split_log_path(Path::new(path));
        assert_eq!(got_dir, PathBuf::from(dir));
        assert_eq!(got_name, PathBuf::from(name));
    }

    #[test]
    fn test_init_writes_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: LogLevel::Warn,
            file_output: true,
            file_path: dir.path().join("nested").join("couchctl.log").display().to_string(),
        };
        let guard = init(&config, false);
        drop(guard);
        assert!(dir.path().join("nested").exists());
    }
}

//! Tracing subscriber setup for the binary.
//!
//! Two outputs:
//! - stderr, filtered by `RUST_LOG` or the verbosity flags
//! - a debug-level log file, truncated at start and stored in the archive
//!   at the end of the run

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Console verbosity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Debug,
}

impl Verbosity {
    pub fn from_flags(debug: bool, quiet: bool) -> Self {
        if debug {
            Verbosity::Debug
        } else if quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    /// Default directive when `RUST_LOG` is not set.
    pub fn directive(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Keeps the file writer alive. Dropping it flushes the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    path: PathBuf,
}

impl LoggingGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered lines to the log file and return its path.
    ///
    /// Events logged after this are not written to the file.
    pub fn finish(self) -> PathBuf {
        let LoggingGuard { _file_guard: file_guard, path } = self;
        drop(file_guard);
        path
    }
}

/// Truncate `log_path` and open a background writer for it.
fn file_writer(log_path: &Path) -> Result<(NonBlocking, LoggingGuard), io::Error> {
    let dir = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = log_path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name"))?;

    fs::create_dir_all(&dir)?;
    // one log per run
    fs::write(log_path, "")?;

    let file_appender = tracing_appender::rolling::never(&dir, file_name);
    let (writer, file_guard) = tracing_appender::non_blocking(file_appender);
    Ok((
        writer,
        LoggingGuard {
            _file_guard: file_guard,
            path: log_path.to_path_buf(),
        },
    ))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the log file cannot be created.
pub fn init_logging(log_path: &Path, verbosity: Verbosity) -> Result<LoggingGuard, io::Error> {
    let (non_blocking_file, guard) = file_writer(log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(false)
        .with_filter(LevelFilter::DEBUG);

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(guard)
}

/// `/tmp/dbcollect.log`, or the platform temp dir equivalent.
pub fn default_log_path() -> PathBuf {
    std::env::temp_dir().join("dbcollect.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(Verbosity::from_flags(false, false).directive(), "info");
        assert_eq!(Verbosity::from_flags(true, true).directive(), "debug");
        assert_eq!(Verbosity::from_flags(false, true).directive(), "error");
    }

    #[test]
    fn test_finish_flushes_buffered_lines() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("run").join("dbcollect.log");
        fs::create_dir_all(log_path.parent().unwrap()).unwrap();
        fs::write(&log_path, "stale line from a previous run\n").unwrap();

        let (mut writer, guard) = file_writer(&log_path).unwrap();
        for i in 0..200 {
            writeln!(writer, "collect line {i}").unwrap();
        }
        writeln!(writer, "ERROR Run aborted (E014)").unwrap();

        let path = guard.finish();
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("stale line"));
        assert!(text.contains("collect line 0\n"));
        assert!(text.ends_with("ERROR Run aborted (E014)\n"));
    }

    #[test]
    fn test_default_log_path() {
        assert!(default_log_path().ends_with("dbcollect.log"));
    }
}

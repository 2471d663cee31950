//! External command execution.
//!
//! Everything the collector learns about the host comes from running a
//! program (`ps`, `sqlplus`) or reading a file. Both go through the
//! [`CommandRunner`] trait so that discovery and probing can be tested
//! against scripted output.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Exit status used by shells for "command not found".
pub const EXIT_NOT_FOUND: i32 = 127;

/// What to run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Start from an empty environment instead of inheriting ours.
    pub clear_env: bool,
    pub cwd: Option<PathBuf>,
    /// Text written to stdin before it is closed.
    pub input: Option<String>,
    /// Wall-clock guard; the child is killed when it expires.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the tokio command with stdio left to the caller.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if self.clear_env {
            cmd.env_clear();
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    /// Command line for logging.
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs commands and reads files on behalf of discovery and probing.
///
/// A guard expiry is reported as an [`io::ErrorKind::TimedOut`] error;
/// a program that cannot be launched as the spawn error itself.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput>;

    async fn read_file(&self, path: &Path) -> io::Result<String>;

    async fn is_dir(&self, path: &Path) -> bool;

    async fn is_file(&self, path: &Path) -> bool;
}

/// [`CommandRunner`] backed by real processes and the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        let mut cmd = spec.to_command();
        cmd.stdin(if spec.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        tracing::debug!(command = %spec.display(), "executing");
        let mut child = cmd.spawn()?;

        if let (Some(input), Some(mut stdin)) = (spec.input.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(err) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!("stdin write failed: {err}");
                }
            });
        }

        let output = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{} exceeded {}s", spec.display(), limit.as_secs()),
                    ));
                }
            },
            None => child.wait_with_output().await?,
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        })
    }

    async fn read_file(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn is_dir(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn is_file(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_output_and_status() {
        let spec = CommandSpec::new("sh").with_args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = SystemRunner.run(&spec).await.unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.status, Some(3));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_run_feeds_stdin() {
        let spec = CommandSpec::new("cat").with_input("select 1 from dual;\n");
        let output = SystemRunner.run(&spec).await.unwrap();
        assert_eq!(output.stdout, "select 1 from dual;\n");
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_run_with_cleared_env() {
        let spec = CommandSpec::new("/bin/sh")
            .with_args(["-c", "echo \"$ORACLE_SID:$HOME\""])
            .with_clear_env()
            .with_env("ORACLE_SID", "DB1");
        let output = SystemRunner.run(&spec).await.unwrap();
        assert_eq!(output.stdout.trim(), "DB1:");
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let spec = CommandSpec::new("sleep")
            .with_args(["5"])
            .with_timeout(Duration::from_millis(100));
        let err = SystemRunner.run(&spec).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let spec = CommandSpec::new("/nonexistent/bin/sqlplus");
        let err = SystemRunner.run(&spec).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_filesystem_queries() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("oratab");
        std::fs::write(&file, "DB1:/u01/app:Y\n").unwrap();

        assert!(SystemRunner.is_dir(dir.path()).await);
        assert!(!SystemRunner.is_file(dir.path()).await);
        assert!(SystemRunner.is_file(&file).await);
        assert_eq!(
            SystemRunner.read_file(&file).await.unwrap(),
            "DB1:/u01/app:Y\n"
        );
    }
}

//! Persistent SQL*Plus sessions.
//!
//! A session keeps one SQL*Plus process logged on to an instance and runs
//! report scripts in it one at a time. Report data is spooled to a file;
//! stdout is drained by a reader task that picks up completion frames
//! (`PROMPT #DBCOLLECT# <token>`) and keeps recent Oracle messages for
//! crash classification. Stderr and recognised message lines go to a
//! per-session log file.
//!
//! A script is finished when its completion signal arrives, has crashed
//! when the process exits first, and has hung when the per-job timeout
//! expires first. A session whose process died is respawned by the next
//! [`ReportSession::run`].

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::command::CommandSpec;
use crate::config::{CompletionMode, SessionConfig};
use crate::error::{CollectError, Result, first_message_line, scan_signature};
use crate::instance::Instance;
use crate::staging::{Area, StagingDir};
use crate::telemetry;

/// Marks completion lines on stdout.
pub const FRAME_PREFIX: &str = "#DBCOLLECT#";

/// Sent once after logon.
pub const SESSION_INIT: &str = "\
WHENEVER SQLERROR EXIT SQL.SQLCODE
SET tab off feedback off verify off heading off lines 32767 pages 0 trims on
SET long 1000000000 longchunksize 32767
alter session set nls_date_language=american;
";

const RECENT_LINES: usize = 32;
const READER_DRAIN: Duration = Duration::from_millis(500);
const KILL_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
}

/// Result of a completed script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    pub elapsed: Duration,
    /// Process exit status, 0 while the session keeps running.
    pub exit_status: i32,
    pub status: RunStatus,
    /// Spool file the script wrote.
    pub output: PathBuf,
}

/// A session that runs report scripts one at a time.
#[async_trait]
pub trait ReportSession: Send {
    /// Run `query` spooled to `output_file` and wait for it to finish.
    ///
    /// Relative output paths are resolved against [`Self::scratch_dir`].
    async fn run(
        &mut self,
        name: &str,
        query: &str,
        output_file: &Path,
        header: Option<&str>,
    ) -> Result<RunOutcome>;

    /// Log off and stop the process.
    async fn close(&mut self);

    fn scratch_dir(&self) -> &Path;
}

/// Opens sessions for workers.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: ReportSession + 'static;

    async fn open(&self, instance: &Instance, worker: &str) -> Result<Self::Session>;
}

/// Everything needed to (re)start one session process.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub sid: String,
    pub worker: String,
    pub command: CommandSpec,
    /// Working directory of the process and default spool location.
    pub scratch: PathBuf,
    /// Where marker files are created.
    pub lock_dir: PathBuf,
    pub log_path: PathBuf,
    pub config: SessionConfig,
}

/// Completion directive appended after `SPOOL OFF`.
pub fn completion_directive(mode: CompletionMode, token: &str, marker: &Path) -> String {
    match mode {
        CompletionMode::ControlChannel => format!("PROMPT {FRAME_PREFIX} {token}\n"),
        CompletionMode::Marker => format!("HOST touch {}\n", marker.display()),
    }
}

/// Full text submitted for one job.
pub fn job_script(header: Option<&str>, output: &Path, query: &str, directive: &str) -> String {
    let mut script = String::with_capacity(query.len() + 128);
    if let Some(header) = header {
        script.push_str(header);
        if !header.ends_with('\n') {
            script.push('\n');
        }
    }
    script.push_str(&format!("SPOOL {}\n", output.display()));
    script.push_str(query);
    if !query.ends_with('\n') {
        script.push('\n');
    }
    script.push_str("SPOOL OFF\n");
    script.push_str(directive);
    script
}

/// Token carried by a completion line, if `line` is one.
pub fn parse_frame(line: &str) -> Option<&str> {
    line.trim().strip_prefix(FRAME_PREFIX).map(str::trim)
}

enum Signal<'a> {
    Frame(&'a str),
    Marker(&'a Path, Duration),
}

enum Waited {
    Done,
    Exited(Option<i32>),
    TimedOut,
}

struct Process {
    child: Child,
    stdin: ChildStdin,
    frames: mpsc::UnboundedReceiver<String>,
    recent: Arc<Mutex<VecDeque<String>>>,
    readers: Vec<JoinHandle<()>>,
}

impl Process {
    fn spawn(opts: &SessionOptions) -> Result<Self> {
        let failed = |reason: String| CollectError::SessionStart {
            sid: opts.sid.clone(),
            reason,
        };

        let mut cmd = opts.command.to_command();
        cmd.current_dir(&opts.scratch)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| failed(format!("{}: {e}", opts.command.program.display())))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| failed("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| failed("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| failed("stderr not captured".into()))?;

        let (tx, frames) = mpsc::unbounded_channel();
        let recent = Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_LINES)));
        let readers = vec![
            tokio::spawn(read_lines(
                stdout,
                Some(tx),
                Arc::clone(&recent),
                opts.log_path.clone(),
            )),
            tokio::spawn(read_lines(
                stderr,
                None,
                Arc::clone(&recent),
                opts.log_path.clone(),
            )),
        ];

        tracing::debug!(sid = %opts.sid, worker = %opts.worker, pid = ?child.id(), "sqlplus started");
        Ok(Self {
            child,
            stdin,
            frames,
            recent,
            readers,
        })
    }

    async fn send(&mut self, script: &str) -> io::Result<()> {
        self.stdin.write_all(script.as_bytes()).await?;
        self.stdin.flush().await
    }

    async fn wait(&mut self, signal: Signal<'_>, limit: Duration) -> Waited {
        let Process { child, frames, .. } = self;
        tokio::select! {
            biased;
            _ = completion(frames, signal) => Waited::Done,
            status = child.wait() => Waited::Exited(status.ok().and_then(|s| s.code())),
            _ = tokio::time::sleep(limit) => Waited::TimedOut,
        }
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn recent_output(&self) -> String {
        self.recent
            .lock()
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Let the readers reach end of stream after the process exited.
    async fn drain(&mut self) {
        for handle in self.readers.drain(..) {
            if tokio::time::timeout(READER_DRAIN, handle).await.is_err() {
                tracing::debug!("session reader did not finish");
            }
        }
    }

    async fn kill(&mut self) {
        if let Err(err) = self.child.start_kill() {
            tracing::debug!("kill failed: {err}");
        }
        let _ = tokio::time::timeout(KILL_WAIT, self.child.wait()).await;
        for handle in self.readers.drain(..) {
            handle.abort();
        }
    }
}

async fn completion(frames: &mut mpsc::UnboundedReceiver<String>, signal: Signal<'_>) {
    match signal {
        Signal::Frame(token) => {
            while let Some(seen) = frames.recv().await {
                if seen == token {
                    return;
                }
                tracing::debug!(token = %seen, "stale completion frame");
            }
            // stdout closed; the exit branch decides
            std::future::pending::<()>().await
        }
        Signal::Marker(path, poll) => loop {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                return;
            }
            tokio::time::sleep(poll).await;
        },
    }
}

async fn read_lines<T>(
    stream: T,
    frames: Option<mpsc::UnboundedSender<String>>,
    recent: Arc<Mutex<VecDeque<String>>>,
    log_path: PathBuf,
) where
    T: AsyncRead + Unpin,
{
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
        .ok();
    let is_stderr = frames.is_none();
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end();

        if let (Some(tx), Some(token)) = (&frames, parse_frame(line)) {
            let _ = tx.send(token.to_string());
            continue;
        }
        if !is_stderr && first_message_line(line).is_none() {
            continue;
        }
        if line.is_empty() {
            continue;
        }

        {
            let mut recent = recent.lock();
            if recent.len() == RECENT_LINES {
                recent.pop_front();
            }
            recent.push_back(line.trim().to_string());
        }
        if let Some(file) = log.as_mut() {
            let _ = file.write_all(format!("{line}\n").as_bytes()).await;
        }
    }
}

async fn remove_marker(marker: &Path) {
    match tokio::fs::remove_file(marker).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(marker = %marker.display(), "cannot remove marker: {err}"),
    }
}

/// One long-lived SQL*Plus process.
pub struct SqlplusSession {
    opts: SessionOptions,
    id: String,
    counter: u64,
    restarts: u32,
    process: Option<Process>,
}

impl std::fmt::Debug for SqlplusSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlplusSession")
            .field("sid", &self.opts.sid)
            .field("worker", &self.opts.worker)
            .field("id", &self.id)
            .field("runs", &self.counter)
            .field("restarts", &self.restarts)
            .field("running", &self.process.is_some())
            .finish()
    }
}

impl SqlplusSession {
    /// Start the process and wait until it has logged on.
    pub async fn start(opts: SessionOptions) -> Result<Self> {
        let mut session = Self {
            opts,
            id: Uuid::now_v7().simple().to_string(),
            counter: 0,
            restarts: 0,
            process: None,
        };
        session.spawn().await?;
        Ok(session)
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.child.id())
    }

    fn next_token(&mut self) -> String {
        self.counter += 1;
        format!("{}-{}", self.id, self.counter)
    }

    async fn spawn(&mut self) -> Result<()> {
        let mut process = Process::spawn(&self.opts)?;
        let token = self.next_token();
        let failed = |reason: String| CollectError::SessionStart {
            sid: self.opts.sid.clone(),
            reason,
        };

        let script = format!("{SESSION_INIT}PROMPT {FRAME_PREFIX} {token}\n");
        let waited = match process.send(&script).await {
            Ok(()) => {
                process
                    .wait(Signal::Frame(&token), self.opts.config.start_timeout())
                    .await
            }
            Err(_) => Waited::Exited(process.child.wait().await.ok().and_then(|s| s.code())),
        };

        match waited {
            Waited::Done => {
                self.process = Some(process);
                Ok(())
            }
            Waited::Exited(status) => {
                process.drain().await;
                let output = process.recent_output();
                let detail = scan_signature(&output)
                    .map(|sig| sig.line)
                    .or_else(|| first_message_line(&output))
                    .unwrap_or_else(|| "no output".into());
                Err(failed(format!("exited with status {status:?}: {detail}")))
            }
            Waited::TimedOut => {
                process.kill().await;
                Err(failed(format!(
                    "no response within {}s",
                    self.opts.config.start_timeout_secs
                )))
            }
        }
    }

    fn output_path(&self, output_file: &Path) -> PathBuf {
        if output_file.is_absolute() {
            output_file.to_path_buf()
        } else {
            self.opts.scratch.join(output_file)
        }
    }

    async fn classify_exit(&self, name: &str, status: Option<i32>, process: &Process, output: &Path) -> CollectError {
        let mut partial = process.recent_output();
        if let Ok(bytes) = tokio::fs::read(output).await {
            partial.push('\n');
            partial.push_str(&String::from_utf8_lossy(&bytes));
        }
        match scan_signature(&partial) {
            Some(sig) => CollectError::Sql {
                sid: self.opts.sid.clone(),
                job: name.to_string(),
                code: sig.code,
                line: sig.line,
            },
            None => CollectError::Terminated {
                sid: self.opts.sid.clone(),
                job: name.to_string(),
                status,
                detail: first_message_line(&partial),
            },
        }
    }
}

#[async_trait]
impl ReportSession for SqlplusSession {
    async fn run(
        &mut self,
        name: &str,
        query: &str,
        output_file: &Path,
        header: Option<&str>,
    ) -> Result<RunOutcome> {
        let started = Instant::now();

        let alive = self.process.as_mut().is_some_and(Process::is_alive);
        if !alive {
            tracing::debug!(sid = %self.opts.sid, worker = %self.opts.worker, "session process gone, restarting");
            self.process = None;
            self.restarts += 1;
            telemetry::record_session_restart(&self.opts.sid);
            self.spawn().await?;
        }

        let token = self.next_token();
        let output = self.output_path(output_file);
        let marker = self.opts.lock_dir.join(format!("{token}.done"));
        let mode = self.opts.config.completion;
        let signal = match mode {
            CompletionMode::ControlChannel => Signal::Frame(&token),
            CompletionMode::Marker => Signal::Marker(&marker, self.opts.config.poll_interval()),
        };
        let script = job_script(
            header,
            &output,
            query,
            &completion_directive(mode, &token, &marker),
        );
        let job_timeout = self.opts.config.job_timeout();

        let Some(process) = self.process.as_mut() else {
            return Err(CollectError::SessionStart {
                sid: self.opts.sid.clone(),
                reason: "no session process".into(),
            });
        };
        process.recent.lock().clear();

        let waited = match process.send(&script).await {
            Ok(()) => process.wait(signal, job_timeout).await,
            Err(err) => {
                tracing::debug!("writing to session failed: {err}");
                Waited::Exited(process.child.wait().await.ok().and_then(|s| s.code()))
            }
        };

        match waited {
            Waited::Done => {
                remove_marker(&marker).await;
                Ok(RunOutcome {
                    elapsed: started.elapsed(),
                    exit_status: 0,
                    status: RunStatus::Ok,
                    output,
                })
            }
            Waited::Exited(status) => {
                let mut process = self.process.take();
                if let Some(p) = process.as_mut() {
                    p.drain().await;
                }
                remove_marker(&marker).await;
                let err = match process.as_ref() {
                    Some(p) => self.classify_exit(name, status, p, &output).await,
                    None => CollectError::Terminated {
                        sid: self.opts.sid.clone(),
                        job: name.to_string(),
                        status,
                        detail: None,
                    },
                };
                Err(err)
            }
            Waited::TimedOut => {
                if let Some(mut p) = self.process.take() {
                    p.kill().await;
                }
                remove_marker(&marker).await;
                Err(CollectError::JobTimeout {
                    sid: self.opts.sid.clone(),
                    job: name.to_string(),
                    elapsed_secs: started.elapsed().as_secs(),
                })
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.send("exit\n").await;
            let grace = self.opts.config.close_grace();
            if tokio::time::timeout(grace, process.child.wait()).await.is_err() {
                tracing::debug!(sid = %self.opts.sid, "session did not exit, killing");
                process.kill().await;
            } else {
                process.drain().await;
            }
        }
    }

    fn scratch_dir(&self) -> &Path {
        &self.opts.scratch
    }
}

/// Opens [`SqlplusSession`]s with scratch, lock and log paths in staging.
#[derive(Clone, Debug)]
pub struct SqlplusSessionFactory {
    config: SessionConfig,
    work_dir: PathBuf,
    lock_dir: PathBuf,
    log_dir: PathBuf,
}

impl SqlplusSessionFactory {
    pub fn new(config: SessionConfig, staging: &StagingDir) -> Self {
        Self {
            config,
            work_dir: staging.path(Area::Work),
            lock_dir: staging.path(Area::Lock),
            log_dir: staging.path(Area::Log),
        }
    }

    /// Options for the session of `worker` on `instance`.
    pub fn options(&self, instance: &Instance, worker: &str) -> SessionOptions {
        let name = format!("{}-{worker}", instance.sid);
        SessionOptions {
            sid: instance.sid.clone(),
            worker: worker.to_string(),
            command: instance.sqlplus(),
            scratch: self.work_dir.join(&name),
            lock_dir: self.lock_dir.clone(),
            log_path: self.log_dir.join(format!("{name}.log")),
            config: self.config.clone(),
        }
    }
}

#[async_trait]
impl SessionFactory for SqlplusSessionFactory {
    type Session = SqlplusSession;

    async fn open(&self, instance: &Instance, worker: &str) -> Result<SqlplusSession> {
        let opts = self.options(instance, worker);
        tokio::fs::create_dir_all(&opts.scratch)
            .await
            .map_err(|e| CollectError::io(format!("creating {}", opts.scratch.display()), e))?;
        SqlplusSession::start(opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_script_order() {
        let script = job_script(
            Some("define x=1"),
            Path::new("/tmp/w/out.html"),
            "SELECT 1 FROM dual;",
            "PROMPT #DBCOLLECT# abc-1\n",
        );
        assert_eq!(
            script,
            "define x=1\nSPOOL /tmp/w/out.html\nSELECT 1 FROM dual;\nSPOOL OFF\nPROMPT #DBCOLLECT# abc-1\n"
        );
    }

    #[test]
    fn test_directives() {
        let marker = Path::new("/tmp/lock/abc-1.done");
        assert_eq!(
            completion_directive(CompletionMode::ControlChannel, "abc-1", marker),
            "PROMPT #DBCOLLECT# abc-1\n"
        );
        assert_eq!(
            completion_directive(CompletionMode::Marker, "abc-1", marker),
            "HOST touch /tmp/lock/abc-1.done\n"
        );
    }

    #[test]
    fn test_parse_frame() {
        assert_eq!(parse_frame("#DBCOLLECT# abc-7\n"), Some("abc-7"));
        assert_eq!(parse_frame("  #DBCOLLECT# abc-7  "), Some("abc-7"));
        assert_eq!(parse_frame("<td>#DBCOLLECT#</td>"), None);
        assert_eq!(parse_frame("ORA-00942"), None);
    }

    #[test]
    fn test_factory_options() {
        let base = tempfile::tempdir().unwrap();
        let staging = StagingDir::create(base.path()).unwrap();
        let instance = Instance::new("DB1", "/u01/db19", crate::instance::Connection::Local);
        let factory = SqlplusSessionFactory::new(SessionConfig::default(), &staging);
        let opts = factory.options(&instance, "w0");
        assert_eq!(opts.scratch, staging.path(Area::Work).join("DB1-w0"));
        assert_eq!(opts.log_path, staging.path(Area::Log).join("DB1-w0.log"));
        assert_eq!(opts.command.program, PathBuf::from("/u01/db19/bin/sqlplus"));
    }
}

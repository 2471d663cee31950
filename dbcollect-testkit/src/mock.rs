use async_trait::async_trait;
use dbcollect::planner::{InfoArea, InfoExtract};
use dbcollect::*;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// One script handed to a [`MockSession`].
#[derive(Clone, Debug)]
pub struct RunRecord {
    pub sid: String,
    pub worker: String,
    pub job: String,
    pub header: Option<String>,
}

#[derive(Default)]
struct FactoryState {
    runs: Mutex<Vec<RunRecord>>,
    opened: Mutex<Vec<String>>,
    open_error: Mutex<Option<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    closed: AtomicUsize,
}

/// [`SessionFactory`] whose sessions interpret [`crate::TestJob`] queries
/// instead of running SQL*Plus.
#[derive(Clone)]
pub struct MockSessionFactory {
    scratch_root: PathBuf,
    job_timeout: Duration,
    state: Arc<FactoryState>,
}

impl MockSessionFactory {
    /// Sessions get scratch directories below `scratch_root`.
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            job_timeout: Duration::from_secs(5),
            state: Arc::new(FactoryState::default()),
        }
    }

    /// Scratch directories in the staging work area, so reports can be
    /// renamed into the report area.
    pub fn in_staging(staging: &StagingDir) -> Self {
        Self::new(staging.path(Area::Work))
    }

    /// How long a hanging job blocks before it times out.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Fail every subsequent `open` with a start error.
    pub fn fail_open(&self, reason: impl Into<String>) {
        *self.state.open_error.lock() = Some(reason.into());
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.state.runs.lock().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.state.opened.lock().clone()
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Most sessions that were open at the same time.
    pub fn max_active(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    pub fn assert_run_count_eq(&self, expected: usize) {
        let actual = self.state.runs.lock().len();
        assert_eq!(actual, expected, "Expected {expected} runs, got {actual}");
    }

    pub fn clear(&self) {
        self.state.runs.lock().clear();
        self.state.opened.lock().clear();
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    type Session = MockSession;

    async fn open(&self, instance: &Instance, worker: &str) -> Result<MockSession> {
        if let Some(reason) = self.state.open_error.lock().clone() {
            return Err(CollectError::SessionStart {
                sid: instance.sid.clone(),
                reason,
            });
        }

        let scratch = self.scratch_root.join(format!("{}-{worker}", instance.sid));
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| CollectError::io(format!("creating {}", scratch.display()), e))?;

        self.state.opened.lock().push(worker.to_string());
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(MockSession {
            sid: instance.sid.clone(),
            worker: worker.to_string(),
            scratch,
            job_timeout: self.job_timeout,
            open: true,
            state: Arc::clone(&self.state),
        })
    }
}

/// Session produced by [`MockSessionFactory`].
///
/// Queries containing `FAIL_ORA` fail with ORA-00942, `CRASH` with a
/// terminated process, `HANG` with a job timeout; `SLEEP <ms>` delays the
/// report. Everything else writes a small HTML report.
pub struct MockSession {
    sid: String,
    worker: String,
    scratch: PathBuf,
    job_timeout: Duration,
    open: bool,
    state: Arc<FactoryState>,
}

impl MockSession {
    fn sleep_ms(query: &str) -> Option<u64> {
        let rest = &query[query.find("SLEEP ")? + "SLEEP ".len()..];
        rest.split_whitespace().next()?.parse().ok()
    }
}

#[async_trait]
impl ReportSession for MockSession {
    async fn run(
        &mut self,
        name: &str,
        query: &str,
        output_file: &Path,
        header: Option<&str>,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        self.state.runs.lock().push(RunRecord {
            sid: self.sid.clone(),
            worker: self.worker.clone(),
            job: name.to_string(),
            header: header.map(str::to_string),
        });

        if query.contains("FAIL_ORA") {
            return Err(CollectError::Sql {
                sid: self.sid.clone(),
                job: name.to_string(),
                code: OracleCode::Ora00942,
                line: "ORA-00942: table or view does not exist".into(),
            });
        }
        if query.contains("CRASH") {
            return Err(CollectError::Terminated {
                sid: self.sid.clone(),
                job: name.to_string(),
                status: Some(3),
                detail: None,
            });
        }
        if query.contains("HANG") {
            tokio::time::sleep(self.job_timeout).await;
            return Err(CollectError::JobTimeout {
                sid: self.sid.clone(),
                job: name.to_string(),
                elapsed_secs: started.elapsed().as_secs(),
            });
        }
        if let Some(ms) = Self::sleep_ms(query) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let output = self.scratch.join(output_file);
        tokio::fs::write(&output, format!("<html><body>{name}</body></html>\n"))
            .await
            .map_err(|e| CollectError::io(format!("writing {}", output.display()), e))?;

        Ok(RunOutcome {
            elapsed: started.elapsed(),
            exit_status: 0,
            status: RunStatus::Ok,
            output,
        })
    }

    async fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            self.state.active.fetch_sub(1, Ordering::SeqCst);
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scratch_dir(&self) -> &Path {
        &self.scratch
    }
}

/// [`ArchiveSink`] that keeps stored files in memory.
#[derive(Clone, Default)]
pub struct RecordingArchive {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    reject: Arc<Mutex<Option<String>>>,
}

impl RecordingArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse tags starting with `prefix`.
    pub fn reject_prefix(&self, prefix: impl Into<String>) {
        *self.reject.lock() = Some(prefix.into());
    }

    pub fn tags(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    pub fn get(&self, tag: &str) -> Option<Vec<u8>> {
        self.files.lock().get(tag).cloned()
    }

    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        self.files
            .lock()
            .keys()
            .filter(|tag| tag.starts_with(prefix))
            .count()
    }

    fn check(&self, tag: &str) -> Result<()> {
        match self.reject.lock().as_deref() {
            Some(prefix) if tag.starts_with(prefix) => Err(CollectError::Archive {
                tag: tag.to_string(),
                reason: "rejected by test archive".into(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ArchiveSink for RecordingArchive {
    async fn store(&self, source: &Path, tag: &str) -> Result<u64> {
        self.check(tag)?;
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| CollectError::io(format!("reading {}", source.display()), e))?;
        let len = data.len() as u64;
        self.files.lock().insert(tag.to_string(), data);
        Ok(len)
    }

    async fn store_bytes(&self, data: &[u8], tag: &str) -> Result<u64> {
        self.check(tag)?;
        self.files.lock().insert(tag.to_string(), data.to_vec());
        Ok(data.len() as u64)
    }
}

/// [`MetadataSource`] with canned answers.
#[derive(Clone)]
pub struct ScriptedMetadata {
    usage: WorkloadUsage,
    windows: Vec<String>,
    extracts: Vec<InfoExtract>,
    fail_windows: Option<String>,
    fail_info: Option<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedMetadata {
    /// AWR in use, no snapshot windows, no extracts.
    pub fn new() -> Self {
        Self {
            usage: WorkloadUsage { awr: 1, statspack: 0 },
            windows: Vec::new(),
            extracts: Vec::new(),
            fail_windows: None,
            fail_info: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_usage(mut self, awr: u64, statspack: u64) -> Self {
        self.usage = WorkloadUsage { awr, statspack };
        self
    }

    /// `count` consecutive hourly windows of instance 1, dbid 1234.
    pub fn with_windows(mut self, count: usize) -> Self {
        self.windows = (0..count)
            .map(|i| {
                let hour = i % 24;
                let day = 1 + i / 24;
                format!(
                    "1234,1,{},{},202401{day:02}{hour:02}00,202401{day:02}{hour:02}59",
                    100 + i,
                    101 + i
                )
            })
            .collect();
        self
    }

    pub fn with_extract(mut self, area: InfoArea, name: &str, content: &str) -> Self {
        self.extracts.push(InfoExtract {
            area,
            name: name.to_string(),
            content: content.to_string(),
        });
        self
    }

    /// Fail the snapshot query with `reason`.
    pub fn with_window_failure(mut self, reason: impl Into<String>) -> Self {
        self.fail_windows = Some(reason.into());
        self
    }

    /// Fail the info scripts with `reason`.
    pub fn with_info_failure(mut self, reason: impl Into<String>) -> Self {
        self.fail_info = Some(reason.into());
        self
    }

    /// Names of the calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl Default for ScriptedMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataSource for ScriptedMetadata {
    async fn usage(&self, _instance: &Instance) -> Result<WorkloadUsage> {
        self.calls.lock().push("usage".into());
        Ok(self.usage)
    }

    async fn snapshot_windows(
        &self,
        instance: &Instance,
        kind: ReportKind,
        _policy: &ReportPolicy,
    ) -> Result<String> {
        self.calls.lock().push(format!("windows:{kind}"));
        if let Some(reason) = &self.fail_windows {
            return Err(CollectError::Planner {
                sid: instance.sid.clone(),
                reason: reason.clone(),
            });
        }
        Ok(self.windows.join("\n"))
    }

    async fn info(&self, instance: &Instance) -> Result<Vec<InfoExtract>> {
        self.calls.lock().push("info".into());
        if let Some(reason) = &self.fail_info {
            return Err(CollectError::Planner {
                sid: instance.sid.clone(),
                reason: reason.clone(),
            });
        }
        Ok(self.extracts.clone())
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{CollectConfig, RunConfig};
use crate::error::{CollectError, Result};
use crate::instance::Instance;
use crate::job::{Job, JobKind};
use crate::planner::{InfoArea, MetadataSource};
use crate::queue::{DoneSignal, JobQueue};
use crate::session::{ReportSession, SessionFactory};
use crate::staging::{Area, StagingDir, publish};
use crate::telemetry;

/// Queue and wait settings shared by the generator and the processors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Bounded queue capacity.
    pub queue_capacity: usize,
    /// How long a push may block on a full queue before the generator gives up.
    pub push_timeout_ms: u64,
    /// How long a processor waits on an empty queue before re-checking.
    pub pop_timeout_ms: u64,
}

impl WorkerConfig {
    pub fn from_config(config: &CollectConfig) -> Self {
        Self::default()
            .with_queue_capacity(config.run.queue_capacity)
            .with_push_timeout(config.session.job_timeout())
            .with_pop_timeout(config.run.pop_timeout())
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let run = RunConfig::default();
        Self {
            queue_capacity: run.queue_capacity,
            push_timeout_ms: 600_000,
            pop_timeout_ms: run.pop_timeout_ms,
        }
    }
}

/// State shared by the generator and processors of one instance run.
///
/// Only the queue and the done flag are shared; everything else is
/// read-only.
#[derive(Debug)]
pub struct RunContext<J> {
    pub sid: String,
    pub queue: JobQueue<J>,
    pub done: DoneSignal,
    pub tasks: usize,
    pub config: WorkerConfig,
    /// Staging directory finished reports are renamed into.
    pub report_dir: PathBuf,
    pub dbinfo_dir: PathBuf,
    pub capacity_dir: PathBuf,
}

impl<J> RunContext<J> {
    pub fn new(sid: impl Into<String>, tasks: usize, config: WorkerConfig, staging: &StagingDir) -> Self {
        Self {
            sid: sid.into(),
            queue: JobQueue::new(config.queue_capacity),
            done: DoneSignal::new(),
            tasks,
            config,
            report_dir: staging.path(Area::Awr),
            dbinfo_dir: staging.path(Area::DbInfo),
            capacity_dir: staging.path(Area::Capacity),
        }
    }

    fn info_dir(&self, area: InfoArea) -> &Path {
        match area {
            InfoArea::DbInfo => &self.dbinfo_dir,
            InfoArea::Capacity => &self.capacity_dir,
        }
    }
}

/// Metadata source and instance the generator collects info extracts from.
pub struct InfoSource<M: ?Sized> {
    pub metadata: Arc<M>,
    pub instance: Instance,
}

/// Write info extracts, then push every job onto the queue.
///
/// The done flag is set however this returns, including panics and
/// cancellation. A push that cannot complete within the push timeout fails
/// the generator with [`CollectError::GeneratorTimeout`].
pub async fn job_generator<J, M>(
    ctx: Arc<RunContext<J>>,
    jobs: Vec<J>,
    info: Option<InfoSource<M>>,
) -> Result<()>
where
    J: Job,
    M: MetadataSource + ?Sized,
{
    let _done = ctx.done.guard();

    if let Some(source) = info {
        let extracts = source.metadata.info(&source.instance).await?;
        for extract in extracts {
            let path = ctx.info_dir(extract.area).join(&extract.name);
            tokio::fs::write(&path, extract.content.as_bytes())
                .await
                .map_err(|e| CollectError::io(format!("writing {}", path.display()), e))?;
            tracing::debug!(file = %path.display(), "info extract written");
        }
    }

    let total = jobs.len();
    let wait = ctx.config.push_timeout();
    for job in jobs {
        if ctx.queue.push(job, wait).await.is_err() {
            tracing::error!(sid = %ctx.sid, "queue full for {}s, workers stalled", wait.as_secs());
            return Err(CollectError::GeneratorTimeout {
                sid: ctx.sid.clone(),
                waited_secs: wait.as_secs(),
            });
        }
        telemetry::set_queue_depth(&ctx.sid, ctx.queue.len());
    }
    tracing::debug!(sid = %ctx.sid, jobs = total, "all jobs queued");
    Ok(())
}

/// Take jobs from the queue and run them in one session until the queue
/// is drained and the generator finished. Returns the number of reports
/// produced.
pub async fn job_processor<J, F>(
    ctx: Arc<RunContext<J>>,
    factory: Arc<F>,
    instance: Instance,
    worker: String,
) -> Result<usize>
where
    J: Job,
    F: SessionFactory,
{
    let mut session = factory.open(&instance, &worker).await?;
    tracing::debug!(worker = %worker, "session opened");
    let result = process_jobs(&ctx, &mut session).await;
    session.close().await;
    result
}

async fn process_jobs<J, S>(ctx: &RunContext<J>, session: &mut S) -> Result<usize>
where
    J: Job,
    S: ReportSession + ?Sized,
{
    let mut processed = 0;
    loop {
        // nothing can be pushed once done is set
        if ctx.done.is_set() && ctx.queue.is_empty() {
            break;
        }
        let next = tokio::select! {
            biased;
            job = ctx.queue.pop(ctx.config.pop_timeout()) => job,
            _ = ctx.done.wait() => None,
        };
        let Some(job) = next else {
            continue;
        };
        telemetry::set_queue_depth(&ctx.sid, ctx.queue.len());
        run_job(ctx, session, &job).await?;
        processed += 1;
    }
    Ok(processed)
}

async fn run_job<J, S>(ctx: &RunContext<J>, session: &mut S, job: &J) -> Result<()>
where
    J: Job,
    S: ReportSession + ?Sized,
{
    let name = job.output_name();
    let kind = job.kind().as_str();
    let timing = telemetry::record_job_start(&name);
    let header = job.header();

    let result = telemetry::instrument_job(
        &name,
        kind,
        session.run(&name, &job.query(), Path::new(&name), header.as_deref()),
    )
    .await;

    match result {
        Ok(outcome) => {
            publish(&outcome.output, &ctx.report_dir)?;
            tracing::debug!(job = %name, elapsed_ms = outcome.elapsed.as_millis() as u64, "report finished");
            telemetry::record_job_end(timing, &ctx.sid, kind, "ok");
            Ok(())
        }
        Err(err) => {
            let status = match &err {
                CollectError::JobTimeout { .. } => "timeout",
                _ => "failed",
            };
            telemetry::record_job_end(timing, &ctx.sid, kind, status);
            tracing::error!(job = %name, code = %err.code(), exit_code = err.exit_code(), "{err}");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_uses_job_timeout_for_push() {
        let mut config = CollectConfig::default();
        config.session.job_timeout_minutes = 3;
        config.run.queue_capacity = 4;
        let worker = WorkerConfig::from_config(&config);
        assert_eq!(worker.push_timeout(), Duration::from_secs(180));
        assert_eq!(worker.pop_timeout(), Duration::from_secs(1));
        assert_eq!(worker.queue_capacity, 4);
    }
}

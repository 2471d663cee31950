use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

use crate::budget::TaskBudget;
use crate::config::CollectConfig;
use crate::error::{CollectError, Result};
use crate::ingest::{ArchiveSink, Ingestor, Progress, area_prefix};
use crate::instance::Instance;
use crate::job::{Job, ReportKind};
use crate::planner::{self, MetadataSource};
use crate::session::SessionFactory;
use crate::staging::{Area, StagingDir, list_files};
use crate::telemetry;

use super::worker::{InfoSource, RunContext, WorkerConfig, job_generator, job_processor};

/// Exit code of a task that panicked.
pub const EXIT_PANICKED: i32 = 70;
/// Exit code of a task that was aborted.
pub const EXIT_ABORTED: i32 = 71;

/// Result of collecting one instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub sid: String,
    pub kind: Option<ReportKind>,
    /// Reports planned.
    pub planned: usize,
    /// Reports stored in the archive.
    pub archived: usize,
    /// Info, capacity and log files stored in the archive.
    pub auxiliary: usize,
    pub elapsed: Duration,
}

/// Per-instance collection orchestrator.
///
/// For each instance it plans the reports, starts one generator and a pool
/// of processors, and moves finished reports into the archive while they
/// run.
pub struct CollectRuntime<F, M, A>
where
    F: SessionFactory,
    M: MetadataSource + 'static,
    A: ArchiveSink + 'static,
{
    config: CollectConfig,
    staging: Arc<StagingDir>,
    factory: Arc<F>,
    metadata: Arc<M>,
    archive: Arc<A>,
}

impl<F, M, A> fmt::Debug for CollectRuntime<F, M, A>
where
    F: SessionFactory,
    M: MetadataSource + 'static,
    A: ArchiveSink + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectRuntime")
            .field("staging", &self.staging.root())
            .field("factory_type", &type_name::<F>())
            .field("metadata_type", &type_name::<M>())
            .field("archive_type", &type_name::<A>())
            .finish()
    }
}

impl<F, M, A> CollectRuntime<F, M, A>
where
    F: SessionFactory,
    M: MetadataSource + 'static,
    A: ArchiveSink + 'static,
{
    pub fn new(
        config: CollectConfig,
        staging: Arc<StagingDir>,
        factory: Arc<F>,
        metadata: Arc<M>,
        archive: Arc<A>,
    ) -> Self {
        Self {
            config,
            staging,
            factory,
            metadata,
            archive,
        }
    }

    pub fn config(&self) -> &CollectConfig {
        &self.config
    }

    pub fn staging(&self) -> &StagingDir {
        &self.staging
    }

    pub fn archive(&self) -> Arc<A> {
        Arc::clone(&self.archive)
    }

    /// Plan and collect the reports and info extracts of `instance`.
    pub async fn collect_instance(&self, instance: &Instance) -> Result<RunSummary> {
        let sid = instance.sid.clone();
        async {
            let plan = planner::plan(instance, &self.config.policy, self.metadata.as_ref()).await?;
            if plan.is_empty() {
                tracing::info!(sid = %sid, "no reports to generate, collecting info only");
            } else {
                tracing::debug!(sid = %sid, reports = plan.len(), kind = ?plan.kind, "plan ready");
            }
            let instance = match plan.usage {
                Some(usage) => instance.clone().with_usage(usage),
                None => instance.clone(),
            };
            let mut summary = self.run_jobs(&instance, plan.jobs, true).await?;
            summary.kind = plan.kind;
            Ok(summary)
        }
        .instrument(telemetry::instance_span(&sid))
        .await
    }

    /// Run `jobs` against `instance` with a generator and a processor pool.
    ///
    /// With `collect_info` the generator also writes the instance's info
    /// extracts. Any generator or processor failure fails the run once all
    /// tasks have stopped.
    pub async fn run_jobs<J: Job>(
        &self,
        instance: &Instance,
        jobs: Vec<J>,
        collect_info: bool,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let sid = instance.sid.clone();
        let planned = jobs.len();
        let tasks = TaskBudget::detect(instance.cpu_count)
            .tasks(self.config.run.tasks)
            .min(planned);
        tracing::info!(sid = %sid, reports = planned, tasks, "starting report generation");

        let ctx = Arc::new(RunContext::new(
            sid.clone(),
            tasks,
            WorkerConfig::from_config(&self.config),
            &self.staging,
        ));

        let info = collect_info.then(|| InfoSource {
            metadata: Arc::clone(&self.metadata),
            instance: instance.clone(),
        });
        let generator = tokio::spawn(
            job_generator(Arc::clone(&ctx), jobs, info).instrument(telemetry::generator_span(&sid)),
        );

        let mut workers = Vec::with_capacity(ctx.tasks);
        for i in 0..ctx.tasks {
            let worker = format!("w{i}");
            let handle = tokio::spawn(
                job_processor(
                    Arc::clone(&ctx),
                    Arc::clone(&self.factory),
                    instance.clone(),
                    worker.clone(),
                )
                .instrument(telemetry::session_span(&sid, &worker)),
            );
            workers.push((worker, handle));
        }

        let ingestor = Ingestor::new(self.archive.as_ref(), sid.clone(), self.config.policy.strip);
        let mut progress = Progress::new(planned, self.config.run.show_progress);
        let ingested = self
            .ingest_while_running(&ingestor, &mut progress, &generator, &workers)
            .instrument(telemetry::ingest_span(&sid))
            .await;
        progress.finish();

        // a stalled or aborted generator is a symptom, report the worker error
        let mut failure = None;
        for (worker, handle) in workers {
            if let Err(err) = join_worker(&sid, &worker, handle).await {
                failure.get_or_insert(err);
            }
        }
        if let Err(err) = join_generator(&sid, generator).await {
            failure.get_or_insert(err);
        }

        // session logs help diagnose failures, store them either way
        let logs = ingestor
            .sweep(&self.staging.path(Area::Log), &area_prefix(Area::Log))
            .await;

        if let Some(err) = failure {
            return Err(err);
        }
        ingested?;

        let mut auxiliary = logs?;
        for area in [Area::DbInfo, Area::Capacity] {
            auxiliary += ingestor
                .sweep(&self.staging.path(area), &area_prefix(area))
                .await?;
        }

        let summary = RunSummary {
            sid,
            kind: None,
            planned,
            archived: progress.done(),
            auxiliary,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            sid = %summary.sid,
            archived = summary.archived,
            auxiliary = summary.auxiliary,
            elapsed_secs = summary.elapsed.as_secs(),
            "instance finished"
        );
        Ok(summary)
    }

    async fn ingest_while_running(
        &self,
        ingestor: &Ingestor<'_, A>,
        progress: &mut Progress,
        generator: &JoinHandle<Result<()>>,
        workers: &[(String, JoinHandle<Result<usize>>)],
    ) -> Result<()> {
        let report_dir = self.staging.path(Area::Awr);
        let interval = self.config.run.ingest_interval();
        loop {
            let workers_running = workers.iter().any(|(_, h)| !h.is_finished());
            let running = workers_running || !generator.is_finished();

            // nobody left to drain the queue
            if !workers.is_empty() && !workers_running && !generator.is_finished() {
                tracing::warn!("all workers stopped, aborting generator");
                generator.abort();
            }

            progress.advance(ingestor.ingest_reports(&report_dir).await?);

            if !running && list_files(&report_dir)?.is_empty() {
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
    }
}

fn task_exit_code(err: &JoinError) -> i32 {
    if err.is_panic() { EXIT_PANICKED } else { EXIT_ABORTED }
}

async fn join_generator(sid: &str, handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            tracing::error!(sid, code = %err.code(), exit_code = err.exit_code(), "generator failed: {err}");
            // the report set is incomplete whatever the cause
            if err.is_instance_scoped() {
                Err(CollectError::GeneratorFailed {
                    sid: sid.to_string(),
                    cause: Box::new(err),
                })
            } else {
                Err(err)
            }
        }
        Err(join) => {
            let exit_code = task_exit_code(&join);
            tracing::error!(sid, exit_code, "generator task failed: {join}");
            Err(CollectError::WorkerFailed {
                sid: sid.to_string(),
                worker: "generator".into(),
                exit_code,
            })
        }
    }
}

async fn join_worker(sid: &str, worker: &str, handle: JoinHandle<Result<usize>>) -> Result<usize> {
    match handle.await {
        Ok(Ok(processed)) => {
            tracing::debug!(sid, worker, processed, "worker finished");
            Ok(processed)
        }
        Ok(Err(err)) => {
            tracing::error!(sid, worker, exit_code = err.exit_code(), "worker exited: {err}");
            Err(err)
        }
        Err(join) => {
            let exit_code = task_exit_code(&join);
            tracing::error!(sid, worker, exit_code, "worker task failed: {join}");
            Err(CollectError::WorkerFailed {
                sid: sid.to_string(),
                worker: worker.to_string(),
                exit_code,
            })
        }
    }
}

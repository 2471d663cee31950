//! Runtime integration tests for the per-instance collection pipeline.
//!
//! Tests planning from metadata, exactly-once processing across the
//! worker pool, info extract collection, and failure propagation from
//! workers, the generator and the archive.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dbcollect::planner::InfoArea;
use dbcollect::runtime::{RunContext, WorkerConfig, job_generator};
use dbcollect::*;
use dbcollect_testkit::{MockSessionFactory, RecordingArchive, ScriptedMetadata, TestJob};

type TestRuntime = CollectRuntime<MockSessionFactory, ScriptedMetadata, RecordingArchive>;

struct Harness {
    runtime: TestRuntime,
    factory: Arc<MockSessionFactory>,
    metadata: Arc<ScriptedMetadata>,
    archive: Arc<RecordingArchive>,
}

fn test_config(tasks: usize) -> CollectConfig {
    let mut config = CollectConfig::default();
    config.run.tasks = Some(tasks);
    config.run.show_progress = false;
    config.run.ingest_interval_ms = 20;
    config.run.pop_timeout_ms = 50;
    config.session.job_timeout_secs = Some(1);
    config
}

fn harness(config: CollectConfig, metadata: ScriptedMetadata) -> Harness {
    let staging = Arc::new(StagingDir::create(&std::env::temp_dir()).expect("staging"));
    let factory = Arc::new(
        MockSessionFactory::in_staging(&staging).with_job_timeout(Duration::from_millis(200)),
    );
    let metadata = Arc::new(metadata);
    let archive = Arc::new(RecordingArchive::new());
    let runtime = CollectRuntimeBuilder::new(config)
        .with_staging(staging)
        .with_factory(Arc::clone(&factory))
        .with_metadata(Arc::clone(&metadata))
        .with_archive(Arc::clone(&archive))
        .build()
        .expect("runtime builds");
    Harness {
        runtime,
        factory,
        metadata,
        archive,
    }
}

fn open_instance() -> Instance {
    let mut instance = Instance::new("DB1", "/u01/app/oracle/product/19", Connection::Local);
    instance.status = InstanceStatus::Open;
    instance.version = Some(19);
    instance.cpu_count = Some(8);
    instance
}

#[tokio::test]
async fn collect_instance_plans_runs_and_archives() {
    let metadata = ScriptedMetadata::new()
        .with_windows(7)
        .with_extract(InfoArea::DbInfo, "DB1_dbinfo.txt", "instance:DB1")
        .with_extract(InfoArea::Capacity, "DB1_capacity.txt", "USERS,10,100");
    let h = harness(test_config(3), metadata);

    let summary = h.runtime.collect_instance(&open_instance()).await.unwrap();

    assert_eq!(summary.sid, "DB1");
    assert_eq!(summary.kind, Some(ReportKind::Awr));
    assert_eq!(summary.planned, 7);
    assert_eq!(summary.archived, 7);
    assert_eq!(summary.auxiliary, 2);
    assert_eq!(h.archive.count_with_prefix("oracle/DB1/"), 7);
    assert!(
        h.archive
            .tags()
            .contains(&"oracle/DB1/DB1_1234_1_awr_100_101_202401010000.html".to_string())
    );
    assert_eq!(
        h.archive.get("oracle/dbinfo/DB1_dbinfo.txt").unwrap(),
        b"instance:DB1"
    );
    assert!(h.archive.get("oracle/capacity/DB1_capacity.txt").is_some());
    assert_eq!(h.metadata.calls(), ["usage", "windows:awr", "info"]);
    h.factory.assert_run_count_eq(7);
}

#[tokio::test]
async fn statspack_chosen_when_awr_unused() {
    let metadata = ScriptedMetadata::new().with_usage(0, 12).with_windows(2);
    let h = harness(test_config(2), metadata);

    let summary = h.runtime.collect_instance(&open_instance()).await.unwrap();

    assert_eq!(summary.kind, Some(ReportKind::Statspack));
    assert_eq!(h.archive.count_with_prefix("oracle/DB1/"), 2);
    assert!(h.archive.tags().iter().all(|t| !t.starts_with("oracle/DB1/") || t.ends_with(".txt")));
}

#[tokio::test]
async fn every_job_runs_exactly_once() {
    let h = harness(test_config(4), ScriptedMetadata::new());
    let jobs = TestJob::batch("job", 40);
    let expected: HashSet<String> = jobs.iter().map(|j| j.output_name()).collect();

    let summary = h.runtime.run_jobs(&open_instance(), jobs, false).await.unwrap();

    assert_eq!(summary.planned, 40);
    assert_eq!(summary.archived, 40);
    let runs = h.factory.runs();
    assert_eq!(runs.len(), 40);
    let seen: HashSet<String> = runs.iter().map(|r| r.job.clone()).collect();
    assert_eq!(seen, expected);

    let stored: HashSet<String> = h
        .archive
        .tags()
        .into_iter()
        .filter_map(|t| t.strip_prefix("oracle/DB1/").map(str::to_string))
        .collect();
    assert_eq!(stored, expected);

    let workers = TaskBudget::detect(Some(8)).tasks(Some(4));
    assert_eq!(h.factory.opened().len(), workers);
    assert_eq!(h.factory.closed(), workers);
    assert!(h.factory.max_active() <= workers);
}

#[tokio::test]
async fn pool_is_capped_by_planned_jobs() {
    let h = harness(test_config(8), ScriptedMetadata::new());

    let summary = h
        .runtime
        .run_jobs(&open_instance(), TestJob::batch("few", 2), false)
        .await
        .unwrap();
    assert_eq!(summary.archived, 2);
    let workers = TaskBudget::detect(Some(8)).tasks(Some(8)).min(2);
    assert_eq!(h.factory.opened().len(), workers);
}

#[tokio::test]
async fn plan_counts_snapshot_windows() {
    let policy = ReportPolicy::default();

    let plan = dbcollect::planner::plan(&open_instance(), &policy, &ScriptedMetadata::new().with_windows(5))
        .await
        .unwrap();
    assert_eq!(plan.len(), 5);
    assert!(!plan.is_empty());
    assert_eq!(plan.kind, Some(ReportKind::Awr));

    let plan = dbcollect::planner::plan(&open_instance(), &policy, &ScriptedMetadata::new())
        .await
        .unwrap();
    assert!(plan.is_empty());
}

#[tokio::test]
async fn no_windows_means_no_sessions() {
    let metadata = ScriptedMetadata::new()
        .with_extract(InfoArea::DbInfo, "DB1_dbinfo.txt", "instance:DB1");
    let h = harness(test_config(4), metadata);

    let summary = h.runtime.collect_instance(&open_instance()).await.unwrap();

    assert_eq!(summary.planned, 0);
    assert_eq!(summary.archived, 0);
    assert!(h.factory.opened().is_empty());
    assert!(h.archive.get("oracle/dbinfo/DB1_dbinfo.txt").is_some());
}

#[tokio::test]
async fn disabled_reports_still_collect_info() {
    let mut config = test_config(4);
    config.policy.no_reports = true;
    let metadata = ScriptedMetadata::new()
        .with_windows(5)
        .with_extract(InfoArea::DbInfo, "DB1_dbinfo.txt", "instance:DB1");
    let h = harness(config, metadata);

    let summary = h.runtime.collect_instance(&open_instance()).await.unwrap();

    assert_eq!(summary.planned, 0);
    assert_eq!(summary.kind, None);
    assert_eq!(h.metadata.calls(), ["info"]);
    assert_eq!(summary.auxiliary, 1);
}

#[tokio::test]
async fn missing_workload_repository_is_instance_scoped() {
    let metadata = ScriptedMetadata::new().with_usage(0, 0).with_windows(3);
    let h = harness(test_config(2), metadata);

    let err = h.runtime.collect_instance(&open_instance()).await.unwrap_err();
    assert!(matches!(err, CollectError::NoWorkloadRepository { .. }));
    assert!(err.is_instance_scoped());
    assert!(h.factory.opened().is_empty());
}

#[tokio::test]
async fn failing_report_fails_the_run() {
    let h = harness(test_config(3), ScriptedMetadata::new());
    let mut jobs = TestJob::batch("ok", 6);
    jobs.insert(3, TestJob::failing("bad"));

    let err = h.runtime.run_jobs(&open_instance(), jobs, false).await.unwrap_err();

    assert!(matches!(err, CollectError::Sql { code: OracleCode::Ora00942, .. }), "got {err:?}");
    assert!(!err.is_instance_scoped());
    assert_eq!(h.factory.closed(), h.factory.opened().len());
}

#[tokio::test]
async fn hanging_report_times_out() {
    let h = harness(test_config(1), ScriptedMetadata::new());
    let jobs = vec![TestJob::simple("first"), TestJob::hanging("stuck")];

    let err = h.runtime.run_jobs(&open_instance(), jobs, false).await.unwrap_err();

    assert!(matches!(err, CollectError::JobTimeout { .. }), "got {err:?}");
    assert_eq!(h.archive.count_with_prefix("oracle/DB1/"), 1);
}

#[tokio::test]
async fn session_start_failure_stops_generator() {
    let mut config = test_config(2);
    config.run.queue_capacity = 2;
    let h = harness(config, ScriptedMetadata::new());
    h.factory.fail_open("cannot log on");

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        h.runtime.run_jobs(&open_instance(), TestJob::batch("job", 20), false),
    )
    .await
    .expect("run does not hang");

    let err = result.unwrap_err();
    assert!(matches!(err, CollectError::SessionStart { .. }), "got {err:?}");
    assert_eq!(err.exit_code(), 32);
}

#[tokio::test]
async fn archive_failure_fails_the_run() {
    let h = harness(test_config(2), ScriptedMetadata::new());
    h.archive.reject_prefix("oracle/DB1/");

    let err = h
        .runtime
        .run_jobs(&open_instance(), TestJob::batch("job", 3), false)
        .await
        .unwrap_err();
    assert!(matches!(err, CollectError::Archive { .. }), "got {err:?}");
    assert_eq!(err.exit_code(), 50);
}

#[tokio::test]
async fn generator_times_out_on_full_queue_and_sets_done() {
    let staging = StagingDir::create(&std::env::temp_dir()).unwrap();
    let config = WorkerConfig::default()
        .with_queue_capacity(1)
        .with_push_timeout(Duration::from_millis(50));
    let ctx = Arc::new(RunContext::new("DB1", 1, config, &staging));

    let err = job_generator::<TestJob, ScriptedMetadata>(
        Arc::clone(&ctx),
        TestJob::batch("job", 3),
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CollectError::GeneratorTimeout { ref sid, .. } if sid == "DB1"));
    assert_eq!(err.exit_code(), 11);
    assert!(ctx.done.is_set());
    assert_eq!(ctx.queue.len(), 1);
}

#[tokio::test]
async fn info_failure_in_generator_aborts_the_run() {
    let metadata = ScriptedMetadata::new()
        .with_windows(4)
        .with_info_failure("ORA-00942 in info script");
    let h = harness(test_config(2), metadata);

    let err = h.runtime.collect_instance(&open_instance()).await.unwrap_err();

    assert!(
        matches!(err, CollectError::GeneratorFailed { ref sid, .. } if sid == "DB1"),
        "got {err:?}"
    );
    assert!(!err.is_instance_scoped());
    assert_eq!(err.code(), ErrorCode::E014);
    assert!(err.to_string().contains("ORA-00942"));
    assert_eq!(h.archive.count_with_prefix("oracle/DB1/"), 0);
    h.factory.assert_run_count_eq(0);
}

#[tokio::test]
async fn builder_reports_missing_dependencies() {
    let result = CollectRuntimeBuilder::<MockSessionFactory, ScriptedMetadata, RecordingArchive>::new(
        CollectConfig::default(),
    )
    .with_factory(Arc::new(MockSessionFactory::new(std::env::temp_dir())))
    .build();

    let err = result.err().expect("build fails");
    assert!(err.to_string().contains("dependency missing"));
}

//! Tracing spans and metric hooks for a collection run.
//!
//! Span helpers return spans named `dbcollect.<stage>` so log output can be
//! filtered per stage. The `record_*` functions log the event and, with the
//! `metrics` feature enabled, update the Prometheus metrics in
//! [`crate::metrics`]. Without the feature they only log.
//!
//! # Example
//!
//! ```ignore
//! use dbcollect::telemetry::{job_span, record_job_start, record_job_end};
//!
//! let timing = record_job_start("DB1_..._awr_100_101_x.html");
//! // ... run the report
//! record_job_end(timing, "DB1", "awr", "ok");
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{Instrument, Span, info_span};

/// Span covering discovery and resolution of all instances.
#[must_use]
pub fn resolve_span() -> Span {
    info_span!("dbcollect.resolve")
}

/// Span covering planning and report generation for one instance.
#[must_use]
pub fn instance_span(sid: impl AsRef<str>) -> Span {
    info_span!("dbcollect.instance", sid = %sid.as_ref())
}

/// Span for the job generator of one instance.
#[must_use]
pub fn generator_span(sid: impl AsRef<str>) -> Span {
    info_span!("dbcollect.generator", sid = %sid.as_ref())
}

/// Span for one worker and its SQL*Plus session.
#[must_use]
pub fn session_span(sid: impl AsRef<str>, worker: impl AsRef<str>) -> Span {
    info_span!(
        "dbcollect.session",
        sid = %sid.as_ref(),
        worker = %worker.as_ref(),
    )
}

/// Span for one report job.
#[must_use]
pub fn job_span(job: impl AsRef<str>, kind: impl AsRef<str>) -> Span {
    info_span!(
        "dbcollect.job",
        job = %job.as_ref(),
        job_kind = %kind.as_ref(),
    )
}

/// Span for the ingestion loop moving staged files to the archive.
#[must_use]
pub fn ingest_span(sid: impl AsRef<str>) -> Span {
    info_span!("dbcollect.ingest", sid = %sid.as_ref())
}

/// Attach a job span to `future`.
pub fn instrument_job<F>(
    job: impl AsRef<str>,
    kind: impl AsRef<str>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(job_span(job, kind))
}

/// Record a report that finished, failed or timed out.
pub fn record_report_completed(
    sid: impl AsRef<str>,
    kind: impl AsRef<str>,
    status: impl AsRef<str>,
) {
    tracing::debug!(
        sid = %sid.as_ref(),
        job_kind = %kind.as_ref(),
        status = %status.as_ref(),
        "report completed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_report_completed(sid.as_ref(), kind.as_ref(), status.as_ref());
}

/// Record a SQL*Plus session that had to be started again.
pub fn record_session_restart(sid: impl AsRef<str>) {
    tracing::warn!(sid = %sid.as_ref(), "session restarted");

    #[cfg(feature = "metrics")]
    crate::metrics::record_session_restart(sid.as_ref());
}

/// Record a file stored in the archive.
pub fn record_file_archived(area: impl AsRef<str>, bytes: u64) {
    tracing::trace!(area = %area.as_ref(), bytes, "file archived");

    #[cfg(feature = "metrics")]
    crate::metrics::record_file_archived(area.as_ref(), bytes as f64);
}

/// Update the queue depth gauge of an instance.
pub fn set_queue_depth(sid: impl AsRef<str>, depth: usize) {
    tracing::trace!(sid = %sid.as_ref(), depth, "queue depth");

    #[cfg(feature = "metrics")]
    crate::metrics::set_queue_depth(sid.as_ref(), depth as f64);
}

pub fn observe_report_duration(
    sid: impl AsRef<str>,
    kind: impl AsRef<str>,
    status: impl AsRef<str>,
    duration: Duration,
) {
    tracing::debug!(
        sid = %sid.as_ref(),
        job_kind = %kind.as_ref(),
        status = %status.as_ref(),
        duration_secs = duration.as_secs_f64(),
        "report duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_report_duration(
        sid.as_ref(),
        kind.as_ref(),
        status.as_ref(),
        duration.as_secs_f64(),
    );
}

/// Start timing a job. Pass the handle to [`record_job_end`].
pub fn record_job_start(job: impl AsRef<str>) -> JobTimingHandle {
    JobTimingHandle {
        job: job.as_ref().to_string(),
        start: Instant::now(),
    }
}

/// Finish timing a job and record its outcome.
pub fn record_job_end(
    handle: JobTimingHandle,
    sid: impl AsRef<str>,
    kind: impl AsRef<str>,
    status: impl AsRef<str>,
) {
    let elapsed = handle.start.elapsed();
    record_report_completed(sid.as_ref(), kind.as_ref(), status.as_ref());
    observe_report_duration(sid, kind, status, elapsed);
}

/// Opaque timer returned by [`record_job_start`].
#[derive(Debug)]
pub struct JobTimingHandle {
    job: String,
    start: Instant,
}

impl JobTimingHandle {
    #[must_use]
    pub fn job(&self) -> &str {
        &self.job
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

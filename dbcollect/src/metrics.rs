//! Prometheus metrics for collection runs.
//!
//! Compiled only with the `metrics` feature. At the end of a run the
//! gathered text is stored in the archive next to the log.
//!
//! # Metrics
//!
//! ## Counters
//! - `dbcollect_reports_total` - reports finished, by status
//! - `dbcollect_session_restarts_total` - SQL*Plus sessions started again
//! - `dbcollect_archived_bytes_total` - bytes stored in the archive
//!
//! ## Gauges
//! - `dbcollect_queue_depth` - jobs waiting in the queue
//!
//! ## Histograms
//! - `dbcollect_report_duration_seconds` - report generation time
#![cfg(feature = "metrics")]

use std::sync::LazyLock;

use prometheus::{CounterVec, GaugeVec, HistogramVec, Opts, Registry, exponential_buckets};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `sid`, `job_kind`, `status`.
pub static REPORTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("dbcollect_reports_total", "Reports finished");
    CounterVec::new(opts, &["sid", "job_kind", "status"])
        .expect("dbcollect_reports_total metric creation failed")
});

/// Labels: `sid`.
pub static SESSION_RESTARTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "dbcollect_session_restarts_total",
        "SQL*Plus sessions started again after the process died",
    );
    CounterVec::new(opts, &["sid"])
        .expect("dbcollect_session_restarts_total metric creation failed")
});

/// Labels: `area`.
pub static ARCHIVED_BYTES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("dbcollect_archived_bytes_total", "Bytes stored in the archive");
    CounterVec::new(opts, &["area"])
        .expect("dbcollect_archived_bytes_total metric creation failed")
});

/// Labels: `sid`.
pub static QUEUE_DEPTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("dbcollect_queue_depth", "Jobs waiting in the queue");
    GaugeVec::new(opts, &["sid"]).expect("dbcollect_queue_depth metric creation failed")
});

/// Labels: `sid`, `job_kind`, `status`.
pub static REPORT_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    // 0.1s .. ~27 minutes
    let buckets = exponential_buckets(0.1, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "dbcollect_report_duration_seconds",
        "Report generation time in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["sid", "job_kind", "status"])
        .expect("dbcollect_report_duration_seconds metric creation failed")
});

/// Register all metrics with [`REGISTRY`]. Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(REPORTS_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(SESSION_RESTARTS_TOTAL.clone()),
        Box::new(ARCHIVED_BYTES_TOTAL.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(REPORT_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_report_completed(sid: &str, job_kind: &str, status: &str) {
    REPORTS_TOTAL.with_label_values(&[sid, job_kind, status]).inc();
}

pub fn record_session_restart(sid: &str) {
    SESSION_RESTARTS_TOTAL.with_label_values(&[sid]).inc();
}

pub fn record_file_archived(area: &str, bytes: f64) {
    ARCHIVED_BYTES_TOTAL.with_label_values(&[area]).inc_by(bytes);
}

pub fn set_queue_depth(sid: &str, depth: f64) {
    QUEUE_DEPTH.with_label_values(&[sid]).set(depth);
}

pub fn observe_report_duration(sid: &str, job_kind: &str, status: &str, duration_secs: f64) {
    REPORT_DURATION_SECONDS
        .with_label_values(&[sid, job_kind, status])
        .observe(duration_secs);
}

/// All registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization is a no-op");
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_report_completed("DB1", "awr", "ok");
        record_session_restart("DB1");
        record_file_archived("awr", 2048.0);
        set_queue_depth("DB1", 3.0);
        observe_report_duration("DB1", "awr", "ok", 1.5);

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("dbcollect_reports_total"));
        assert!(output.contains("dbcollect_session_restarts_total"));
        assert!(output.contains("dbcollect_report_duration_seconds"));
    }
}

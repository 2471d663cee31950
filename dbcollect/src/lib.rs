//! dbcollect - Oracle workload report collection.
//!
//! Finds the Oracle instances running on a host, works out which AWR or
//! Statspack reports to generate for each, and produces them with a pool of
//! persistent SQL*Plus sessions. Finished reports, configuration extracts
//! and session logs are moved into an output archive as they appear.
//!
//! # Pipeline
//!
//! - [`instance`]: process table, oratab and inventory discovery; each
//!   running sid is probed against its candidate homes until one connects.
//! - [`planner`]: AWR or Statspack selection from prior usage and the
//!   [`ReportPolicy`], then one [`ReportJob`] per snapshot window.
//! - [`queue`] and [`runtime`]: a bounded [`JobQueue`] filled by one
//!   generator and drained by workers that each own a [`session`].
//! - [`ingest`]: moves finished artifacts to an [`ArchiveSink`], optionally
//!   stripping SQL text via [`redact`].
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dbcollect::*;
//!
//! let staging = Arc::new(StagingDir::create(&config.run.staging_base)?);
//! let runtime = CollectRuntimeBuilder::new(config.clone())
//!     .with_factory(Arc::new(SqlplusSessionFactory::new(config.session.clone(), &staging)))
//!     .with_metadata(Arc::new(SqlplusMetadata::new(Arc::new(SystemRunner), probe_timeout)))
//!     .with_archive(Arc::new(DirectoryArchive::new(output)))
//!     .with_staging(staging)
//!     .build()?;
//! let summary = runtime.collect_instance(&instance).await?;
//! ```

/// Worker pool sizing.
pub mod budget;

/// External command execution.
pub mod command;

/// Configuration structures for resolution, policy, sessions and runs.
pub mod config;

/// Error codes, Oracle message classification and [`CollectError`].
pub mod error;

/// Archive sink, ingestion and progress reporting.
pub mod ingest;

/// Instance discovery, credentials and connection resolution.
pub mod instance;

/// The [`Job`] trait and AWR/Statspack report jobs.
pub mod job;

/// Subscriber setup for the binary.
pub mod logging;

#[cfg(feature = "metrics")]
/// Prometheus metrics, enabled with the `metrics` feature.
pub mod metrics;

/// Report kind selection and snapshot window enumeration.
pub mod planner;

/// Bounded job queue and completion flag.
pub mod queue;

/// SQL stripping for HTML reports.
pub mod redact;

/// Generator, processor pool and per-instance orchestration.
pub mod runtime;

/// Persistent SQL*Plus sessions.
pub mod session;

/// Temporary staging directory layout.
pub mod staging;

/// Tracing spans and metric hooks.
pub mod telemetry;

pub use budget::TaskBudget;
pub use command::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use config::{CollectConfig, CompletionMode, ReportPolicy, ResolverConfig, RunConfig, SessionConfig};
pub use error::{CollectError, ErrorCategory, ErrorCode, OracleCode, Result, SignatureClass};
pub use ingest::{ArchiveSink, DirectoryArchive, Ingestor, Progress};
pub use instance::{Connection, Instance, InstanceStatus, Resolver, WorkloadUsage};
pub use job::{Job, JobId, JobKind, ReportJob, ReportKind};
pub use planner::{MetadataSource, Plan, SqlplusMetadata};
pub use queue::{DoneSignal, JobQueue, QueueFull, QueueSnapshot};
pub use runtime::{CollectRuntime, CollectRuntimeBuilder, RunSummary, WorkerConfig};
pub use session::{ReportSession, RunOutcome, RunStatus, SessionFactory, SqlplusSession, SqlplusSessionFactory};
pub use staging::{Area, StagingDir};

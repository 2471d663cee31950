use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CollectError, Result};

/// Top level configuration for one collection run.
///
/// Every field has a default, so a partial JSON document is enough to
/// override single values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Where to look for instances and how to connect to them.
    pub resolver: ResolverConfig,
    /// Which workload reports to generate.
    pub policy: ReportPolicy,
    /// SQL*Plus session behaviour.
    pub session: SessionConfig,
    /// Worker pool, queue and staging settings.
    pub run: RunConfig,
}

impl CollectConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CollectError::io(format!("reading {}", path.display()), e)
        })?;
        let config: CollectConfig = serde_json::from_str(&text)
            .map_err(|e| CollectError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values outside their documented ranges.
    pub fn validate(&self) -> Result<()> {
        if self.policy.days == 0 || self.policy.days > 999 {
            return Err(CollectError::Config(format!(
                "days must be between 1 and 999, got {}",
                self.policy.days
            )));
        }
        if self.policy.end_offset > 999 || self.policy.end_offset >= self.policy.days {
            return Err(CollectError::Config(format!(
                "end offset {} must be below days ({})",
                self.policy.end_offset, self.policy.days
            )));
        }
        if self.session.job_timeout_minutes == 0 || self.session.job_timeout_secs == Some(0) {
            return Err(CollectError::Config(
                "job timeout must be at least one minute".into(),
            ));
        }
        if self.run.queue_capacity == 0 {
            return Err(CollectError::Config(
                "queue capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Host discovery inputs for the instance resolver.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Candidate `oraInst.loc` locations, first readable one wins.
    pub inventory_pointers: Vec<PathBuf>,
    /// Candidate `oratab` locations, first readable one wins.
    pub oratab_paths: Vec<PathBuf>,
    /// Use homes registered in the Oracle inventory.
    pub use_inventory: bool,
    /// Use homes registered in oratab.
    pub use_oratab: bool,
    /// Only try this ORACLE_HOME.
    pub home_override: Option<PathBuf>,
    /// Optional `sid:enabled:connectstring` file.
    pub credentials_file: Option<PathBuf>,
    /// Only process these sids (empty means all).
    pub include: Vec<String>,
    /// Never process these sids.
    pub exclude: Vec<String>,
    /// Wall-clock guard for the connection probe, in seconds.
    pub probe_timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            inventory_pointers: vec![
                PathBuf::from("/etc/oraInst.loc"),
                PathBuf::from("/var/opt/oracle/oraInst.loc"),
            ],
            oratab_paths: vec![
                PathBuf::from("/etc/oratab"),
                PathBuf::from("/var/opt/oracle/oratab"),
            ],
            use_inventory: true,
            use_oratab: true,
            home_override: None,
            credentials_file: None,
            include: Vec::new(),
            exclude: Vec::new(),
            probe_timeout_secs: 60,
        }
    }
}

impl ResolverConfig {
    /// Whether include/exclude lists allow `sid`.
    pub fn admits(&self, sid: &str) -> bool {
        if self.exclude.iter().any(|s| s == sid) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|s| s == sid)
    }
}

/// Report selection policy used by the job planner.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportPolicy {
    /// Number of days of history to report on.
    pub days: u32,
    /// Days before now at which the report window ends.
    pub end_offset: u32,
    /// Prefer Statspack over AWR when both are in use.
    pub prefer_statspack: bool,
    /// Generate AWR reports without detected prior usage.
    pub force_awr: bool,
    /// Skip instances without AWR or Statspack usage instead of failing.
    pub ignore_missing_usage: bool,
    /// Include reports for other RAC instances of the same database.
    pub include_rac: bool,
    /// Include reports when the database is a standby.
    pub include_standby: bool,
    /// Do not generate workload reports at all.
    pub no_reports: bool,
    /// Strip SQL sections from HTML reports before archiving.
    pub strip: bool,
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self {
            days: 10,
            end_offset: 0,
            prefer_statspack: false,
            force_awr: false,
            ignore_missing_usage: false,
            include_rac: true,
            include_standby: true,
            no_reports: false,
            strip: false,
        }
    }
}

/// How a session learns that a submitted script finished.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// A framed completion line on the session's stdout.
    #[default]
    ControlChannel,
    /// A marker file created by the session as its last action.
    Marker,
}

/// Settings for persistent SQL*Plus sessions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-job timeout in minutes.
    pub job_timeout_minutes: u64,
    /// Per-job timeout in seconds, overrides the minutes when set.
    pub job_timeout_secs: Option<u64>,
    /// Marker polling interval in milliseconds (marker mode only).
    pub poll_interval_ms: u64,
    /// Completion signalling mechanism.
    pub completion: CompletionMode,
    /// Grace period for `exit` before a session is killed, in milliseconds.
    pub close_grace_ms: u64,
    /// Time allowed for a new session to log on and answer, in seconds.
    pub start_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            job_timeout_minutes: 10,
            job_timeout_secs: None,
            poll_interval_ms: 100,
            completion: CompletionMode::ControlChannel,
            close_grace_ms: 2000,
            start_timeout_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn job_timeout(&self) -> Duration {
        match self.job_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_secs(self.job_timeout_minutes * 60),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

/// Settings for the per-instance run: queue, workers and ingestion.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Worker count override. `Some(0)` means all available parallelism.
    pub tasks: Option<usize>,
    /// Bounded queue capacity between generator and workers.
    pub queue_capacity: usize,
    /// How long a worker waits on an empty queue before re-checking, ms.
    pub pop_timeout_ms: u64,
    /// Orchestrator scan interval, ms.
    pub ingest_interval_ms: u64,
    /// Parent directory of the staging area.
    pub staging_base: PathBuf,
    /// Render an in-place progress line on stdout.
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tasks: None,
            queue_capacity: 10,
            pop_timeout_ms: 1000,
            ingest_interval_ms: 100,
            staging_base: std::env::temp_dir(),
            show_progress: true,
        }
    }
}

impl RunConfig {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn ingest_interval(&self) -> Duration {
        Duration::from_millis(self.ingest_interval_ms)
    }
}

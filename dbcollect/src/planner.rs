//! Report planning: which workload repository to use and which snapshot
//! windows to report on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::CommandRunner;
use crate::config::ReportPolicy;
use crate::error::{CollectError, Result, first_message_line, scan_signature};
use crate::instance::{Instance, WorkloadUsage};
use crate::job::{ReportJob, ReportKind};

/// Settings prepended to every metadata script.
pub const SCRIPT_PREAMBLE: &str = "\
WHENEVER SQLERROR EXIT SQL.SQLCODE
SET tab off feedback off verify off heading off lines 32767 pages 0 trims on
alter session set nls_date_language=american;
";

const USAGE_QUERY: &str = "\
SELECT 'USAGE:' ||
  (SELECT nvl(sum(detected_usages), 0) FROM dba_feature_usage_statistics
    WHERE name IN ('AWR Report', 'Automatic Workload Repository')) || ':' ||
  (SELECT count(*) FROM dba_segments
    WHERE owner = 'PERFSTAT' AND segment_name = 'STATS$SNAPSHOT')
FROM dual;
";

/// Where an info extract is staged.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfoArea {
    DbInfo,
    Capacity,
}

/// Text produced by an info script, written to staging by the generator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InfoExtract {
    pub area: InfoArea,
    pub name: String,
    pub content: String,
}

/// Source of the metadata the planner works from.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Prior AWR and Statspack usage.
    async fn usage(&self, instance: &Instance) -> Result<WorkloadUsage>;

    /// Raw `dbid,instnum,beginsnap,endsnap,begintime,endtime` rows.
    async fn snapshot_windows(
        &self,
        instance: &Instance,
        kind: ReportKind,
        policy: &ReportPolicy,
    ) -> Result<String>;

    /// Configuration extracts stored next to the reports.
    async fn info(&self, instance: &Instance) -> Result<Vec<InfoExtract>>;
}

/// Pick the report kind for an instance. `Ok(None)` skips it.
///
/// Rules, first match wins: preferred Statspack if in use, AWR if in use,
/// AWR if forced, Statspack if in use, skip if told to ignore, else fail.
pub fn decide_report_kind(
    sid: &str,
    usage: WorkloadUsage,
    policy: &ReportPolicy,
) -> Result<Option<ReportKind>> {
    if policy.prefer_statspack && usage.statspack > 0 {
        tracing::info!(sid, "Statspack preferred and detected");
        return Ok(Some(ReportKind::Statspack));
    }
    if usage.awr > 0 {
        tracing::info!(sid, "AWR usage detected, generating AWR reports");
        return Ok(Some(ReportKind::Awr));
    }
    if policy.force_awr {
        tracing::warn!(sid, "No prior AWR usage detected, continuing anyway (--force-awr)");
        return Ok(Some(ReportKind::Awr));
    }
    if usage.statspack > 0 {
        tracing::info!(sid, "No AWR usage, Statspack detected");
        return Ok(Some(ReportKind::Statspack));
    }
    if policy.ignore_missing_usage {
        tracing::warn!(sid, "Skipping: no prior AWR usage or Statspack detected (--ignore)");
        return Ok(None);
    }
    Err(CollectError::NoWorkloadRepository {
        sid: sid.to_string(),
    })
}

/// Query listing snapshot windows for `kind` over the policy's day range.
pub fn windows_query(kind: ReportKind, policy: &ReportPolicy) -> String {
    let local_only = if policy.include_rac {
        ""
    } else {
        "\n      AND instance_number = (SELECT instance_number FROM v$instance)"
    };
    let primary_only = if policy.include_standby {
        ""
    } else {
        "\n      AND (SELECT database_role FROM v$database) = 'PRIMARY'"
    };
    let (snapshot_table, begin, end) = match kind {
        ReportKind::Awr => (
            "dba_hist_snapshot",
            "begin_interval_time",
            "end_interval_time",
        ),
        ReportKind::Statspack => ("perfstat.stats$snapshot", "prev_time", "snap_time"),
    };
    let prev_time = match kind {
        ReportKind::Awr => "begin_interval_time, end_interval_time",
        ReportKind::Statspack => {
            "snap_time, LAG(snap_time) OVER (PARTITION BY dbid, instance_number, startup_time ORDER BY snap_id) prev_time"
        }
    };
    format!(
        "SELECT dbid || ',' || instance_number || ',' || prev_snap || ',' || snap_id || ',' ||
       to_char({begin}, 'YYYYMMDDHH24MI') || ',' || to_char({end}, 'YYYYMMDDHH24MI')
FROM (SELECT dbid, instance_number, snap_id, {prev_time},
        LAG(snap_id) OVER (PARTITION BY dbid, instance_number, startup_time ORDER BY snap_id) prev_snap
      FROM {snapshot_table}
      WHERE dbid = (SELECT dbid FROM v$database)
      AND {time_col} > sysdate - {days}
      AND {time_col} <= sysdate - {offset}{local_only}{primary_only})
WHERE prev_snap IS NOT NULL
ORDER BY instance_number, snap_id;
",
        time_col = match kind {
            ReportKind::Awr => "end_interval_time",
            ReportKind::Statspack => "snap_time",
        },
        days = policy.days,
        offset = policy.end_offset,
    )
}

/// Turn window rows into jobs.
pub fn parse_windows(sid: &str, kind: ReportKind, rows: &str) -> Result<Vec<ReportJob>> {
    let malformed = |line: &str, what: &str| CollectError::Planner {
        sid: sid.to_string(),
        reason: format!("{what} in snapshot row '{line}'"),
    };

    rows.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let [dbid, inst, begin, end, begin_time, end_time] = fields[..] else {
                return Err(malformed(line, "expected 6 fields"));
            };
            Ok(ReportJob::new(
                sid,
                kind,
                dbid.parse().map_err(|_| malformed(line, "bad dbid"))?,
                inst.parse().map_err(|_| malformed(line, "bad instance number"))?,
                begin.parse().map_err(|_| malformed(line, "bad begin snapshot"))?,
                end.parse().map_err(|_| malformed(line, "bad end snapshot"))?,
                begin_time,
                end_time,
            ))
        })
        .collect()
}

/// Outcome of planning one instance.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub kind: Option<ReportKind>,
    pub usage: Option<WorkloadUsage>,
    pub jobs: Vec<ReportJob>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Enumerate the report jobs for `instance`.
pub async fn plan<M: MetadataSource + ?Sized>(
    instance: &Instance,
    policy: &ReportPolicy,
    metadata: &M,
) -> Result<Plan> {
    let sid = instance.sid.as_str();
    if policy.no_reports {
        tracing::info!(sid, "report generation disabled");
        return Ok(Plan::default());
    }
    if !instance.is_open() {
        tracing::info!(sid, status = %instance.status, "instance not open, no reports");
        return Ok(Plan::default());
    }

    let usage = match instance.usage {
        Some(usage) => usage,
        None => metadata.usage(instance).await?,
    };
    let Some(kind) = decide_report_kind(sid, usage, policy)? else {
        return Ok(Plan {
            usage: Some(usage),
            ..Plan::default()
        });
    };

    let rows = metadata.snapshot_windows(instance, kind, policy).await?;
    let jobs = parse_windows(sid, kind, &rows)?;
    tracing::info!(sid, kind = %kind, reports = jobs.len(), "reports planned");
    Ok(Plan {
        kind: Some(kind),
        usage: Some(usage),
        jobs,
    })
}

/// [`MetadataSource`] that queries the instance through SQL*Plus.
pub struct SqlplusMetadata<R: CommandRunner> {
    runner: Arc<R>,
    timeout: Duration,
}

impl<R: CommandRunner> SqlplusMetadata<R> {
    pub fn new(runner: Arc<R>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    async fn query(&self, instance: &Instance, script: &str) -> Result<String> {
        let spec = instance
            .sqlplus()
            .with_input(format!("{SCRIPT_PREAMBLE}{script}exit\n"))
            .with_timeout(self.timeout);
        let failed = |reason: String| CollectError::Planner {
            sid: instance.sid.clone(),
            reason,
        };

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let text = output.combined();
        if let Some(sig) = scan_signature(&text) {
            return Err(failed(sig.line));
        }
        if !output.success() {
            return Err(failed(
                first_message_line(&text)
                    .unwrap_or_else(|| format!("SQL*Plus exited with {:?}", output.status)),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl<R: CommandRunner + 'static> MetadataSource for SqlplusMetadata<R> {
    async fn usage(&self, instance: &Instance) -> Result<WorkloadUsage> {
        let text = self.query(instance, USAGE_QUERY).await?;
        parse_usage(&text).ok_or_else(|| CollectError::Planner {
            sid: instance.sid.clone(),
            reason: format!("unexpected usage output '{}'", text.trim()),
        })
    }

    async fn snapshot_windows(
        &self,
        instance: &Instance,
        kind: ReportKind,
        policy: &ReportPolicy,
    ) -> Result<String> {
        self.query(instance, &windows_query(kind, policy)).await
    }

    async fn info(&self, instance: &Instance) -> Result<Vec<InfoExtract>> {
        let mut extracts = Vec::new();
        for (area, name, script) in info_scripts(instance) {
            let content = self.query(instance, &script).await?;
            extracts.push(InfoExtract {
                area,
                name: format!("{}_{name}", instance.sid),
                content,
            });
        }
        Ok(extracts)
    }
}

/// `USAGE:<awr>:<statspack>` line.
pub fn parse_usage(text: &str) -> Option<WorkloadUsage> {
    let line = text
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("USAGE:"))?;
    let (awr, statspack) = line.split_once(':')?;
    Some(WorkloadUsage {
        awr: awr.trim().parse().ok()?,
        statspack: statspack.trim().parse().ok()?,
    })
}

/// Info scripts that apply to the instance's status and version.
pub fn info_scripts(instance: &Instance) -> Vec<(InfoArea, &'static str, String)> {
    use crate::instance::InstanceStatus;

    let mut scripts = vec![(
        InfoArea::DbInfo,
        "dbinfo.txt",
        "SELECT 'instance:' || instance_name || ':' || host_name || ':' || version || ':' || status ||
       ':' || to_char(startup_time, 'YYYY-MM-DD HH24:MI') FROM v$instance;
"
        .to_string(),
    )];

    if matches!(instance.status, InstanceStatus::Mounted | InstanceStatus::Open) {
        scripts.push((
            InfoArea::DbInfo,
            "database.txt",
            "SELECT 'database:' || dbid || ':' || name || ':' || database_role || ':' || log_mode ||
       ':' || platform_name FROM v$database;
"
            .to_string(),
        ));
    }

    if instance.is_open() {
        scripts.push((
            InfoArea::DbInfo,
            "parameters.txt",
            "SELECT name || '=' || value FROM v$parameter WHERE isdefault = 'FALSE' ORDER BY name;\n"
                .to_string(),
        ));
        if instance.version.is_some_and(|v| v >= 12) {
            scripts.push((
                InfoArea::DbInfo,
                "pdbinfo.txt",
                "SELECT con_id || ':' || name || ':' || open_mode FROM v$pdbs ORDER BY con_id;\n"
                    .to_string(),
            ));
        }
        scripts.push((
            InfoArea::Capacity,
            "capacity.txt",
            "SELECT tablespace_name || ',' || round(sum(bytes) / 1048576) || ',' ||
       round(sum(greatest(maxbytes, bytes)) / 1048576)
FROM dba_data_files GROUP BY tablespace_name ORDER BY tablespace_name;
"
            .to_string(),
        ));
    }
    scripts
}

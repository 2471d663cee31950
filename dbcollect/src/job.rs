use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker trait for job kind enums.
pub trait JobKind:
    Copy + Eq + std::hash::Hash + Display + fmt::Debug + Send + Sync + 'static
{
    fn as_str(&self) -> &'static str;
}

/// A unit of work executed in a SQL*Plus session.
///
/// Jobs are immutable values produced in bulk by a planner and consumed
/// exactly once by a worker.
pub trait Job: Clone + fmt::Debug + Send + Sync + 'static {
    type Kind: JobKind;

    fn id(&self) -> JobId;

    fn kind(&self) -> Self::Kind;

    /// File name the job's output is spooled to.
    ///
    /// Must be unique across all jobs of one run.
    fn output_name(&self) -> String;

    /// Script text submitted to the session.
    fn query(&self) -> String;

    /// Optional text sent before the output is redirected.
    fn header(&self) -> Option<String> {
        None
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workload report flavour.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Awr,
    Statspack,
}

impl ReportKind {
    /// Extension of the produced report.
    pub fn extension(&self) -> &'static str {
        match self {
            ReportKind::Awr => "html",
            ReportKind::Statspack => "txt",
        }
    }
}

impl JobKind for ReportKind {
    fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Awr => "awr",
            ReportKind::Statspack => "statspack",
        }
    }
}

impl Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One AWR or Statspack report over a snapshot window.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReportJob {
    pub id: JobId,
    pub sid: String,
    pub kind: ReportKind,
    pub dbid: u64,
    pub instance_number: u32,
    pub begin_snap: u64,
    pub end_snap: u64,
    /// Begin of the window as returned by the snapshot query.
    pub begin_time: String,
    pub end_time: String,
}

impl ReportJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sid: impl Into<String>,
        kind: ReportKind,
        dbid: u64,
        instance_number: u32,
        begin_snap: u64,
        end_snap: u64,
        begin_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            sid: sid.into(),
            kind,
            dbid,
            instance_number,
            begin_snap,
            end_snap,
            begin_time: begin_time.into(),
            end_time: end_time.into(),
        }
    }
}

/// Canonical report file name.
///
/// `{sid}_{dbid}_{inst}_{kind}_{begin}_{end}_{begintime}.{ext}`; archive
/// paths depend on this exact layout.
pub fn report_filename(
    sid: &str,
    dbid: u64,
    instance_number: u32,
    kind: ReportKind,
    begin_snap: u64,
    end_snap: u64,
    begin_time: &str,
) -> String {
    format!(
        "{sid}_{dbid}_{instance_number}_{kind}_{begin_snap}_{end_snap}_{begin_time}.{}",
        kind.extension()
    )
}

impl Job for ReportJob {
    type Kind = ReportKind;

    fn id(&self) -> JobId {
        self.id
    }

    fn kind(&self) -> Self::Kind {
        self.kind
    }

    fn output_name(&self) -> String {
        report_filename(
            &self.sid,
            self.dbid,
            self.instance_number,
            self.kind,
            self.begin_snap,
            self.end_snap,
            &self.begin_time,
        )
    }

    fn query(&self) -> String {
        match self.kind {
            ReportKind::Awr => format!(
                "SELECT output FROM TABLE(dbms_workload_repository.awr_report_html({}, {}, {}, {}));\n",
                self.dbid, self.instance_number, self.begin_snap, self.end_snap
            ),
            ReportKind::Statspack => format!(
                "define dbid={}\ndefine inst_num={}\ndefine begin_snap={}\n\
                 define end_snap={}\ndefine report_name={}\n\
                 @?/rdbms/admin/sprepins\n",
                self.dbid,
                self.instance_number,
                self.begin_snap,
                self.end_snap,
                self.output_name()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awr_job() -> ReportJob {
        ReportJob::new(
            "DB1",
            ReportKind::Awr,
            1234567890,
            1,
            100,
            101,
            "202401011000",
            "202401011100",
        )
    }

    #[test]
    fn test_filename_layout() {
        assert_eq!(
            awr_job().output_name(),
            "DB1_1234567890_1_awr_100_101_202401011000.html"
        );

        let mut sp = awr_job();
        sp.kind = ReportKind::Statspack;
        assert_eq!(
            sp.output_name(),
            "DB1_1234567890_1_statspack_100_101_202401011000.txt"
        );
    }

    #[test]
    fn test_filename_is_deterministic_and_field_sensitive() {
        let base = awr_job();
        assert_eq!(base.output_name(), base.clone().output_name());

        let variants = [
            ReportJob { sid: "DB2".into(), ..base.clone() },
            ReportJob { dbid: 1, ..base.clone() },
            ReportJob { instance_number: 2, ..base.clone() },
            ReportJob { kind: ReportKind::Statspack, ..base.clone() },
            ReportJob { begin_snap: 99, ..base.clone() },
            ReportJob { end_snap: 102, ..base.clone() },
            ReportJob { begin_time: "202401011100".into(), ..base.clone() },
        ];
        for variant in variants {
            assert_ne!(variant.output_name(), base.output_name());
        }
    }

    #[test]
    fn test_end_time_and_id_do_not_affect_filename() {
        let base = awr_job();
        let other = ReportJob {
            id: JobId::new(),
            end_time: "x".into(),
            ..base.clone()
        };
        assert_eq!(other.output_name(), base.output_name());
    }

    #[test]
    fn test_awr_query() {
        assert_eq!(
            awr_job().query(),
            "SELECT output FROM TABLE(dbms_workload_repository.awr_report_html(1234567890, 1, 100, 101));\n"
        );
    }

    #[test]
    fn test_statspack_query_names_report() {
        let mut job = awr_job();
        job.kind = ReportKind::Statspack;
        let query = job.query();
        assert!(query.contains("define begin_snap=100"));
        assert!(query.contains(&format!("define report_name={}", job.output_name())));
        assert!(query.ends_with("@?/rdbms/admin/sprepins\n"));
    }
}

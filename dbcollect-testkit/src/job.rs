use dbcollect::{Job, JobId, JobKind};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Synthetic job understood by both [`crate::MockSession`] and
/// [`crate::FakeSqlplus`].
///
/// The behaviour is encoded in the query text so that the same job list
/// can drive a mock session or a real session against the fake binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TestJob {
    Simple { id: JobId, name: String },
    Slow { id: JobId, name: String, duration_ms: u64 },
    Failing { id: JobId, name: String },
    Crashing { id: JobId, name: String },
    Hanging { id: JobId, name: String },
}

impl TestJob {
    pub fn simple(name: impl Into<String>) -> Self {
        TestJob::Simple {
            id: JobId::new(),
            name: name.into(),
        }
    }

    pub fn slow(name: impl Into<String>, duration_ms: u64) -> Self {
        TestJob::Slow {
            id: JobId::new(),
            name: name.into(),
            duration_ms,
        }
    }

    /// Raises ORA-00942.
    pub fn failing(name: impl Into<String>) -> Self {
        TestJob::Failing {
            id: JobId::new(),
            name: name.into(),
        }
    }

    /// Kills the session process without an Oracle message.
    pub fn crashing(name: impl Into<String>) -> Self {
        TestJob::Crashing {
            id: JobId::new(),
            name: name.into(),
        }
    }

    /// Never completes.
    pub fn hanging(name: impl Into<String>) -> Self {
        TestJob::Hanging {
            id: JobId::new(),
            name: name.into(),
        }
    }

    /// `count` simple jobs named `{prefix}-{i}`.
    pub fn batch(prefix: &str, count: usize) -> Vec<Self> {
        (0..count)
            .map(|i| TestJob::simple(format!("{prefix}-{i}")))
            .collect()
    }

    pub fn name(&self) -> &str {
        match self {
            TestJob::Simple { name, .. }
            | TestJob::Slow { name, .. }
            | TestJob::Failing { name, .. }
            | TestJob::Crashing { name, .. }
            | TestJob::Hanging { name, .. } => name,
        }
    }
}

impl Job for TestJob {
    type Kind = TestJobKind;

    fn id(&self) -> JobId {
        match self {
            TestJob::Simple { id, .. }
            | TestJob::Slow { id, .. }
            | TestJob::Failing { id, .. }
            | TestJob::Crashing { id, .. }
            | TestJob::Hanging { id, .. } => *id,
        }
    }

    fn kind(&self) -> Self::Kind {
        match self {
            TestJob::Simple { .. } => TestJobKind::Simple,
            TestJob::Slow { .. } => TestJobKind::Slow,
            TestJob::Failing { .. } => TestJobKind::Failing,
            TestJob::Crashing { .. } => TestJobKind::Crashing,
            TestJob::Hanging { .. } => TestJobKind::Hanging,
        }
    }

    fn output_name(&self) -> String {
        format!("{}.html", self.name())
    }

    fn query(&self) -> String {
        match self {
            TestJob::Simple { name, .. } => format!("SELECT '{name}' FROM dual;\n"),
            TestJob::Slow { name, duration_ms, .. } => {
                format!("SELECT '{name}' FROM dual; -- SLEEP {duration_ms}\n")
            }
            TestJob::Failing { .. } => "SELECT * FROM missing_table; -- FAIL_ORA\n".into(),
            TestJob::Crashing { .. } => "-- CRASH\n".into(),
            TestJob::Hanging { .. } => "-- HANG\n".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestJobKind {
    Simple,
    Slow,
    Failing,
    Crashing,
    Hanging,
}

impl JobKind for TestJobKind {
    fn as_str(&self) -> &'static str {
        match self {
            TestJobKind::Simple => "simple",
            TestJobKind::Slow => "slow",
            TestJobKind::Failing => "failing",
            TestJobKind::Crashing => "crashing",
            TestJobKind::Hanging => "hanging",
        }
    }
}

impl Display for TestJobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

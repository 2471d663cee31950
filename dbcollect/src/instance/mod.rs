//! Oracle instance discovery and connection resolution.
//!
//! Running instances are found in the process table, candidate homes come
//! from oratab and the central inventory, and each candidate is probed
//! with a minimal status query until one connects.

pub mod credentials;
pub mod discovery;
pub mod probe;
pub mod resolver;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::command::CommandSpec;

pub use credentials::{CredentialEntry, Credentials};
pub use discovery::{HostInventory, InventoryHome, OratabEntry};
pub use probe::{ProbeInfo, ProbeOutcome, Prober, SqlplusProber, classify_probe};
pub use resolver::{Resolver, Target};

/// `PATH` handed to every SQL*Plus child.
pub const SQLPLUS_PATH: &str = "/usr/sbin:/usr/bin:/bin:/sbin:/opt/freeware/bin";

/// Lifecycle state reported by `v$instance.status`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    Started,
    Mounted,
    Open,
    Unknown,
}

impl InstanceStatus {
    pub fn parse(text: &str) -> Self {
        let text = text.trim().to_ascii_uppercase();
        if text.starts_with("OPEN") {
            InstanceStatus::Open
        } else if text == "MOUNTED" {
            InstanceStatus::Mounted
        } else if text == "STARTED" {
            InstanceStatus::Started
        } else {
            InstanceStatus::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Started => "STARTED",
            InstanceStatus::Mounted => "MOUNTED",
            InstanceStatus::Open => "OPEN",
            InstanceStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How SQL*Plus logs on to an instance.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Connection {
    /// Operating system authentication, `/ as sysdba`.
    #[default]
    Local,
    /// Explicit connect string, e.g. `user/pass@host/service`.
    Descriptor(String),
}

impl Connection {
    pub fn is_local(&self) -> bool {
        matches!(self, Connection::Local)
    }

    /// Connect arguments following `sqlplus -S -L`.
    pub fn logon_args(&self) -> Vec<String> {
        match self {
            Connection::Local => vec!["/".into(), "as".into(), "sysdba".into()],
            Connection::Descriptor(descriptor) => vec![descriptor.clone()],
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connection::Local => f.write_str("/ as sysdba"),
            // never print the password part
            Connection::Descriptor(d) => match d.split_once('@') {
                Some((_, target)) => write!(f, "***@{target}"),
                None => f.write_str("***"),
            },
        }
    }
}

/// Prior usage of the workload repositories.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkloadUsage {
    /// Number of recorded AWR report usages.
    pub awr: u64,
    /// Number of Statspack snapshots.
    pub statspack: u64,
}

/// A running instance bound to a home and a working connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub sid: String,
    pub home: PathBuf,
    pub connection: Connection,
    pub status: InstanceStatus,
    pub version: Option<u32>,
    pub cpu_count: Option<usize>,
    /// Filled in before planning, `None` until then.
    pub usage: Option<WorkloadUsage>,
}

impl Instance {
    pub fn new(sid: impl Into<String>, home: impl Into<PathBuf>, connection: Connection) -> Self {
        Self {
            sid: sid.into(),
            home: home.into(),
            connection,
            status: InstanceStatus::Unknown,
            version: None,
            cpu_count: None,
            usage: None,
        }
    }

    pub fn with_probe(mut self, info: &ProbeInfo) -> Self {
        self.status = info.status;
        self.version = info.version;
        self.cpu_count = info.cpu_count;
        self
    }

    pub fn with_usage(mut self, usage: WorkloadUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == InstanceStatus::Open
    }

    /// SQL*Plus command for this instance.
    pub fn sqlplus(&self) -> CommandSpec {
        sqlplus_command(&self.home, &self.sid, &self.connection)
    }
}

/// `<home>/bin/sqlplus`.
pub fn sqlplus_binary(home: &Path) -> PathBuf {
    home.join("bin").join("sqlplus")
}

/// Silent, no-retry SQL*Plus invocation with a minimal environment.
pub fn sqlplus_command(home: &Path, sid: &str, connection: &Connection) -> CommandSpec {
    CommandSpec::new(sqlplus_binary(home))
        .with_args(["-S", "-L"])
        .with_args(connection.logon_args())
        .with_clear_env()
        .with_env("PATH", SQLPLUS_PATH)
        .with_env("ORACLE_HOME", home.display().to_string())
        .with_env("ORACLE_SID", sid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(InstanceStatus::parse("OPEN"), InstanceStatus::Open);
        assert_eq!(InstanceStatus::parse("open migrate"), InstanceStatus::Open);
        assert_eq!(InstanceStatus::parse("MOUNTED\n"), InstanceStatus::Mounted);
        assert_eq!(InstanceStatus::parse("STARTED"), InstanceStatus::Started);
        assert_eq!(InstanceStatus::parse("huh"), InstanceStatus::Unknown);
    }

    #[test]
    fn test_local_sqlplus_command() {
        let spec = sqlplus_command(Path::new("/u01/db19"), "DB1", &Connection::Local);
        assert_eq!(spec.program, PathBuf::from("/u01/db19/bin/sqlplus"));
        assert_eq!(spec.args, ["-S", "-L", "/", "as", "sysdba"]);
        assert!(spec.clear_env);
        assert!(spec.env.contains(&("ORACLE_SID".into(), "DB1".into())));
        assert!(spec.env.contains(&("ORACLE_HOME".into(), "/u01/db19".into())));
    }

    #[test]
    fn test_descriptor_is_masked_in_display() {
        let conn = Connection::Descriptor("system/secret@db1.example.com/orcl".into());
        assert_eq!(conn.to_string(), "***@db1.example.com/orcl");
        assert_eq!(conn.logon_args(), ["system/secret@db1.example.com/orcl"]);
        assert_eq!(Connection::Local.to_string(), "/ as sysdba");
    }
}

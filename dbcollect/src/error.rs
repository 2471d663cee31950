//! Error codes, Oracle message classification and the crate error type.
//!
//! Every failure the collector reports carries a stable [`ErrorCode`]. The
//! same codes key a static explanation table so that `dbcollect --explain
//! E007` can tell an operator what went wrong and how to fix it.
//!
//! Output from SQL*Plus is classified exactly once, through
//! [`scan_signature`], into the closed [`OracleCode`] enumeration. Callers
//! match on [`SignatureClass`] instead of on message text.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = CollectError> = std::result::Result<T, E>;

/// Stable, enumerable error codes.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ErrorCode {
    E001,
    E002,
    E003,
    E004,
    E005,
    E006,
    E007,
    E008,
    E009,
    E010,
    E011,
    E012,
    E013,
    E014,
    E015,
    E016,
    E017,
    E018,
    E019,
}

/// Broad grouping of error codes, used to decide propagation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Instance could not be resolved. Fatal for that instance only.
    Resolution,
    /// No workload repository usage detected. Fatal for that instance only.
    Licensing,
    /// A SQL*Plus session failed. Fatal for the run.
    Session,
    /// A bounded wait expired. Fatal for the run.
    Timeout,
    /// Local environment problems (I/O, configuration, archive).
    Environment,
}

impl ErrorCode {
    /// All codes, in order.
    pub const ALL: [ErrorCode; 19] = [
        ErrorCode::E001,
        ErrorCode::E002,
        ErrorCode::E003,
        ErrorCode::E004,
        ErrorCode::E005,
        ErrorCode::E006,
        ErrorCode::E007,
        ErrorCode::E008,
        ErrorCode::E009,
        ErrorCode::E010,
        ErrorCode::E011,
        ErrorCode::E012,
        ErrorCode::E013,
        ErrorCode::E014,
        ErrorCode::E015,
        ErrorCode::E016,
        ErrorCode::E017,
        ErrorCode::E018,
        ErrorCode::E019,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::E001 => "E001",
            ErrorCode::E002 => "E002",
            ErrorCode::E003 => "E003",
            ErrorCode::E004 => "E004",
            ErrorCode::E005 => "E005",
            ErrorCode::E006 => "E006",
            ErrorCode::E007 => "E007",
            ErrorCode::E008 => "E008",
            ErrorCode::E009 => "E009",
            ErrorCode::E010 => "E010",
            ErrorCode::E011 => "E011",
            ErrorCode::E012 => "E012",
            ErrorCode::E013 => "E013",
            ErrorCode::E014 => "E014",
            ErrorCode::E015 => "E015",
            ErrorCode::E016 => "E016",
            ErrorCode::E017 => "E017",
            ErrorCode::E018 => "E018",
            ErrorCode::E019 => "E019",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::E001
            | ErrorCode::E002
            | ErrorCode::E003
            | ErrorCode::E004
            | ErrorCode::E005
            | ErrorCode::E006 => ErrorCategory::Resolution,
            ErrorCode::E007 | ErrorCode::E008 => ErrorCategory::Licensing,
            ErrorCode::E009 | ErrorCode::E010 | ErrorCode::E011 => {
                ErrorCategory::Session
            }
            ErrorCode::E012 | ErrorCode::E013 | ErrorCode::E014 => {
                ErrorCategory::Timeout
            }
            ErrorCode::E015
            | ErrorCode::E016
            | ErrorCode::E017
            | ErrorCode::E018
            | ErrorCode::E019 => ErrorCategory::Environment,
        }
    }

    /// One-line summary of the code.
    pub fn summary(&self) -> &'static str {
        match self {
            ErrorCode::E001 => "No valid ORACLE_HOME found for instance",
            ErrorCode::E002 => "Database login failed (bad credentials)",
            ErrorCode::E003 => "Instance is starting, stopping or blocked",
            ErrorCode::E004 => "Listener or network failure",
            ErrorCode::E005 => "SQL*Plus could not be executed",
            ErrorCode::E006 => "Connection probe timed out",
            ErrorCode::E007 => "No AWR or Statspack usage detected",
            ErrorCode::E008 => "Report metadata query failed",
            ErrorCode::E009 => "SQL*Plus session could not be started",
            ErrorCode::E010 => "SQL error while generating a report",
            ErrorCode::E011 => "SQL*Plus session terminated unexpectedly",
            ErrorCode::E012 => "Report generation timed out",
            ErrorCode::E013 => "Job generator timed out (queue full)",
            ErrorCode::E014 => "Report worker or job generator failed",
            ErrorCode::E015 => "File system error",
            ErrorCode::E016 => "Storing file in archive failed",
            ErrorCode::E017 => "Report could not be redacted",
            ErrorCode::E018 => "Invalid credentials file",
            ErrorCode::E019 => "Invalid configuration",
        }
    }

    /// Remediation hint shown by `--explain`.
    pub fn explain(&self) -> &'static str {
        match self {
            ErrorCode::E001 => {
                "None of the candidate ORACLE_HOME directories (oratab, \
                 inventory) could connect to the running instance. Check \
                 that /etc/oratab lists the correct home for this SID, or \
                 pass the home explicitly."
            }
            ErrorCode::E002 => {
                "The database rejected the login. For local connections the \
                 OS user must be a member of the dba group; for connections \
                 from the credentials file check user name and password."
            }
            ErrorCode::E003 => {
                "The instance is in startup, shutdown or restricted mode, or \
                 the archiver is stuck. Retry when the instance is open."
            }
            ErrorCode::E004 => {
                "The connect descriptor could not be resolved or the \
                 listener did not answer. Check tnsnames.ora and that the \
                 listener is running."
            }
            ErrorCode::E005 => {
                "bin/sqlplus in the ORACLE_HOME could not be started. Check \
                 permissions and that the home contains a database client."
            }
            ErrorCode::E006 => {
                "SQL*Plus did not answer the status query in time. The \
                 instance may be hung or overloaded."
            }
            ErrorCode::E007 => {
                "No prior usage of AWR (Diagnostics Pack) or Statspack was \
                 detected. AWR requires a license; use --force-awr only if \
                 the database is licensed, or --ignore to skip such \
                 instances."
            }
            ErrorCode::E008 => {
                "The query listing usage or snapshots failed or returned \
                 malformed rows. Check the session log in the archive."
            }
            ErrorCode::E009 => {
                "A worker could not start its SQL*Plus session. Check the \
                 ORACLE_HOME and OS resource limits (processes, memory)."
            }
            ErrorCode::E010 => {
                "SQL*Plus returned an Oracle error while producing a report. \
                 The Oracle error code in the message identifies the cause."
            }
            ErrorCode::E011 => {
                "SQL*Plus exited before finishing a report without a \
                 recognisable Oracle error. Check the session log."
            }
            ErrorCode::E012 => {
                "A report took longer than the per-job timeout. Increase the \
                 timeout or reduce the number of days."
            }
            ErrorCode::E013 => {
                "Workers stopped taking jobs from the queue. Usually caused \
                 by hanging sessions; increase the timeout."
            }
            ErrorCode::E014 => {
                "A worker or the job generator exited with a non-zero code. \
                 The report set would be incomplete, so the run was aborted."
            }
            ErrorCode::E015 => {
                "A file or directory in the staging area could not be \
                 created, read or moved. Check free space and permissions \
                 of the temp directory."
            }
            ErrorCode::E016 => {
                "A file could not be written to the output archive. Check \
                 free space and permissions of the output location."
            }
            ErrorCode::E017 => {
                "An HTML report could not be processed for SQL stripping and \
                 was stored unmodified."
            }
            ErrorCode::E018 => {
                "A line in the credentials file is not of the form \
                 sid:enabled:connectstring."
            }
            ErrorCode::E019 => "A configuration value is out of range.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = CollectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        ErrorCode::ALL
            .into_iter()
            .find(|code| code.as_str() == wanted)
            .ok_or_else(|| {
                CollectError::Config(format!("unknown error code '{s}'"))
            })
    }
}

/// How a recognised Oracle message affects connection or report handling.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SignatureClass {
    /// The ORACLE_HOME does not match the running instance.
    WrongHome,
    /// Instance starting, stopping or otherwise blocked.
    Blocked,
    /// Login rejected.
    Credentials,
    /// TNS resolution or listener failure.
    Network,
    /// Error raised by a statement (report generation failure).
    Query,
}

macro_rules! oracle_codes {
    ($($variant:ident => ($text:literal, $class:ident)),+ $(,)?) => {
        /// Oracle and SQL*Plus message codes the collector recognises.
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
        pub enum OracleCode {
            $($variant),+
        }

        impl OracleCode {
            pub const ALL: &'static [OracleCode] = &[$(OracleCode::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(OracleCode::$variant => $text),+
                }
            }

            pub fn class(&self) -> SignatureClass {
                match self {
                    $(OracleCode::$variant => SignatureClass::$class),+
                }
            }

            pub fn lookup(code: &str) -> Option<Self> {
                match code {
                    $($text => Some(OracleCode::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

oracle_codes! {
    Ora01017 => ("ORA-01017", Credentials),
    Ora01031 => ("ORA-01031", Credentials),
    Ora01045 => ("ORA-01045", Credentials),
    Ora28000 => ("ORA-28000", Credentials),
    Ora01033 => ("ORA-01033", Blocked),
    Ora01089 => ("ORA-01089", Blocked),
    Ora12528 => ("ORA-12528", Blocked),
    Ora00257 => ("ORA-00257", Blocked),
    Ora01034 => ("ORA-01034", WrongHome),
    Ora27101 => ("ORA-27101", WrongHome),
    Ora12547 => ("ORA-12547", WrongHome),
    Sp20667 => ("SP2-0667", WrongHome),
    Sp20750 => ("SP2-0750", WrongHome),
    Ora12154 => ("ORA-12154", Network),
    Ora12514 => ("ORA-12514", Network),
    Ora12541 => ("ORA-12541", Network),
    Ora12170 => ("ORA-12170", Network),
    Ora00942 => ("ORA-00942", Query),
    Ora00904 => ("ORA-00904", Query),
    Ora20200 => ("ORA-20200", Query),
    Ora13516 => ("ORA-13516", Query),
    Ora04031 => ("ORA-04031", Query),
    Ora01555 => ("ORA-01555", Query),
    Ora00600 => ("ORA-00600", Query),
    Ora07445 => ("ORA-07445", Query),
    Ora03113 => ("ORA-03113", Query),
    Ora03114 => ("ORA-03114", Query),
}

impl fmt::Display for OracleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognised Oracle message found in SQL*Plus output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Signature {
    pub code: OracleCode,
    /// The full output line the code appeared on, trimmed.
    pub line: String,
}

impl Signature {
    pub fn class(&self) -> SignatureClass {
        self.code.class()
    }
}

static MESSAGE_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(ORA-\d{5}|SP2-\d{4})\b").expect("static regex")
});

/// Find the first recognised Oracle message in `output`.
///
/// Unknown `ORA-` codes are skipped so that a later, recognised code on the
/// same output still classifies it.
pub fn scan_signature(output: &str) -> Option<Signature> {
    output.lines().find_map(|line| {
        MESSAGE_CODE
            .find_iter(line)
            .find_map(|m| OracleCode::lookup(m.as_str()))
            .map(|code| Signature {
                code,
                line: line.trim().to_string(),
            })
    })
}

/// First line of `output` that carries any Oracle message code, recognised
/// or not.
pub fn first_message_line(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| MESSAGE_CODE.is_match(line))
        .map(|line| line.trim().to_string())
}

/// Errors raised by the collector.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("{sid}: no valid ORACLE_HOME found ({detail})")]
    NoValidHome { sid: String, detail: String },

    #[error("{sid}: login failed: {message}")]
    BadCredentials { sid: String, message: String },

    #[error("{sid}: instance blocked: {message}")]
    InstanceBlocked { sid: String, message: String },

    #[error("{sid}: listener/network failure: {message}")]
    Listener { sid: String, message: String },

    #[error("{sid}: cannot execute {}: {reason}", .program.display())]
    ToolingMissing {
        sid: String,
        program: PathBuf,
        reason: String,
    },

    #[error("{sid}: connection probe timed out after {seconds}s")]
    ProbeTimeout { sid: String, seconds: u64 },

    #[error(
        "{sid}: no AWR or Statspack usage detected (try --force-awr or --ignore)"
    )]
    NoWorkloadRepository { sid: String },

    #[error("{sid}: report metadata query failed: {reason}")]
    Planner { sid: String, reason: String },

    #[error("{sid}: cannot start SQL*Plus session: {reason}")]
    SessionStart { sid: String, reason: String },

    #[error("{sid}: {code} while running {job}: {line}")]
    Sql {
        sid: String,
        job: String,
        code: OracleCode,
        line: String,
    },

    #[error("{sid}: SQL*Plus terminated while running {job} (status {status:?}){}",
        .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Terminated {
        sid: String,
        job: String,
        status: Option<i32>,
        detail: Option<String>,
    },

    #[error("{sid}: {job} timed out after {elapsed_secs}s")]
    JobTimeout {
        sid: String,
        job: String,
        elapsed_secs: u64,
    },

    #[error("{sid}: generator timeout (queue full for {waited_secs}s)")]
    GeneratorTimeout { sid: String, waited_secs: u64 },

    #[error("{sid}: generator failed: {cause}")]
    GeneratorFailed {
        sid: String,
        #[source]
        cause: Box<CollectError>,
    },

    #[error("{sid}: worker {worker} exited with code {exit_code}")]
    WorkerFailed {
        sid: String,
        worker: String,
        exit_code: i32,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot store {tag} in archive: {reason}")]
    Archive { tag: String, reason: String },

    #[error("{}: {reason}", .path.display())]
    Redaction { path: PathBuf, reason: String },

    #[error("{}:{line}: {reason}", .path.display())]
    Credentials {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CollectError {
    /// Wrap an I/O error with the operation that failed.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        CollectError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CollectError::NoValidHome { .. } => ErrorCode::E001,
            CollectError::BadCredentials { .. } => ErrorCode::E002,
            CollectError::InstanceBlocked { .. } => ErrorCode::E003,
            CollectError::Listener { .. } => ErrorCode::E004,
            CollectError::ToolingMissing { .. } => ErrorCode::E005,
            CollectError::ProbeTimeout { .. } => ErrorCode::E006,
            CollectError::NoWorkloadRepository { .. } => ErrorCode::E007,
            CollectError::Planner { .. } => ErrorCode::E008,
            CollectError::SessionStart { .. } => ErrorCode::E009,
            CollectError::Sql { .. } => ErrorCode::E010,
            CollectError::Terminated { .. } => ErrorCode::E011,
            CollectError::JobTimeout { .. } => ErrorCode::E012,
            CollectError::GeneratorTimeout { .. } => ErrorCode::E013,
            CollectError::GeneratorFailed { .. } | CollectError::WorkerFailed { .. } => {
                ErrorCode::E014
            }
            CollectError::Io { .. } => ErrorCode::E015,
            CollectError::Archive { .. } => ErrorCode::E016,
            CollectError::Redaction { .. } => ErrorCode::E017,
            CollectError::Credentials { .. } => ErrorCode::E018,
            CollectError::Config(_) => ErrorCode::E019,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    /// Whether the error only invalidates the instance it was raised for.
    ///
    /// Everything else aborts the whole collection run.
    pub fn is_instance_scoped(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Resolution | ErrorCategory::Licensing
        )
    }

    /// Exit code a worker or generator terminates with for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CollectError::GeneratorTimeout { .. } => 11,
            CollectError::GeneratorFailed { cause, .. } => cause.exit_code(),
            CollectError::Planner { .. } => 20,
            CollectError::Sql { .. } => 30,
            CollectError::Terminated { .. } => 31,
            CollectError::SessionStart { .. } => 32,
            CollectError::JobTimeout { .. } => 40,
            CollectError::Io { .. } | CollectError::Archive { .. } => 50,
            _ => 99,
        }
    }
}

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Connection, InstanceStatus, sqlplus_command};
use crate::command::{CommandOutput, CommandRunner, EXIT_NOT_FOUND};
use crate::error::{SignatureClass, first_message_line, scan_signature};

/// Status query sent to every candidate. Prints a single
/// `STATUS:<status>:<major version>:<cpu_count>` line.
pub const PROBE_QUERY: &str = "\
SET tab off feedback off verify off heading off pages 0 lines 200 trims on
WHENEVER SQLERROR EXIT SQL.SQLCODE
SELECT 'STATUS:' || status || ':' || regexp_substr(version, '\\d+') || ':' ||
  (SELECT value FROM v$parameter WHERE name = 'cpu_count') FROM v$instance;
exit
";

/// What a successful probe reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub status: InstanceStatus,
    pub version: Option<u32>,
    pub cpu_count: Option<usize>,
}

impl ProbeInfo {
    /// Find and parse the `STATUS:` line.
    pub fn parse(output: &str) -> Option<Self> {
        let line = output
            .lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix("STATUS:"))?;
        let mut fields = line.split(':');
        let status = InstanceStatus::parse(fields.next()?);
        let version = fields.next().and_then(|v| v.trim().parse().ok());
        let cpu_count = fields.next().and_then(|v| v.trim().parse().ok());
        Some(Self {
            status,
            version,
            cpu_count,
        })
    }
}

/// Classified result of probing one candidate home.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProbeOutcome {
    Connected(ProbeInfo),
    /// The home does not belong to the running instance.
    WrongHome(String),
    Blocked(String),
    BadCredentials(String),
    Network(String),
    ToolingMissing(String),
    TimedOut,
    /// Failure without a recognised signature.
    Unrecognised(String),
}

/// Map a probe run to an outcome.
///
/// Network errors on a local connection mean the environment does not
/// match the instance and are treated as a wrong home.
pub fn classify_probe(result: io::Result<CommandOutput>, connection: &Connection) -> ProbeOutcome {
    let output = match result {
        Ok(output) => output,
        Err(err) if err.kind() == io::ErrorKind::TimedOut => return ProbeOutcome::TimedOut,
        Err(err) => return ProbeOutcome::ToolingMissing(err.to_string()),
    };

    if output.status == Some(EXIT_NOT_FOUND) {
        return ProbeOutcome::ToolingMissing(format!(
            "exit status {EXIT_NOT_FOUND}: {}",
            output.combined().trim()
        ));
    }

    let text = output.combined();
    if let Some(info) = ProbeInfo::parse(&text) {
        return ProbeOutcome::Connected(info);
    }

    match scan_signature(&text) {
        Some(sig) => match sig.class() {
            SignatureClass::WrongHome => ProbeOutcome::WrongHome(sig.line),
            SignatureClass::Blocked => ProbeOutcome::Blocked(sig.line),
            SignatureClass::Credentials => ProbeOutcome::BadCredentials(sig.line),
            SignatureClass::Network if connection.is_local() => ProbeOutcome::WrongHome(sig.line),
            SignatureClass::Network => ProbeOutcome::Network(sig.line),
            SignatureClass::Query => ProbeOutcome::Unrecognised(sig.line),
        },
        None => ProbeOutcome::Unrecognised(
            first_message_line(&text)
                .or_else(|| text.lines().map(str::trim).rfind(|l| !l.is_empty()).map(String::from))
                .unwrap_or_else(|| format!("no status returned (exit status {:?})", output.status)),
        ),
    }
}

/// Checks whether a home can connect to an instance.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, sid: &str, home: &Path, connection: &Connection) -> ProbeOutcome;
}

/// [`Prober`] that runs [`PROBE_QUERY`] through SQL*Plus.
pub struct SqlplusProber<R: CommandRunner> {
    runner: Arc<R>,
    timeout: Duration,
}

impl<R: CommandRunner> SqlplusProber<R> {
    pub fn new(runner: Arc<R>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

#[async_trait]
impl<R: CommandRunner + 'static> Prober for SqlplusProber<R> {
    async fn probe(&self, sid: &str, home: &Path, connection: &Connection) -> ProbeOutcome {
        let spec = sqlplus_command(home, sid, connection)
            .with_input(PROBE_QUERY)
            .with_timeout(self.timeout);
        let outcome = classify_probe(self.runner.run(&spec).await, connection);
        tracing::debug!(sid, home = %home.display(), ?outcome, "probe finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(stdout: &str, status: i32) -> io::Result<CommandOutput> {
        Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            status: Some(status),
        })
    }

    #[test]
    fn test_connected() {
        let outcome = classify_probe(out("\nSTATUS:OPEN:19:8\n", 0), &Connection::Local);
        assert_eq!(
            outcome,
            ProbeOutcome::Connected(ProbeInfo {
                status: InstanceStatus::Open,
                version: Some(19),
                cpu_count: Some(8),
            })
        );
    }

    #[test]
    fn test_mounted_without_cpu_count() {
        let outcome = classify_probe(out("STATUS:MOUNTED:12:\n", 0), &Connection::Local);
        match outcome {
            ProbeOutcome::Connected(info) => {
                assert_eq!(info.status, InstanceStatus::Mounted);
                assert_eq!(info.cpu_count, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_signatures_are_classified() {
        let local = Connection::Local;
        let remote = Connection::Descriptor("u/p@db".into());
        let cases = [
            ("ORA-27101: shared memory realm does not exist", &local, "wrong"),
            ("ORA-01017: invalid username/password", &remote, "creds"),
            ("ORA-01033: ORACLE initialization or shutdown in progress", &local, "blocked"),
            ("ORA-12154: TNS:could not resolve", &remote, "network"),
            ("ORA-12154: TNS:could not resolve", &local, "wrong"),
            ("ORA-00942: table or view does not exist", &local, "other"),
        ];
        for (text, conn, expected) in cases {
            let outcome = classify_probe(out(text, 1), conn);
            let got = match outcome {
                ProbeOutcome::WrongHome(_) => "wrong",
                ProbeOutcome::BadCredentials(_) => "creds",
                ProbeOutcome::Blocked(_) => "blocked",
                ProbeOutcome::Network(_) => "network",
                ProbeOutcome::Unrecognised(_) => "other",
                _ => "unexpected",
            };
            assert_eq!(got, expected, "{text}");
        }
    }

    #[test]
    fn test_launch_failures() {
        let err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        assert!(matches!(
            classify_probe(Err(err), &Connection::Local),
            ProbeOutcome::ToolingMissing(_)
        ));
        assert!(matches!(
            classify_probe(out("sqlplus: not found", 127), &Connection::Local),
            ProbeOutcome::ToolingMissing(_)
        ));
        let err = io::Error::new(io::ErrorKind::TimedOut, "guard");
        assert_eq!(classify_probe(Err(err), &Connection::Local), ProbeOutcome::TimedOut);
    }

    #[test]
    fn test_unrecognised_keeps_message() {
        let outcome = classify_probe(out("something\nSP2-0310: unable to open file\n", 1), &Connection::Local);
        assert_eq!(
            outcome,
            ProbeOutcome::Unrecognised("SP2-0310: unable to open file".into())
        );
        let outcome = classify_probe(out("", 1), &Connection::Local);
        assert!(matches!(outcome, ProbeOutcome::Unrecognised(m) if m.contains("no status")));
    }
}

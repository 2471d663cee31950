use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use dbcollect::instance::sqlplus_binary;
use dbcollect::{Connection, Instance, InstanceStatus};
use tempfile::TempDir;

/// Shell script standing in for `sqlplus` in session and planner tests.
///
/// It reads commands from stdin line by line and understands just enough
/// of SQL*Plus to drive a session: `SPOOL`, `PROMPT`, `HOST`, `exit`, the
/// status, usage and snapshot queries, and the directives encoded by
/// [`crate::TestJob`] queries.
#[derive(Clone, Debug)]
pub struct FakeSqlplus {
    status: String,
    version: u32,
    cpus: usize,
    awr_usage: u64,
    statspack_usage: u64,
    windows: Vec<String>,
    login_error: Option<String>,
}

impl Default for FakeSqlplus {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSqlplus {
    /// Open 19c instance with 4 CPUs, AWR in use, no snapshots.
    pub fn new() -> Self {
        Self {
            status: "OPEN".into(),
            version: 19,
            cpus: 4,
            awr_usage: 1,
            statspack_usage: 0,
            windows: Vec::new(),
            login_error: None,
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn with_usage(mut self, awr: u64, statspack: u64) -> Self {
        self.awr_usage = awr;
        self.statspack_usage = statspack;
        self
    }

    /// Rows answered to the snapshot window query.
    pub fn with_windows<I, S>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.windows = rows.into_iter().map(Into::into).collect();
        self
    }

    /// Print `message` and exit 1 before reading any input.
    pub fn with_login_error(mut self, message: &str) -> Self {
        self.login_error = Some(message.to_string());
        self
    }

    pub fn script(&self) -> String {
        let login = match &self.login_error {
            Some(message) => format!("echo '{message}'\nexit 1\n"),
            None => String::new(),
        };
        let rows = if self.windows.is_empty() {
            ":".to_string()
        } else {
            let quoted: Vec<String> = self.windows.iter().map(|r| format!("'{r}'")).collect();
            format!("printf '%s\\n' {}", quoted.join(" "))
        };

        format!(
            r#"#!/bin/sh
{login}spool=""
while IFS= read -r line; do
  case "$line" in
    "SPOOL OFF") spool="" ;;
    "SPOOL "*) spool="${{line#SPOOL }}"; : > "$spool" ;;
    "PROMPT "*) printf '%s\n' "${{line#PROMPT }}" ;;
    "HOST "*) sh -c "${{line#HOST }}" ;;
    exit|quit) exit 0 ;;
    *FAIL_ORA*)
      echo "ORA-00942: table or view does not exist"
      if [ -n "$spool" ]; then echo "ORA-00942: table or view does not exist" >> "$spool"; fi
      exit 174 ;;
    *CRASH*) exit 3 ;;
    *HANG*) exec sleep 600 ;;
    *"'STATUS:'"*) echo "STATUS:{status}:{version}:{cpus}" ;;
    *"'USAGE:'"*) echo "USAGE:{awr}:{statspack}" ;;
    *dba_hist_snapshot*|*'stats$snapshot'*) {rows} ;;
    "@"*) if [ -n "$spool" ]; then echo "STATSPACK report" >> "$spool"; fi ;;
    SELECT*) if [ -n "$spool" ]; then printf '<html><body>%s</body></html>\n' "$line" >> "$spool"; fi ;;
  esac
done
"#,
            status = self.status,
            version = self.version,
            cpus = self.cpus,
            awr = self.awr_usage,
            statspack = self.statspack_usage,
        )
    }

    /// Write the script to `<home>/bin/sqlplus`, executable.
    pub fn install(&self, home: &Path) -> io::Result<PathBuf> {
        let binary = sqlplus_binary(home);
        if let Some(bin) = binary.parent() {
            fs::create_dir_all(bin)?;
        }
        fs::write(&binary, self.script())?;
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))?;
        Ok(binary)
    }
}

/// A temporary ORACLE_HOME with a [`FakeSqlplus`] installed.
pub struct FakeHome {
    dir: TempDir,
}

impl FakeHome {
    pub fn new(fake: &FakeSqlplus) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("fakehome").tempdir()?;
        fake.install(dir.path())?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Open, locally connected instance `sid` on this home.
    pub fn instance(&self, sid: &str) -> Instance {
        let mut instance = Instance::new(sid, self.path(), Connection::Local);
        instance.status = InstanceStatus::Open;
        instance.version = Some(19);
        instance.cpu_count = Some(4);
        instance
    }
}

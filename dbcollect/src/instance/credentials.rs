use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::Connection;
use crate::error::{CollectError, Result};

/// One line of the credentials file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialEntry {
    pub sid: String,
    pub enabled: bool,
    pub connection: Connection,
}

/// Per-sid connection settings read from a `sid:enabled:connectstring` file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Credentials {
    entries: BTreeMap<String, CredentialEntry>,
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CollectError::io(format!("reading {}", path.display()), e))?;
        Self::parse(path, &text)
    }

    /// Parse the file contents. `path` is only used in error messages.
    ///
    /// The connect string is everything after the second colon, so it may
    /// itself contain colons (`host:1521/service`).
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let bad = |reason: &str| CollectError::Credentials {
                path: PathBuf::from(path),
                line: idx + 1,
                reason: reason.to_string(),
            };

            let mut fields = line.splitn(3, ':');
            let sid = fields.next().unwrap_or("").trim();
            let flag = fields.next().ok_or_else(|| bad("missing enabled flag"))?;
            let descriptor = fields.next().unwrap_or("").trim();

            if sid.is_empty() {
                return Err(bad("empty sid"));
            }
            let enabled = parse_flag(flag).ok_or_else(|| bad("enabled flag must be Y or N"))?;
            let connection = if descriptor.is_empty() {
                Connection::Local
            } else {
                Connection::Descriptor(descriptor.to_string())
            };

            entries.insert(
                sid.to_string(),
                CredentialEntry {
                    sid: sid.to_string(),
                    enabled,
                    connection,
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn get(&self, sid: &str) -> Option<&CredentialEntry> {
        self.entries.get(sid)
    }

    /// False only for sids explicitly disabled in the file.
    pub fn is_enabled(&self, sid: &str) -> bool {
        self.get(sid).is_none_or(|e| e.enabled)
    }

    /// Connection to use for `sid`, local when not listed.
    pub fn connection(&self, sid: &str) -> Connection {
        self.get(sid)
            .map(|e| e.connection.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_flag(flag: &str) -> Option<bool> {
    match flag.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" => Some(true),
        "n" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

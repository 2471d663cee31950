use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::sqlplus_binary;
use crate::command::{CommandRunner, CommandSpec};
use crate::config::ResolverConfig;

static PMON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ora_pmon_(\S+)$").expect("static regex"));

static HOME_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<HOME\s([^>]*)>").expect("static regex"));

static XML_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("static regex"));

/// Sids of running instances in `ps -eo args` output.
///
/// ASM (`+ASM`) and management (`-MGMTDB`) instances are ignored.
pub fn parse_pmon(ps_output: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    ps_output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|cmd| PMON.captures(cmd))
        .map(|caps| caps[1].to_string())
        .filter(|sid| !sid.starts_with('+') && !sid.starts_with('-'))
        .filter(|sid| seen.insert(sid.clone()))
        .collect()
}

/// Value of `inventory_loc=` in an `oraInst.loc` file.
pub fn parse_inventory_pointer(text: &str) -> Option<PathBuf> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("inventory_loc="))
        .map(str::trim)
        .find(|loc| !loc.is_empty())
        .map(PathBuf::from)
}

/// A `<HOME>` entry of the central inventory.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InventoryHome {
    pub name: String,
    pub location: PathBuf,
    /// Clusterware home.
    pub crs: bool,
}

/// Homes listed in `ContentsXML/inventory.xml`.
pub fn parse_inventory(xml: &str) -> Vec<InventoryHome> {
    HOME_TAG
        .captures_iter(xml)
        .filter_map(|tag| {
            let mut name = None;
            let mut location = None;
            let mut crs = false;
            for attr in XML_ATTR.captures_iter(&tag[1]) {
                match &attr[1] {
                    "NAME" => name = Some(attr[2].to_string()),
                    "LOC" => location = Some(PathBuf::from(&attr[2])),
                    "CRS" => crs = attr[2].eq_ignore_ascii_case("true"),
                    _ => {}
                }
            }
            Some(InventoryHome {
                name: name.unwrap_or_default(),
                location: location?,
                crs,
            })
        })
        .collect()
}

/// One `sid:home:Y|N` line of oratab.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OratabEntry {
    pub sid: String,
    pub home: PathBuf,
    pub autostart: bool,
}

/// Parse oratab, skipping comments and malformed lines.
pub fn parse_oratab(text: &str) -> Vec<OratabEntry> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut fields = line.split(':');
            let sid = fields.next()?.trim();
            let home = fields.next()?.trim();
            let flag = fields.next()?.trim();
            if sid.is_empty() || home.is_empty() {
                return None;
            }
            let autostart = match flag {
                "Y" | "y" => true,
                "N" | "n" => false,
                _ => return None,
            };
            Some(OratabEntry {
                sid: sid.to_string(),
                home: PathBuf::from(home),
                autostart,
            })
        })
        .collect()
}

/// Home registrations found on the host.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct HostInventory {
    pub oratab: Vec<OratabEntry>,
    pub inventory: Vec<InventoryHome>,
}

impl HostInventory {
    /// Read oratab and the central inventory, as enabled in `config`.
    ///
    /// Missing or unreadable files are logged and treated as empty.
    pub async fn load<R: CommandRunner + ?Sized>(runner: &R, config: &ResolverConfig) -> Self {
        let mut host = HostInventory::default();

        if config.use_oratab {
            match first_readable(runner, &config.oratab_paths).await {
                Some((path, text)) => {
                    host.oratab = parse_oratab(&text);
                    tracing::debug!(path = %path.display(), entries = host.oratab.len(), "oratab loaded");
                }
                None => tracing::warn!("oratab not found or not readable"),
            }
        }

        if config.use_inventory {
            match first_readable(runner, &config.inventory_pointers).await {
                Some((_, pointer)) => match parse_inventory_pointer(&pointer) {
                    Some(loc) => {
                        let path = loc.join("ContentsXML").join("inventory.xml");
                        match runner.read_file(&path).await {
                            Ok(xml) => {
                                host.inventory = parse_inventory(&xml);
                                tracing::debug!(path = %path.display(), homes = host.inventory.len(), "inventory loaded");
                            }
                            Err(err) => {
                                tracing::warn!(path = %path.display(), "inventory not readable: {err}")
                            }
                        }
                    }
                    None => tracing::warn!("oraInst.loc has no inventory_loc"),
                },
                None => tracing::warn!("oraInst.loc not found or not readable"),
            }
        }

        host
    }

    /// Homes to try for `sid`, most specific first, without duplicates.
    ///
    /// The oratab home registered for `sid` comes first, then the other
    /// oratab homes, then inventory homes.
    pub fn ordered_homes(&self, sid: &str) -> Vec<PathBuf> {
        let own = self.oratab.iter().filter(|e| e.sid == sid).map(|e| e.home.clone());
        let other = self.oratab.iter().filter(|e| e.sid != sid).map(|e| e.home.clone());
        let inventory = self.inventory.iter().map(|h| h.location.clone());

        let mut seen = HashSet::new();
        own.chain(other)
            .chain(inventory)
            .filter(|home| seen.insert(home.clone()))
            .collect()
    }
}

async fn first_readable<R: CommandRunner + ?Sized>(
    runner: &R,
    paths: &[PathBuf],
) -> Option<(PathBuf, String)> {
    for path in paths {
        if let Ok(text) = runner.read_file(path).await {
            return Some((path.clone(), text));
        }
    }
    None
}

/// Running instance sids from the process table.
pub async fn running_sids<R: CommandRunner + ?Sized>(runner: &R) -> io::Result<Vec<String>> {
    let output = runner
        .run(&CommandSpec::new("ps").with_args(["-eo", "args"]))
        .await?;
    if !output.success() {
        return Err(io::Error::other(format!(
            "ps exited with {:?}: {}",
            output.status,
            output.stderr.trim()
        )));
    }
    Ok(parse_pmon(&output.stdout))
}

/// Candidate homes for `sid` that exist and contain `bin/sqlplus`.
///
/// An explicit override replaces every other source.
pub async fn candidate_homes<R: CommandRunner + ?Sized>(
    runner: &R,
    host: &HostInventory,
    config: &ResolverConfig,
    sid: &str,
) -> Vec<PathBuf> {
    let homes = match &config.home_override {
        Some(home) => vec![home.clone()],
        None => host.ordered_homes(sid),
    };

    let mut usable = Vec::with_capacity(homes.len());
    for home in homes {
        if !runner.is_dir(&home).await {
            tracing::debug!(sid, home = %home.display(), "home does not exist");
            continue;
        }
        if !runner.is_file(&sqlplus_binary(&home)).await {
            tracing::debug!(sid, home = %home.display(), "no bin/sqlplus, skipping");
            continue;
        }
        usable.push(home);
    }
    usable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pmon_filters_asm_and_dupes() {
        let ps = "\
ARGS
/usr/sbin/sshd -D
ora_pmon_DB1
ora_pmon_+ASM1
ora_pmon_-MGMTDB
ora_pmon_DB2
ora_pmon_DB1
ora_smon_DB3
grep ora_pmon_DB4 extra
";
        assert_eq!(parse_pmon(ps), ["DB1", "DB2"]);
    }

    #[test]
    fn test_parse_inventory_pointer() {
        let text = "inst_group=oinstall\ninventory_loc=/u01/app/oraInventory\n";
        assert_eq!(
            parse_inventory_pointer(text),
            Some(PathBuf::from("/u01/app/oraInventory"))
        );
        assert_eq!(parse_inventory_pointer("inst_group=dba\n"), None);
    }

    #[test]
    fn test_parse_inventory_homes() {
        let xml = r#"<?xml version="1.0" standalone="yes" ?>
<INVENTORY>
<HOME_LIST>
<HOME NAME="OraGI19Home1" LOC="/u01/app/19.0.0/grid" TYPE="O" IDX="1" CRS="true"/>
<HOME NAME="OraDB19Home1" LOC="/u01/app/oracle/product/19.0.0/dbhome_1" TYPE="O" IDX="2"/>
<HOME NAME="Removed" LOC="/u01/old" TYPE="O" IDX="3" REMOVED="T"/>
</HOME_LIST>
</INVENTORY>"#;
        let homes = parse_inventory(xml);
        assert_eq!(homes.len(), 3);
        assert_eq!(homes[0].name, "OraGI19Home1");
        assert!(homes[0].crs);
        assert_eq!(
            homes[1].location,
            PathBuf::from("/u01/app/oracle/product/19.0.0/dbhome_1")
        );
        assert!(!homes[1].crs);
    }

    #[test]
    fn test_parse_oratab() {
        let text = "\
# comment line
+ASM:/u01/grid:N   # asm
DB1:/u01/db19:Y
DB2:/u01/db12:n
broken line
DB3::Y
";
        let entries = parse_oratab(text);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].sid, "DB1");
        assert!(entries[1].autostart);
        assert_eq!(entries[2].home, PathBuf::from("/u01/db12"));
        assert!(!entries[2].autostart);
    }

    #[test]
    fn test_ordered_homes_prefers_own_oratab_entry() {
        let host = HostInventory {
            oratab: parse_oratab("DB2:/u01/b:Y\nDB1:/u01/a:Y\nDB3:/u01/b:N\n"),
            inventory: vec![
                InventoryHome {
                    name: "h1".into(),
                    location: "/u01/c".into(),
                    crs: false,
                },
                InventoryHome {
                    name: "h2".into(),
                    location: "/u01/a".into(),
                    crs: false,
                },
            ],
        };
        let homes = host.ordered_homes("DB1");
        assert_eq!(
            homes,
            [
                PathBuf::from("/u01/a"),
                PathBuf::from("/u01/b"),
                PathBuf::from("/u01/c")
            ]
        );
    }
}

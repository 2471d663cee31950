use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{CollectError, Result};

/// Staging subdirectories.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Area {
    Lock,
    DbInfo,
    /// Finished reports, written only by atomic rename.
    Awr,
    Capacity,
    Log,
    /// Per-session scratch directories.
    Work,
}

impl Area {
    pub const ALL: [Area; 6] = [
        Area::Lock,
        Area::DbInfo,
        Area::Awr,
        Area::Capacity,
        Area::Log,
        Area::Work,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Area::Lock => "lock",
            Area::DbInfo => "dbinfo",
            Area::Awr => "awr",
            Area::Capacity => "capacity",
            Area::Log => "log",
            Area::Work => "work",
        }
    }
}

/// Temporary `dbcollect_*` directory, removed when dropped.
#[derive(Debug)]
pub struct StagingDir {
    dir: TempDir,
}

impl StagingDir {
    pub fn create(base: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("dbcollect_")
            .tempdir_in(base)
            .map_err(|e| CollectError::io(format!("creating staging dir in {}", base.display()), e))?;
        for area in Area::ALL {
            let path = dir.path().join(area.dir_name());
            fs::create_dir(&path)
                .map_err(|e| CollectError::io(format!("creating {}", path.display()), e))?;
        }
        tracing::debug!(path = %dir.path().display(), "staging directory created");
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, area: Area) -> PathBuf {
        self.dir.path().join(area.dir_name())
    }

    /// Fresh scratch directory for one session.
    pub fn scratch_dir(&self, name: &str) -> Result<PathBuf> {
        let path = self.path(Area::Work).join(name);
        fs::create_dir_all(&path)
            .map_err(|e| CollectError::io(format!("creating {}", path.display()), e))?;
        Ok(path)
    }
}

/// Regular files in `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| CollectError::io(format!("listing {}", dir.display()), e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CollectError::io(format!("listing {}", dir.display()), e))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Move `from` into `dir`, keeping its file name.
///
/// Both must be on the same filesystem so the file appears atomically.
pub fn publish(from: &Path, dir: &Path) -> Result<PathBuf> {
    let name = from
        .file_name()
        .ok_or_else(|| CollectError::Config(format!("{} has no file name", from.display())))?;
    let to = dir.join(name);
    fs::rename(from, &to).map_err(|e| {
        CollectError::io(format!("moving {} to {}", from.display(), to.display()), e)
    })?;
    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_and_cleanup() {
        let base = tempfile::tempdir().unwrap();
        let root;
        {
            let staging = StagingDir::create(base.path()).unwrap();
            root = staging.root().to_path_buf();
            assert!(
                root.file_name()
                    .unwrap()
                    .to_string_lossy()
                    .starts_with("dbcollect_")
            );
            for area in Area::ALL {
                assert!(staging.path(area).is_dir(), "{}", area.dir_name());
            }
            let scratch = staging.scratch_dir("DB1-w0").unwrap();
            assert!(scratch.starts_with(staging.path(Area::Work)));
        }
        assert!(!root.exists());
    }

    #[test]
    fn test_publish_and_list() {
        let base = tempfile::tempdir().unwrap();
        let staging = StagingDir::create(base.path()).unwrap();
        let scratch = staging.scratch_dir("w0").unwrap();
        let file = scratch.join("DB1_1_1_awr_1_2_x.html");
        std::fs::write(&file, "<html/>").unwrap();

        let published = publish(&file, &staging.path(Area::Awr)).unwrap();
        assert!(!file.exists());
        assert_eq!(list_files(&staging.path(Area::Awr)).unwrap(), [published]);
        assert!(list_files(&staging.path(Area::Log)).unwrap().is_empty());
    }
}

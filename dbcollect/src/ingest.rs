//! Moving staged artifacts into the output archive.
//!
//! Finished reports appear in the staging `awr/` directory by atomic rename.
//! The orchestrator sweeps it periodically, optionally strips SQL from HTML
//! reports, stores each file under `oracle/<sid>/` and deletes the staged
//! copy. Auxiliary areas are swept once after all workers finished.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{CollectError, Result};
use crate::redact;
use crate::staging::{Area, list_files};
use crate::telemetry;

/// Destination of collected files.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Copy `source` into the archive as `tag`. Returns bytes stored.
    async fn store(&self, source: &Path, tag: &str) -> Result<u64>;

    /// Store in-memory content as `tag`.
    async fn store_bytes(&self, data: &[u8], tag: &str) -> Result<u64>;
}

/// Archive backed by a plain directory tree.
#[derive(Clone, Debug)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target(&self, tag: &str) -> Result<PathBuf> {
        let relative = Path::new(tag);
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir));
        if tag.is_empty() || escapes {
            return Err(CollectError::Archive {
                tag: tag.to_string(),
                reason: "tag must be a relative path inside the archive".into(),
            });
        }
        Ok(self.root.join(relative))
    }

    async fn prepare(&self, tag: &str) -> Result<PathBuf> {
        let target = self.target(tag)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| archive_error(tag, e))?;
        }
        Ok(target)
    }
}

fn archive_error(tag: &str, err: std::io::Error) -> CollectError {
    CollectError::Archive {
        tag: tag.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl ArchiveSink for DirectoryArchive {
    async fn store(&self, source: &Path, tag: &str) -> Result<u64> {
        let target = self.prepare(tag).await?;
        tokio::fs::copy(source, &target)
            .await
            .map_err(|e| archive_error(tag, e))
    }

    async fn store_bytes(&self, data: &[u8], tag: &str) -> Result<u64> {
        let target = self.prepare(tag).await?;
        tokio::fs::write(&target, data)
            .await
            .map_err(|e| archive_error(tag, e))?;
        Ok(data.len() as u64)
    }
}

/// Archive prefix of an auxiliary staging area.
pub fn area_prefix(area: Area) -> String {
    format!("oracle/{}", area.dir_name())
}

/// Stores the artifacts of one instance.
pub struct Ingestor<'a, A: ArchiveSink + ?Sized> {
    archive: &'a A,
    sid: String,
    strip: bool,
}

impl<'a, A: ArchiveSink + ?Sized> Ingestor<'a, A> {
    pub fn new(archive: &'a A, sid: impl Into<String>, strip: bool) -> Self {
        Self {
            archive,
            sid: sid.into(),
            strip,
        }
    }

    /// Archive every finished report in `dir` as `oracle/<sid>/<file>`.
    /// Returns the number of reports stored.
    pub async fn ingest_reports(&self, dir: &Path) -> Result<usize> {
        let mut stored = 0;
        for file in list_files(dir)? {
            if self.strip && is_html(&file) {
                match redact::strip_file(&file) {
                    Ok(removed) => {
                        tracing::debug!(file = %file.display(), removed, "SQL sections stripped")
                    }
                    // stored unmodified
                    Err(err) => tracing::warn!(code = %err.code(), "{err}"),
                }
            }
            let tag = format!("oracle/{}/{}", self.sid, file_name(&file)?);
            self.move_into_archive(&file, &tag, "awr").await?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Archive every file in `dir` under `prefix`.
    pub async fn sweep(&self, dir: &Path, prefix: &str) -> Result<usize> {
        let files = list_files(dir)?;
        for file in &files {
            let tag = format!("{prefix}/{}", file_name(file)?);
            self.move_into_archive(file, &tag, prefix).await?;
        }
        Ok(files.len())
    }

    async fn move_into_archive(&self, file: &Path, tag: &str, area: &str) -> Result<()> {
        let bytes = self.archive.store(file, tag).await?;
        tokio::fs::remove_file(file)
            .await
            .map_err(|e| CollectError::io(format!("removing {}", file.display()), e))?;
        telemetry::record_file_archived(area, bytes);
        Ok(())
    }
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CollectError::Config(format!("{} has no file name", path.display())))
}

/// Report progress of one instance.
#[derive(Debug)]
pub struct Progress {
    total: usize,
    done: usize,
    started: Instant,
    render: bool,
}

impl Progress {
    pub fn new(total: usize, render: bool) -> Self {
        Self {
            total,
            done: 0,
            started: Instant::now(),
            render,
        }
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn advance(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.done += count;
        if self.render {
            let mut out = std::io::stdout().lock();
            let _ = write!(out, "\x1b[2K\x1b[G{}", self.line(self.started.elapsed()));
            let _ = out.flush();
        }
    }

    /// End the progress line.
    pub fn finish(&self) {
        if self.render && self.done > 0 {
            println!();
        }
    }

    pub fn line(&self, elapsed: Duration) -> String {
        let fraction = if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        };
        let secs = elapsed.as_secs_f64();
        let remaining = if self.done == 0 {
            Duration::ZERO
        } else {
            let left = self.total.saturating_sub(self.done) as f64;
            Duration::from_secs_f64(secs / self.done as f64 * left)
        };
        let rate = if secs > 0.0 { self.done as f64 / secs } else { 0.0 };
        format!(
            "Report {} of {} ({:.1}% done), elapsed: {}, remaining: {}, reports/s: {:.2}",
            self.done,
            self.total,
            fraction * 100.0,
            format_duration(elapsed),
            format_duration(remaining),
            rate
        )
    }
}

/// `H:MM:SS`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

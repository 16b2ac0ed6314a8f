//! Bounded ZIP expansion.
//!
//! Archives found in the corpus are unpacked into temporary directories
//! owned by an [`ExpansionScope`]. The scope enforces nesting depth, total
//! entry count, and total decompressed bytes across every archive expanded
//! during one ingestion, and skips archives whose content it has already
//! seen. Dropping the scope deletes every directory it created, on success
//! and failure alike.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::error::ExtractError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    /// Deepest archive nesting level that is still expanded (corpus level = 1).
    pub max_depth: usize,
    pub max_entries: usize,
    pub max_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_depth: 4,
            max_entries: 10_000,
            max_bytes: 512 * 1024 * 1024,
        }
    }
}

pub struct ExpansionScope {
    limits: ArchiveLimits,
    dirs: Vec<TempDir>,
    seen: HashSet<String>,
    entries: usize,
    bytes: u64,
}

impl ExpansionScope {
    pub fn new(limits: ArchiveLimits) -> Self {
        Self {
            limits,
            dirs: Vec::new(),
            seen: HashSet::new(),
            entries: 0,
            bytes: 0,
        }
    }

    pub fn limits(&self) -> ArchiveLimits {
        self.limits
    }

    /// Directories currently held open by this scope.
    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(|d| d.path())
    }

    /// Unpack `archive`, found at nesting level `depth`, into a new
    /// temporary directory and return its path.
    ///
    /// Returns `Ok(None)` when an archive with identical bytes was already
    /// expanded in this scope.
    pub fn expand(&mut self, archive: &Path, depth: usize) -> Result<Option<PathBuf>, ExtractError> {
        if depth > self.limits.max_depth {
            return Err(ExtractError::Archive(format!(
                "nesting depth {} exceeds limit {}",
                depth, self.limits.max_depth
            )));
        }

        let size = std::fs::metadata(archive)?.len();
        if size > self.limits.max_bytes {
            return Err(ExtractError::Archive(format!(
                "archive is {} bytes, limit is {}",
                size, self.limits.max_bytes
            )));
        }

        let bytes = std::fs::read(archive)?;
        let mut zip = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice()))
            .map_err(|e| ExtractError::Archive(e.to_string()))?;

        let digest = format!("{:x}", Sha256::digest(&bytes));
        if !self.seen.insert(digest) {
            tracing::warn!(
                "skipping {}: identical archive already expanded",
                archive.display()
            );
            return Ok(None);
        }

        let dir = tempfile::Builder::new()
            .prefix("docchat-archive-")
            .tempdir()?;

        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| ExtractError::Archive(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let Some(relative) = entry.enclosed_name() else {
                tracing::warn!(
                    "skipping unsafe entry '{}' in {}",
                    entry.name(),
                    archive.display()
                );
                continue;
            };

            self.entries += 1;
            if self.entries > self.limits.max_entries {
                return Err(ExtractError::Archive(format!(
                    "more than {} archive entries",
                    self.limits.max_entries
                )));
            }

            let target = dir.path().join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let remaining = self.limits.max_bytes.saturating_sub(self.bytes);
            let mut out = std::fs::File::create(&target)?;
            let written = std::io::copy(&mut (&mut entry).take(remaining + 1), &mut out)?;
            self.bytes += written;
            if self.bytes > self.limits.max_bytes {
                return Err(ExtractError::Archive(format!(
                    "decompressed size exceeds {} bytes",
                    self.limits.max_bytes
                )));
            }
        }

        let path = dir.path().to_path_buf();
        self.dirs.push(dir);
        Ok(Some(path))
    }
}

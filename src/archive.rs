//! Directory packing into a tar stream and unpacking of our own archives
//!
//! A packed directory always carries a zero-byte `~encrypto_pack` entry at its
//! root. On decryption that entry is the only signal that the payload should be
//! unpacked; any other tar file (or non-tar file) is delivered untouched.

use serde::Serialize;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Marker entry identifying archives produced by this tool
pub const SENTINEL_NAME: &str = "~encrypto_pack";

/// Archive errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(
        "No files were packed, this could be due to a permission error ({} file(s) failed)",
        failed.len()
    )]
    NothingPacked { failed: Vec<PathBuf> },
    #[error("{0} already exists and would be lost when packing")]
    SentinelExists(PathBuf),
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Outcome of packing a directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct PackReport {
    /// Regular files written to the archive (the sentinel is not listed)
    pub packed: Vec<PathBuf>,
    /// Entries that could not be read and were left out
    pub failed: Vec<PathBuf>,
}

/// Packs directories into tar archives and unpacks them again
#[derive(Debug, Clone, Default)]
pub struct ArchivePacker {
    exclude: Vec<PathBuf>,
}

impl ArchivePacker {
    /// Create a packer that skips the running executable
    pub fn new() -> Self {
        let packer = Self::default();
        match std::env::current_exe() {
            Ok(exe) => packer.exclude(exe),
            Err(_) => packer,
        }
    }

    /// Never pack `path`, even when it lies inside the source directory
    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path = fs::canonicalize(&path).unwrap_or(path);
        self.exclude.push(path);
        self
    }

    /// Pack every file and directory below `source_dir` into a tar file at `archive_path`.
    ///
    /// The sentinel is created in `source_dir` for the duration of the walk and
    /// removed afterwards whatever the outcome. A file already using the
    /// sentinel name is left alone and the pack fails with
    /// [`ArchiveError::SentinelExists`]. Unreadable files are reported in
    /// [`PackReport::failed`]; if no file at all could be packed the archive is
    /// deleted and [`ArchiveError::NothingPacked`] is returned.
    pub fn pack(&self, source_dir: &Path, archive_path: &Path) -> Result<PackReport, ArchiveError> {
        if !source_dir.is_dir() {
            return Err(ArchiveError::NotADirectory(source_dir.to_path_buf()));
        }

        let sentinel = source_dir.join(SENTINEL_NAME);
        match OpenOptions::new().write(true).create_new(true).open(&sentinel) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ArchiveError::SentinelExists(sentinel));
            }
            Err(e) => return Err(e.into()),
        }

        let result = self.write_archive(source_dir, archive_path);

        if let Err(e) = fs::remove_file(&sentinel) {
            warn!("Failed to remove {}: {}", sentinel.display(), e);
        }

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                remove_if_exists(archive_path);
                return Err(e.into());
            }
        };

        for path in &report.failed {
            warn!("Failed to access {}", path.display());
        }

        if report.packed.is_empty() {
            remove_if_exists(archive_path);
            return Err(ArchiveError::NothingPacked {
                failed: report.failed,
            });
        }

        debug!(
            "Packed {} file(s) from {} into {}",
            report.packed.len(),
            source_dir.display(),
            archive_path.display()
        );
        Ok(report)
    }

    fn write_archive(&self, source_dir: &Path, archive_path: &Path) -> io::Result<PackReport> {
        let root = fs::canonicalize(source_dir)?;
        let output = File::create(archive_path)?;
        let archive_path = fs::canonicalize(archive_path)?;

        let mut builder = tar::Builder::new(BufWriter::new(output));
        builder.follow_symlinks(false);

        let mut report = PackReport::default();

        for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if let Some(path) = e.path() {
                        report.failed.push(path.to_path_buf());
                    }
                    continue;
                }
            };

            let path = entry.path();
            if path == archive_path || self.exclude.iter().any(|p| p == path) {
                continue;
            }

            let relative = path
                .strip_prefix(&root)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let file_type = entry.file_type();

            if file_type.is_dir() {
                builder.append_dir(relative, path)?;
            } else if file_type.is_file() {
                let mut file = match File::open(path) {
                    Ok(file) => file,
                    Err(_) => {
                        report.failed.push(path.to_path_buf());
                        continue;
                    }
                };
                builder.append_file(relative, &mut file)?;
                if relative != Path::new(SENTINEL_NAME) {
                    report.packed.push(path.to_path_buf());
                }
            } else if builder.append_path_with_name(path, relative).is_err() {
                report.failed.push(path.to_path_buf());
            }
        }

        builder.into_inner()?.flush()?;
        Ok(report)
    }

    /// Whether `path` is a tar archive produced by [`ArchivePacker::pack`]
    pub fn is_packed_archive(path: &Path) -> bool {
        let Ok(file) = File::open(path) else {
            return false;
        };
        let mut archive = tar::Archive::new(BufReader::new(file));
        let Ok(entries) = archive.entries() else {
            return false;
        };

        for entry in entries {
            let Ok(entry) = entry else {
                return false;
            };
            if entry.header().entry_type().is_dir() {
                continue;
            }
            if let Ok(entry_path) = entry.path() {
                let entry_path = entry_path
                    .strip_prefix(".")
                    .unwrap_or_else(|_| entry_path.as_ref());
                if entry_path == Path::new(SENTINEL_NAME) {
                    return true;
                }
            }
        }
        false
    }

    /// Extract `archive_path` into `destination`, then remove the sentinel from it.
    ///
    /// Entries that would land outside `destination` are skipped.
    pub fn unpack(archive_path: &Path, destination: &Path) -> Result<(), ArchiveError> {
        fs::create_dir_all(destination)?;

        let mut archive = tar::Archive::new(BufReader::new(File::open(archive_path)?));
        archive.unpack(destination)?;

        match fs::remove_file(destination.join(SENTINEL_NAME)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Delete the files that went into an archive, then prune directories below
/// `root` that became empty. `root` itself is kept.
///
/// Returns the number of files removed; failures are logged and skipped.
pub fn remove_packed_sources(root: &Path, packed: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in packed {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
    {
        let is_empty = fs::read_dir(entry.path())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            if let Err(e) = fs::remove_dir(entry.path()) {
                warn!("Failed to remove {}: {}", entry.path().display(), e);
            }
        }
    }

    removed
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

//! Marker store and the find-or-create primitives everything else builds on.
//!
//! Every helper here is idempotent: an existing entry of the right type is
//! success, an existing entry of the wrong type is [`Error::Corrupt`], and a
//! lost creation race is resolved by re-checking the winner.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};
use crate::fid::Fid;
use crate::layout::{fid_path, shard_dir};

const DIR_MODE: u32 = 0o755;
const MARKER_MODE: u32 = 0o644;

/// Ensures `path` is a directory. Returns `true` if it was created.
pub fn find_or_mkdir(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(false),
        Ok(_) => Err(Error::corrupt(path, "directory")),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            match DirBuilder::new().mode(DIR_MODE).create(path) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    find_or_mkdir(path).map(|_| false)
                }
                Err(err) => Err(Error::Io(err)),
            }
        }
        Err(err) => Err(Error::Io(err)),
    }
}

/// Ensures `path` is a regular file, creating it empty if missing.
pub fn find_or_create(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(false),
        Ok(_) => Err(Error::corrupt(path, "regular file")),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(MARKER_MODE)
                .open(path)
            {
                Ok(_) => Ok(true),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    find_or_create(path).map(|_| false)
                }
                Err(err) => Err(Error::Io(err)),
            }
        }
        Err(err) => Err(Error::Io(err)),
    }
}

/// Ensures `link` is a regular file, hard-linking it to `source` if missing.
pub fn find_or_link(source: &Path, link: &Path) -> Result<bool> {
    match fs::metadata(link) {
        Ok(meta) if meta.is_file() => Ok(false),
        Ok(_) => Err(Error::corrupt(link, "regular file")),
        Err(err) if err.kind() == ErrorKind::NotFound => match fs::hard_link(source, link) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                find_or_link(source, link).map(|_| false)
            }
            Err(err) => Err(Error::Io(err)),
        },
        Err(err) => Err(Error::Io(err)),
    }
}

/// Removes an empty directory. A directory that is already gone counts as
/// removed by someone else and returns `Ok(false)`.
pub fn remove_dir_if_present(path: &Path) -> Result<bool> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::Io(err)),
    }
}

/// Removes a file; already gone returns `Ok(false)`.
pub fn remove_file_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::Io(err)),
    }
}

/// Hard link count of `path`.
pub fn link_count(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path)?.nlink())
}

/// Canonical per-FID markers under `fids/`.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn marker_path(&self, fid: &Fid) -> PathBuf {
        fid_path(&self.root, fid)
    }

    /// Finds or creates the marker of `fid` and returns its path.
    pub fn ensure_marker(&self, fid: &Fid) -> Result<PathBuf> {
        find_or_mkdir(&shard_dir(&self.root, fid))?;
        let marker = self.marker_path(fid);
        if find_or_create(&marker)? {
            debug!("created marker {}", marker.display());
        }
        Ok(marker)
    }
}

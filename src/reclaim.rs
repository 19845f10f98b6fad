//! Consolidation of aged windows into the flat inactive index.
//!
//! Every link under `inactive/<start>-<end>/<shard>/` is re-linked into
//! `inactive/all/<shard>/` and then removed; emptied shard and window
//! directories are removed afterwards. Anything with an unexpected name is
//! left alone together with its parent directories.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Mutex, TryLockError};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::fid::{parse_shard_name, Fid};
use crate::layout::{HistoryLayout, Tier, INACTIVE_ALL_DIR};
use crate::linker::TierLinker;
use crate::store::{remove_dir_if_present, remove_file_if_present, ObjectStore};
use crate::window::Window;

/// Statistics from one reclaim pass.
#[derive(Debug, Clone, Default)]
pub struct ReclaimStats {
    /// Another pass was already running; nothing was done.
    pub busy: bool,
    /// Window directories found under `inactive/`, excluding `all`.
    pub windows_scanned: usize,
    /// Window directories emptied and removed.
    pub windows_removed: usize,
    /// Shard directories emptied and removed.
    pub shards_removed: usize,
    /// Links moved into `inactive/all/`.
    pub links_consolidated: usize,
    /// Entries left in place because their name or type was unexpected.
    pub skipped: usize,
    /// One message per window whose pass failed.
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl ReclaimStats {
    pub fn record_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "windows: {} scanned, {} removed; links consolidated: {}; skipped: {}; errors: {}; duration: {:?}",
            self.windows_scanned,
            self.windows_removed,
            self.links_consolidated,
            self.skipped,
            self.errors.len(),
            self.duration
        )
    }
}

#[derive(Debug)]
pub struct InactiveReclaimer {
    layout: HistoryLayout,
    store: ObjectStore,
    linker: TierLinker,
    pass: Mutex<()>,
}

impl InactiveReclaimer {
    /// `store` supplies markers for links whose marker has gone missing.
    pub fn new(layout: HistoryLayout, store: ObjectStore, linker: TierLinker) -> Self {
        Self {
            layout,
            store,
            linker,
            pass: Mutex::new(()),
        }
    }

    /// Runs one pass over `inactive/`.
    ///
    /// Passes are serialized: a call made while another pass is running
    /// returns at once with `busy` set. A failing window is recorded in the
    /// stats and the pass moves on to the next one.
    pub fn run_once(&self) -> Result<ReclaimStats> {
        let start = Instant::now();
        let mut stats = ReclaimStats::default();
        let _pass = match self.pass.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                stats.busy = true;
                return Ok(stats);
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let inactive = self.layout.tier_dir(Tier::Inactive);
        let entries = match fs::read_dir(&inactive) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(stats),
            Err(err) => return Err(Error::Io(err)),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if name == INACTIVE_ALL_DIR {
                continue;
            }
            let window = match name.to_str().map(str::parse::<Window>) {
                Some(Ok(window)) => window,
                _ => {
                    warn!("skipping unrecognized entry {} in inactive", name.to_string_lossy());
                    stats.skipped += 1;
                    continue;
                }
            };
            if !entry.file_type()?.is_dir() {
                warn!("skipping non-directory window {} in inactive", window);
                stats.skipped += 1;
                continue;
            }

            stats.windows_scanned += 1;
            if let Err(err) = self.reclaim_window(&entry.path(), &mut stats) {
                error!("failed to reclaim inactive window {}: {}", window, err);
                stats.record_error(format!("{}: {}", window, err));
            }
        }

        stats.duration = start.elapsed();
        if stats.links_consolidated > 0 || stats.windows_removed > 0 || stats.has_errors() {
            info!("reclaimed inactive windows ({})", stats.summary());
        }
        Ok(stats)
    }

    fn reclaim_window(&self, window_dir: &Path, stats: &mut ReclaimStats) -> Result<()> {
        let mut clean = true;
        for entry in fs::read_dir(window_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let shard = match name.to_str().and_then(parse_shard_name) {
                Some(shard) => shard,
                None => {
                    warn!(
                        "skipping unrecognized shard {} in {}",
                        name.to_string_lossy(),
                        window_dir.display()
                    );
                    stats.skipped += 1;
                    clean = false;
                    continue;
                }
            };
            if !entry.file_type()?.is_dir() {
                warn!("skipping non-directory shard {}", entry.path().display());
                stats.skipped += 1;
                clean = false;
                continue;
            }
            if !self.reclaim_shard(&entry.path(), shard, stats)? {
                clean = false;
            }
        }

        if clean && remove_dir_if_present(window_dir)? {
            debug!("removed {}", window_dir.display());
            stats.windows_removed += 1;
        }
        Ok(())
    }

    /// Returns `true` when the shard held nothing unexpected.
    fn reclaim_shard(&self, shard_dir: &Path, shard: u16, stats: &mut ReclaimStats) -> Result<bool> {
        let all = self.layout.inactive_all_dir();
        let mut clean = true;
        for entry in fs::read_dir(shard_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let fid = match name.to_str().map(str::parse::<Fid>) {
                Some(Ok(fid)) if fid.shard() == shard => fid,
                _ => {
                    warn!("skipping unrecognized link {}", entry.path().display());
                    stats.skipped += 1;
                    clean = false;
                    continue;
                }
            };
            if !entry.file_type()?.is_file() {
                warn!("skipping non-regular link {}", entry.path().display());
                stats.skipped += 1;
                clean = false;
                continue;
            }

            let marker = self.store.ensure_marker(&fid)?;
            self.linker.link_into(&all, &fid, &marker)?;
            remove_file_if_present(&entry.path())?;
            stats.links_consolidated += 1;
        }

        if clean && remove_dir_if_present(shard_dir)? {
            stats.shards_removed += 1;
        }
        Ok(clean)
    }
}

//! Window state and the per-tick epoch advance.
//!
//! [`EpochState`] is the only shared mutable state in the daemon. The consumer
//! reads the active window path from it on every touch; [`EpochAdvancer`] is
//! its only writer. Window directories age `active -> secondary -> inactive`
//! by whole-directory renames, so every link inside a window changes tier in
//! one step. A window whose target already exists, left behind by an earlier
//! run, is merged into it link by link instead.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::fid::{parse_shard_name, Fid};
use crate::layout::{HistoryLayout, Tier};
use crate::store::{find_or_link, find_or_mkdir, remove_dir_if_present, remove_file_if_present};
use crate::window::{clamp_interval, Window};

#[derive(Debug, Default)]
struct EpochInner {
    window: Option<Window>,
    active_dir: Option<PathBuf>,
}

/// Current window descriptor, guarded by a mutex.
#[derive(Debug)]
pub struct EpochState {
    interval_secs: u64,
    inner: Mutex<EpochInner>,
}

impl EpochState {
    /// `interval` is clamped to the supported range.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_secs: clamp_interval(interval).as_secs(),
            inner: Mutex::new(EpochInner::default()),
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    fn lock(&self) -> Result<MutexGuard<'_, EpochInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Poisoned("epoch state lock poisoned"))
    }

    /// Snapshot of the current window and its active directory.
    pub fn current(&self) -> Result<Option<(Window, PathBuf)>> {
        let guard = self.lock()?;
        Ok(match (&guard.window, &guard.active_dir) {
            (Some(window), Some(dir)) => Some((*window, dir.clone())),
            _ => None,
        })
    }

    /// Runs `f` with the active window directory while holding the lock.
    ///
    /// The advancer cannot demote the window until `f` returns, so whatever
    /// `f` links lands in exactly one window.
    pub fn with_active<R>(&self, f: impl FnOnce(&Path) -> Result<R>) -> Result<R> {
        let guard = self.lock()?;
        let dir = guard.active_dir.as_deref().ok_or(Error::NoActiveWindow)?;
        f(dir)
    }
}

/// Outcome of one [`EpochAdvancer::advance`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    /// The window became current during this call.
    pub opened: Option<Window>,
    pub to_secondary: Vec<Window>,
    pub to_inactive: Vec<Window>,
    /// Moves whose target window already existed and was merged into.
    pub merged: usize,
    /// Entries left in place because their name or type was unexpected.
    pub skipped: usize,
}

impl AdvanceReport {
    pub fn rolled(&self) -> bool {
        self.opened.is_some()
    }
}

/// Recomputes the window on every tick and ages window directories.
#[derive(Debug, Clone)]
pub struct EpochAdvancer {
    layout: HistoryLayout,
    state: Arc<EpochState>,
}

impl EpochAdvancer {
    /// Shares `state` with every consumer that touches through it.
    pub fn new(layout: HistoryLayout, state: Arc<EpochState>) -> Self {
        Self { layout, state }
    }

    pub fn state(&self) -> &Arc<EpochState> {
        &self.state
    }

    /// Advances to the window containing `now_secs`.
    ///
    /// No-op while the window is unchanged. Otherwise, under the state lock:
    /// degrade `secondary`, degrade `active`, create the new active window,
    /// publish it. A failure leaves the published window untouched so the
    /// next tick retries.
    pub fn advance(&self, now_secs: u64) -> Result<AdvanceReport> {
        let interval = self.state.interval_secs;
        let window = Window::containing(now_secs, interval);
        let mut report = AdvanceReport::default();

        let mut guard = self.state.lock()?;
        if let Some(current) = guard.window {
            if current.start == window.start {
                return Ok(report);
            }
            if window.start < current.start {
                warn!(
                    "clock moved backwards: window {} precedes current {}, keeping current",
                    window, current
                );
                return Ok(report);
            }
        }

        self.degrade(Tier::Secondary, window.start, &mut report)?;
        self.degrade(Tier::Active, window.start, &mut report)?;

        let active_dir = self.layout.window_dir(Tier::Active, &window);
        find_or_mkdir(&self.layout.tier_dir(Tier::Active))?;
        find_or_mkdir(&active_dir)?;
        guard.window = Some(window);
        guard.active_dir = Some(active_dir);
        drop(guard);

        info!(
            "opened window {} (to secondary: {}, to inactive: {}, merged: {}, skipped: {})",
            window,
            report.to_secondary.len(),
            report.to_inactive.len(),
            report.merged,
            report.skipped
        );
        report.opened = Some(window);
        Ok(report)
    }

    /// Ages every window under `tier` relative to `new_start`.
    ///
    /// Malformed entries are logged and counted, never fatal. I/O errors on a
    /// rename abort the pass.
    pub fn degrade(&self, tier: Tier, new_start: u64, report: &mut AdvanceReport) -> Result<()> {
        let interval = self.state.interval_secs;
        let tier_dir = self.layout.tier_dir(tier);
        let entries = match fs::read_dir(&tier_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(Error::Io(err)),
        };

        let mut windows = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let window = match name.to_str().map(str::parse::<Window>) {
                Some(Ok(window)) => window,
                _ => {
                    warn!("skipping unrecognized entry {} in {}", name.to_string_lossy(), tier);
                    report.skipped += 1;
                    continue;
                }
            };
            if !entry.file_type()?.is_dir() {
                warn!("skipping non-directory window {} in {}", window, tier);
                report.skipped += 1;
                continue;
            }
            windows.push(window);
        }
        windows.sort_unstable();

        for window in windows {
            if window.end <= new_start.saturating_sub(interval) {
                if self.move_window(tier, Tier::Inactive, &window, report)? {
                    report.to_inactive.push(window);
                }
            } else if window.end <= new_start {
                match tier {
                    Tier::Active => {
                        if self.move_window(tier, Tier::Secondary, &window, report)? {
                            report.to_secondary.push(window);
                        }
                    }
                    _ => debug!("window {} already in {}", window, tier),
                }
            } else if tier == Tier::Secondary {
                warn!(
                    "window {} in {} is not older than new window start {}",
                    window, tier, new_start
                );
            }
        }
        Ok(())
    }

    fn move_window(
        &self,
        from: Tier,
        to: Tier,
        window: &Window,
        report: &mut AdvanceReport,
    ) -> Result<bool> {
        let source = self.layout.window_dir(from, window);
        let target = self.layout.window_dir(to, window);
        find_or_mkdir(&self.layout.tier_dir(to))?;
        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() => {
                let left = merge_window(&source, &target)?;
                if left > 0 {
                    error!(
                        "window {} only partly merged from {} into {}: {} entries left in {}",
                        window,
                        from,
                        to,
                        left,
                        source.display()
                    );
                    report.skipped += left;
                    return Ok(false);
                }
                info!("merged window {} from {} into existing {}", window, from, to);
                report.merged += 1;
                return Ok(true);
            }
            Ok(_) => {
                error!(
                    "cannot move window {} from {} to {}: {} is not a directory",
                    window,
                    from,
                    to,
                    target.display()
                );
                report.skipped += 1;
                return Ok(false);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(Error::Io(err)),
        }
        fs::rename(&source, &target)?;
        info!("moved window {} from {} to {}", window, from, to);
        Ok(true)
    }
}

/// Re-links every `<shard>/<fid>` of `source` into `target`, then removes
/// what was emptied. Returns the number of entries left behind because their
/// name or type was unexpected.
fn merge_window(source: &Path, target: &Path) -> Result<usize> {
    let mut left = 0;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_str().and_then(parse_shard_name).is_none() || !entry.file_type()?.is_dir() {
            warn!("leaving unrecognized entry {} in place", entry.path().display());
            left += 1;
            continue;
        }
        let target_shard = target.join(&name);
        find_or_mkdir(&target_shard)?;

        let mut shard_left = 0;
        for link in fs::read_dir(entry.path())? {
            let link = link?;
            let link_name = link.file_name();
            let is_fid = link_name
                .to_str()
                .map_or(false, |name| name.parse::<Fid>().is_ok());
            if !is_fid || !link.file_type()?.is_file() {
                warn!("leaving unrecognized link {} in place", link.path().display());
                shard_left += 1;
                continue;
            }
            find_or_link(&link.path(), &target_shard.join(&link_name))?;
            remove_file_if_present(&link.path())?;
        }
        if shard_left == 0 {
            remove_dir_if_present(&entry.path())?;
        }
        left += shard_left;
    }
    if left == 0 {
        remove_dir_if_present(source)?;
    }
    Ok(left)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn advancer(root: &Path, interval: u64) -> EpochAdvancer {
        let layout = HistoryLayout::new(root);
        for dir in layout.skeleton() {
            fs::create_dir_all(dir).unwrap();
        }
        EpochAdvancer::new(layout, Arc::new(EpochState::new(Duration::from_secs(interval))))
    }

    #[test]
    fn advance_opens_aligned_window() -> Result<()> {
        let dir = tempdir()?;
        let advancer = advancer(dir.path(), 10);

        let report = advancer.advance(1005)?;
        assert_eq!(report.opened, Some(Window::new(1000, 1010)));
        assert!(dir.path().join("active/1000-1010").is_dir());

        let (window, active) = advancer.state().current()?.unwrap();
        assert_eq!(window, Window::new(1000, 1010));
        assert_eq!(active, dir.path().join("active/1000-1010"));
        Ok(())
    }

    #[test]
    fn advance_within_window_is_noop() -> Result<()> {
        let dir = tempdir()?;
        let advancer = advancer(dir.path(), 10);
        advancer.advance(1000)?;
        let report = advancer.advance(1009)?;
        assert!(!report.rolled());
        Ok(())
    }

    #[test]
    fn rollover_moves_previous_window_to_secondary() -> Result<()> {
        let dir = tempdir()?;
        let advancer = advancer(dir.path(), 10);
        advancer.advance(1000)?;

        let report = advancer.advance(1010)?;
        assert_eq!(report.to_secondary, vec![Window::new(1000, 1010)]);
        assert!(dir.path().join("secondary/1000-1010").is_dir());
        assert!(dir.path().join("active/1010-1020").is_dir());
        assert!(!dir.path().join("active/1000-1010").exists());

        let report = advancer.advance(1020)?;
        assert_eq!(report.to_inactive, vec![Window::new(1000, 1010)]);
        assert_eq!(report.to_secondary, vec![Window::new(1010, 1020)]);
        assert!(dir.path().join("inactive/1000-1010").is_dir());
        Ok(())
    }

    #[test]
    fn secondary_window_merges_into_existing_inactive() -> Result<()> {
        let dir = tempdir()?;
        let advancer = advancer(dir.path(), 10);
        let fid = Fid::new(1, 0x2a, 0);
        let name = fid.to_string();
        for tier in ["secondary", "inactive"] {
            let shard = dir.path().join(tier).join("1000-1010/002a");
            fs::create_dir_all(&shard)?;
            fs::write(shard.join(&name), b"")?;
        }
        fs::write(dir.path().join("secondary/1000-1010/002a/notes"), b"")?;

        let report = advancer.advance(1025)?;
        assert_eq!(report.skipped, 1);
        assert!(report.to_inactive.is_empty());
        assert!(dir.path().join("secondary/1000-1010/002a/notes").is_file());
        assert!(!dir.path().join("secondary/1000-1010/002a").join(&name).exists());

        fs::remove_file(dir.path().join("secondary/1000-1010/002a/notes"))?;
        let report = advancer.advance(1035)?;
        assert_eq!(report.merged, 1);
        assert_eq!(report.to_inactive, vec![Window::new(1000, 1010)]);
        assert!(!dir.path().join("secondary/1000-1010").exists());
        assert!(dir.path().join("inactive/1000-1010/002a").join(&name).is_file());
        Ok(())
    }

    #[test]
    fn clock_going_backwards_keeps_current_window() -> Result<()> {
        let dir = tempdir()?;
        let advancer = advancer(dir.path(), 10);
        advancer.advance(1000)?;
        let report = advancer.advance(900)?;
        assert!(!report.rolled());
        assert_eq!(advancer.state().current()?.unwrap().0, Window::new(1000, 1010));
        Ok(())
    }

    #[test]
    fn touch_requires_open_window() {
        let state = EpochState::new(Duration::from_secs(10));
        let err = state.with_active(|_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::NoActiveWindow));
    }

    #[test]
    fn interval_is_clamped() {
        assert_eq!(EpochState::new(Duration::from_secs(1)).interval_secs(), 10);
    }
}

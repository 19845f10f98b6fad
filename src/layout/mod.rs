//! Directory layout of the access history.
//!
//! ```text
//! <root>/fids/<shard>/<fid>                      markers
//! <root>/active/<start>-<end>/<shard>/<fid>      current window
//! <root>/secondary/<start>-<end>/<shard>/<fid>   previous window
//! <root>/inactive/<start>-<end>/<shard>/<fid>    aged, not yet consolidated
//! <root>/inactive/all/<shard>/<fid>              consolidated index
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fid::Fid;
use crate::window::Window;

pub const FIDS_DIR: &str = "fids";
pub const ACTIVE_DIR: &str = "active";
pub const SECONDARY_DIR: &str = "secondary";
pub const INACTIVE_DIR: &str = "inactive";
pub const INACTIVE_ALL_DIR: &str = "all";

/// Tiers, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Inactive,
    Secondary,
    Active,
}

impl Tier {
    pub fn dir_name(self) -> &'static str {
        match self {
            Tier::Inactive => INACTIVE_DIR,
            Tier::Secondary => SECONDARY_DIR,
            Tier::Active => ACTIVE_DIR,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone)]
pub struct HistoryLayout {
    root: PathBuf,
}

impl HistoryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fids_dir(&self) -> PathBuf {
        self.root.join(FIDS_DIR)
    }

    pub fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.root.join(tier.dir_name())
    }

    pub fn window_dir(&self, tier: Tier, window: &Window) -> PathBuf {
        self.tier_dir(tier).join(window.name())
    }

    pub fn inactive_all_dir(&self) -> PathBuf {
        self.tier_dir(Tier::Inactive).join(INACTIVE_ALL_DIR)
    }

    /// Every directory that must exist before the daemon starts.
    pub fn skeleton(&self) -> [PathBuf; 5] {
        [
            self.fids_dir(),
            self.tier_dir(Tier::Active),
            self.tier_dir(Tier::Secondary),
            self.tier_dir(Tier::Inactive),
            self.inactive_all_dir(),
        ]
    }
}

/// `<root>/<shard>`.
pub fn shard_dir(root: &Path, fid: &Fid) -> PathBuf {
    root.join(fid.shard_name())
}

/// `<root>/<shard>/<fid>`.
pub fn fid_path(root: &Path, fid: &Fid) -> PathBuf {
    shard_dir(root, fid).join(fid.to_string())
}

/// Rejects values that cannot be used as a single path component.
pub fn validate_component(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Config(format!("empty {field}")));
    }
    if value == "." || value == ".." || value.contains('/') || value.contains('\\') || value.contains('\0') {
        return Err(Error::Config(format!("invalid {field}: {value:?}")));
    }
    Ok(())
}

//! Hard-link copies of markers inside tier directories.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fid::Fid;
use crate::layout::{fid_path, shard_dir};
use crate::store::{find_or_link, find_or_mkdir};

/// Places `<tier_root>/<shard>/<fid>` links to markers.
///
/// `tier_root` is either a window directory (`active/<start>-<end>`) or the
/// consolidated index (`inactive/all`). Both share the shard scheme of
/// [`crate::store::ObjectStore`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TierLinker;

impl TierLinker {
    pub fn new() -> Self {
        TierLinker
    }

    /// Finds or creates the link of `fid` under `tier_root`, pointing at
    /// `marker`. Returns the link path.
    pub fn link_into(&self, tier_root: &Path, fid: &Fid, marker: &Path) -> Result<PathBuf> {
        find_or_mkdir(tier_root)?;
        find_or_mkdir(&shard_dir(tier_root, fid))?;
        let link = fid_path(tier_root, fid);
        find_or_link(marker, &link)?;
        Ok(link)
    }
}

//! Filesystem-resident access history aged by epoch.
//!
//! Change-log records are turned into hard links under
//! `active/<start>-<end>/<shard>/<fid>`, each pointing at the object's marker
//! in `fids/`. Once per tick window directories are renamed down through
//! `secondary/` into `inactive/`, where they are folded into the flat
//! `inactive/all/` index.

pub mod changelog;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod daemon;
pub mod epoch;
pub mod error;
pub mod fid;
pub mod layout;
pub mod linker;
pub mod reclaim;
pub mod signal;
pub mod store;
pub mod wait;
pub mod window;
pub mod worker;

pub use changelog::{
    ChangelogRecord, ChangelogSession, ChangelogSource, JsonlChangelog, Received, RecordKind,
    StreamFlags,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigFile};
pub use consumer::{ChangeConsumer, ConsumerConfig, ConsumerStats, Step};
pub use daemon::Daemon;
pub use epoch::{AdvanceReport, EpochAdvancer, EpochState};
pub use error::{Error, Result};
pub use fid::Fid;
pub use layout::{HistoryLayout, Tier};
pub use linker::TierLinker;
pub use reclaim::{InactiveReclaimer, ReclaimStats};
pub use store::ObjectStore;
pub use wait::StopToken;
pub use window::Window;
pub use worker::Worker;

//! Change-log records and the stream they arrive on.
//!
//! A [`ChangelogSource`] opens per-device [`ChangelogSession`]s and clears
//! processed records on behalf of a named consumer. Receiving is blocking and
//! reports its outcome as a [`Received`] value instead of overloading error
//! codes.

pub mod jsonl;

use std::fmt;
use std::io;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fid::Fid;

pub use jsonl::JsonlChangelog;

/// Record flag marking an extended rename record carrying a source FID.
pub const RECORD_FLAG_RENAME: u16 = 0x2000;

/// Operation recorded by a change-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Mark,
    Create,
    Mkdir,
    Hardlink,
    Softlink,
    Mknod,
    Unlink,
    Rmdir,
    Rename,
    Ext,
    Open,
    Close,
    Layout,
    Trunc,
    Setattr,
    Xattr,
    Hsm,
    Mtime,
    Ctime,
    Atime,
    Migrate,
    Flrw,
    Resync,
    Gxattr,
    DnOpen,
}

/// One change-log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogRecord {
    /// Monotonically increasing position in the stream.
    pub index: u64,
    pub kind: RecordKind,
    #[serde(default)]
    pub flags: u16,
    pub target: Fid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_source: Option<Fid>,
}

impl ChangelogRecord {
    pub fn new(index: u64, kind: RecordKind, target: Fid) -> Self {
        Self {
            index,
            kind,
            flags: 0,
            target,
            rename_source: None,
        }
    }

    /// An extended rename record, as emitted for renames whose target FID
    /// is not populated.
    pub fn rename(index: u64, target: Fid, source: Fid) -> Self {
        Self {
            index,
            kind: RecordKind::Rename,
            flags: RECORD_FLAG_RENAME,
            target,
            rename_source: Some(source),
        }
    }

    pub fn is_extended_rename(&self) -> bool {
        self.kind == RecordKind::Rename && self.flags & RECORD_FLAG_RENAME != 0
    }
}

/// Session flags requested when opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamFlags(u32);

impl StreamFlags {
    pub const BLOCK: StreamFlags = StreamFlags(0x01);
    pub const JOBID: StreamFlags = StreamFlags(0x02);
    pub const EXTRA_FLAGS: StreamFlags = StreamFlags(0x04);
    pub const UIDGID: StreamFlags = StreamFlags(0x10);
    pub const NID: StreamFlags = StreamFlags(0x20);
    pub const OMODE: StreamFlags = StreamFlags(0x40);
    pub const XATTR: StreamFlags = StreamFlags(0x80);

    const ALL: u32 = 0xF7;

    /// Flags the consumer opens every session with.
    pub fn consumer_default() -> Self {
        Self::BLOCK
            | Self::JOBID
            | Self::EXTRA_FLAGS
            | Self::UIDGID
            | Self::NID
            | Self::OMODE
            | Self::XATTR
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ALL != 0 {
            return None;
        }
        Some(StreamFlags(bits))
    }

    pub fn contains(self, other: StreamFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for StreamFlags {
    type Output = StreamFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        StreamFlags(self.0 | rhs.0)
    }
}

/// Outcome of one blocking receive.
#[derive(Debug)]
pub enum Received {
    Record(ChangelogRecord),
    /// Nothing more to read right now.
    EndOfStream,
    /// Interrupted; retry on the same session.
    Retryable(io::Error),
    /// The session is no longer usable; reopen it.
    NeedsRestart(io::Error),
    Fatal(Error),
}

impl fmt::Display for Received {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Received::Record(record) => write!(f, "record {}", record.index),
            Received::EndOfStream => write!(f, "end of stream"),
            Received::Retryable(err) => write!(f, "retryable: {err}"),
            Received::NeedsRestart(err) => write!(f, "needs restart: {err}"),
            Received::Fatal(err) => write!(f, "fatal: {err}"),
        }
    }
}

/// Maps an OS-level receive failure onto [`Received`].
///
/// `EINVAL` (filesystem unmounted) and `EPROTO` (transport error) invalidate
/// the session; `EINTR` is retried in place; anything else is fatal.
pub fn classify_receive_error(err: io::Error) -> Received {
    match err.raw_os_error() {
        Some(libc::EINVAL) | Some(libc::EPROTO) => Received::NeedsRestart(err),
        Some(libc::EINTR) => Received::Retryable(err),
        _ if err.kind() == io::ErrorKind::Interrupted => Received::Retryable(err),
        _ => Received::Fatal(Error::Io(err)),
    }
}

/// An open read session on one device's change log. Closed on drop.
pub trait ChangelogSession: Send {
    fn set_options(&mut self, flags: StreamFlags) -> Result<()>;

    /// Blocks until a record, end of stream, or an error.
    fn receive(&mut self) -> Received;
}

/// Opens sessions and clears processed records.
pub trait ChangelogSource: Send + Sync + 'static {
    type Session: ChangelogSession;

    fn open(&self, device: &str) -> Result<Self::Session>;

    /// Tells the source that every record up to `index` has been durably
    /// processed by `consumer`.
    fn acknowledge(&self, device: &str, consumer: &str, index: u64) -> Result<()>;
}

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt layout: {} is not a {expected}", path.display())]
    Corrupt {
        path: PathBuf,
        expected: &'static str,
    },
    #[error("cannot find usable fid in record {index}")]
    NoUsableFid { index: u64 },
    #[error("change stream failure: {0}")]
    Stream(String),
    #[error("failed to clear record {index}: {source}")]
    Acknowledge {
        index: u64,
        #[source]
        source: Box<Error>,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid fid: {0}")]
    InvalidFid(String),
    #[error("invalid window name: {0}")]
    InvalidWindow(String),
    #[error("no active window has been opened yet")]
    NoActiveWindow,
    #[error("worker {0} panicked")]
    WorkerPanicked(String),
    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl Error {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, expected: &'static str) -> Self {
        Error::Corrupt {
            path: path.into(),
            expected,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Turns change-log records into touches of the current window.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::changelog::{ChangelogRecord, ChangelogSession, ChangelogSource, Received, StreamFlags};
use crate::epoch::EpochState;
use crate::error::{Error, Result};
use crate::fid::Fid;
use crate::linker::TierLinker;
use crate::store::ObjectStore;
use crate::wait::StopToken;

pub const END_OF_STREAM_BACKOFF: Duration = Duration::from_secs(3);
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Device whose change log is consumed.
    pub device: String,
    /// Identity the records are cleared as.
    pub consumer: String,
    /// Options requested on every session.
    pub flags: StreamFlags,
    /// Pause between closing an exhausted session and opening the next.
    pub end_of_stream_backoff: Duration,
    /// Pause before retrying an interrupted receive or reopening a lost
    /// session.
    pub retry_backoff: Duration,
}

impl ConsumerConfig {
    pub fn new(device: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            consumer: consumer.into(),
            flags: StreamFlags::consumer_default(),
            end_of_stream_backoff: END_OF_STREAM_BACKOFF,
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

/// Counters kept across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Records touched and cleared.
    pub records: u64,
    /// Sessions that ran out of records and were closed.
    pub end_of_stream: u64,
    /// Interrupted receives retried on the same session.
    pub retries: u64,
    /// Sessions reopened after being invalidated.
    pub restarts: u64,
}

/// Result of one receive on an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Handled,
    /// The session is exhausted; the caller closes it and opens a new one.
    EndOfStream,
    Retry,
    Restart,
}

/// The object a record refers to.
///
/// Extended rename records may leave the target unset; their source FID is
/// used instead. A record with no usable FID is an error.
pub fn resolve_fid(record: &ChangelogRecord) -> Result<Fid> {
    if record.target.is_zero() && record.is_extended_rename() {
        return match record.rename_source {
            Some(source) if !source.is_zero() => Ok(source),
            _ => Err(Error::NoUsableFid {
                index: record.index,
            }),
        };
    }
    Ok(record.target)
}

pub struct ChangeConsumer<S: ChangelogSource> {
    source: S,
    store: ObjectStore,
    linker: TierLinker,
    epoch: Arc<EpochState>,
    config: ConsumerConfig,
    stats: ConsumerStats,
}

impl<S: ChangelogSource> ChangeConsumer<S> {
    /// Touches go into the window published through `epoch`; no session is
    /// opened until `poll_once` or `run`.
    pub fn new(
        source: S,
        store: ObjectStore,
        linker: TierLinker,
        epoch: Arc<EpochState>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            source,
            store,
            linker,
            epoch,
            config,
            stats: ConsumerStats::default(),
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConsumerConfig {
        &mut self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Records that `fid` was referenced in the current window.
    ///
    /// The marker is found or created first; the link into the active window
    /// is made while holding the epoch lock so a concurrent rollover cannot
    /// split the touch across two windows.
    pub fn touch(&self, fid: &Fid) -> Result<PathBuf> {
        let marker = self.store.ensure_marker(fid)?;
        self.epoch
            .with_active(|active| self.linker.link_into(active, fid, &marker))
    }

    /// Touches the record's object, then clears the record upstream.
    pub fn handle_record(&mut self, record: &ChangelogRecord) -> Result<()> {
        let fid = resolve_fid(record)?;
        debug!("handling fid {} from record {}", fid, record.index);
        self.touch(&fid)?;
        self.source
            .acknowledge(&self.config.device, &self.config.consumer, record.index)
            .map_err(|err| Error::Acknowledge {
                index: record.index,
                source: Box::new(err),
            })?;
        self.stats.records += 1;
        Ok(())
    }

    /// Opens a session with the configured flags.
    pub fn open_session(&self) -> Result<S::Session> {
        let mut session = self.source.open(&self.config.device)?;
        session.set_options(self.config.flags)?;
        debug!("opened change log of {}", self.config.device);
        Ok(session)
    }

    /// Receives and handles at most one record.
    pub fn poll_once(&mut self, session: &mut S::Session) -> Result<Step> {
        match session.receive() {
            Received::Record(record) => {
                self.handle_record(&record)?;
                Ok(Step::Handled)
            }
            Received::EndOfStream => {
                self.stats.end_of_stream += 1;
                Ok(Step::EndOfStream)
            }
            Received::Retryable(err) => {
                warn!("temporary failure reading change log: {err}");
                self.stats.retries += 1;
                Ok(Step::Retry)
            }
            Received::NeedsRestart(err) => {
                warn!("change log session of {} lost: {err}", self.config.device);
                self.stats.restarts += 1;
                Ok(Step::Restart)
            }
            Received::Fatal(err) => {
                error!("failed to read change log of {}: {err}", self.config.device);
                Err(err)
            }
        }
    }

    /// Consumes until `stop` is requested or a fatal error occurs.
    pub fn run(&mut self, stop: &StopToken) -> Result<()> {
        'session: while !stop.is_stopped() {
            let mut session = self.open_session()?;
            while !stop.is_stopped() {
                match self.poll_once(&mut session)? {
                    Step::Handled => {}
                    Step::EndOfStream => {
                        // A session only delivers what was logged before it
                        // hit the end; new records need a fresh session.
                        drop(session);
                        debug!(
                            "no record to handle, reopening in {:?}",
                            self.config.end_of_stream_backoff
                        );
                        stop.wait(self.config.end_of_stream_backoff);
                        continue 'session;
                    }
                    Step::Retry => {
                        stop.wait(self.config.retry_backoff);
                    }
                    Step::Restart => {
                        drop(session);
                        stop.wait(self.config.retry_backoff);
                        continue 'session;
                    }
                }
            }
        }
        info!(
            "change consumer stopped after {} records ({} restarts)",
            self.stats.records, self.stats.restarts
        );
        Ok(())
    }
}

//! Startup, supervision and shutdown of the access-history workers.
//!
//! The supervisor thread owns the [`EpochAdvancer`] and drives it once per
//! tick. The consumer and the reclaimer each run on a dedicated [`Worker`].
//! A worker that stops without being asked brings the whole daemon down.

use std::sync::Arc;

use log::{error, info, warn};

use crate::changelog::ChangelogSource;
use crate::clock::Clock;
use crate::config::Config;
use crate::consumer::{ChangeConsumer, ConsumerConfig};
use crate::epoch::{AdvanceReport, EpochAdvancer, EpochState};
use crate::error::{Error, Result};
use crate::layout::HistoryLayout;
use crate::linker::TierLinker;
use crate::reclaim::{InactiveReclaimer, ReclaimStats};
use crate::store::{find_or_mkdir, ObjectStore};
use crate::wait::StopToken;
use crate::worker::Worker;

pub const CONSUMER_WORKER: &str = "changelog-consumer";
pub const RECLAIM_WORKER: &str = "inactive-reclaimer";

/// Owns the shared epoch, the advancer, the reclaimer and the consumer; `run`
/// moves the consumer and reclaimer onto worker threads.
pub struct Daemon<S: ChangelogSource, C: Clock> {
    config: Config,
    layout: HistoryLayout,
    epoch: Arc<EpochState>,
    advancer: EpochAdvancer,
    reclaimer: Arc<InactiveReclaimer>,
    consumer: ChangeConsumer<S>,
    clock: C,
}

impl<S: ChangelogSource, C: Clock> Daemon<S, C> {
    /// Builds the daemon context and creates the directory skeleton under
    /// `config.base_dir`.
    pub fn new(config: Config, source: S, clock: C) -> Result<Self> {
        let layout = HistoryLayout::new(&config.base_dir);
        for dir in layout.skeleton() {
            find_or_mkdir(&dir)?;
        }

        let store = ObjectStore::new(layout.fids_dir());
        let linker = TierLinker::new();
        let epoch = Arc::new(EpochState::new(config.interval));
        let advancer = EpochAdvancer::new(layout.clone(), Arc::clone(&epoch));
        let reclaimer = Arc::new(InactiveReclaimer::new(layout.clone(), store.clone(), linker));
        let consumer = ChangeConsumer::new(
            source,
            store,
            linker,
            Arc::clone(&epoch),
            ConsumerConfig::new(config.device.clone(), config.consumer.clone()),
        );

        Ok(Self {
            config,
            layout,
            epoch,
            advancer,
            reclaimer,
            consumer,
            clock,
        })
    }

    /// Replaces the consumer settings derived from the configuration.
    pub fn with_consumer_config(mut self, consumer: ConsumerConfig) -> Self {
        *self.consumer.config_mut() = consumer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &HistoryLayout {
        &self.layout
    }

    pub fn epoch(&self) -> &Arc<EpochState> {
        &self.epoch
    }

    pub fn consumer(&self) -> &ChangeConsumer<S> {
        &self.consumer
    }

    /// Opens the window for the current time. Must succeed before any
    /// record is consumed.
    pub fn prepare(&self) -> Result<AdvanceReport> {
        self.advancer.advance(self.clock.now_secs())
    }

    /// One supervisor tick without the workers: advance, then reclaim.
    pub fn run_once(&self) -> Result<(AdvanceReport, ReclaimStats)> {
        let report = self.prepare()?;
        let stats = self.reclaimer.run_once()?;
        Ok((report, stats))
    }

    /// Runs until `stop` is set, `external_stop` returns `true` or a worker
    /// stops on its own.
    ///
    /// Returns the first worker failure, if any, after every worker has been
    /// joined.
    pub fn run(self, stop: &StopToken, external_stop: impl Fn() -> bool) -> Result<()> {
        let Self {
            config,
            advancer,
            reclaimer,
            mut consumer,
            clock,
            ..
        } = self;

        advancer.advance(clock.now_secs())?;

        let consumer_worker = Worker::spawn(CONSUMER_WORKER, move |stop| consumer.run(stop))?;
        let reclaim_worker = {
            let reclaimer = Arc::clone(&reclaimer);
            let tick = config.tick;
            Worker::spawn(RECLAIM_WORKER, move |stop| {
                loop {
                    if let Err(err) = reclaimer.run_once() {
                        error!("inactive reclaim pass failed: {err}");
                    }
                    if stop.wait(tick) {
                        return Ok(());
                    }
                }
            })?
        };
        let workers = [consumer_worker, reclaim_worker];
        info!(
            "access history daemon running on {} (device {}, consumer {})",
            config.base_dir.display(),
            config.device,
            config.consumer
        );

        loop {
            if stop.is_stopped() || external_stop() {
                info!("stop requested, shutting down");
                break;
            }
            if let Some(worker) = workers.iter().find(|worker| worker.stopped_unexpectedly()) {
                error!("worker {} stopped, shutting down", worker.name());
                break;
            }

            if let Err(err) = advancer.advance(clock.now_secs()) {
                error!("epoch advance failed, retrying next tick: {err}");
            }
            if let Err(err) = reclaimer.run_once() {
                warn!("inactive reclaim pass failed: {err}");
            }

            if stop.wait(config.tick) {
                info!("stop requested, shutting down");
                break;
            }
        }

        for worker in &workers {
            worker.request_stop();
        }
        let mut first_failure: Option<Error> = None;
        for worker in workers {
            let name = worker.name().to_string();
            if let Err(err) = worker.join() {
                error!("worker {name} failed: {err}");
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => {
                info!("access history daemon stopped");
                Ok(())
            }
        }
    }
}

//! Background worker threads with cooperative shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info};

use crate::error::{Error, Result};
use crate::wait::StopToken;

#[derive(Debug, Default)]
struct WorkerFlags {
    started: AtomicBool,
    stopped: AtomicBool,
}

/// Handle to a named worker thread.
///
/// The worker function receives its own [`StopToken`]; the handle sets it on
/// [`Worker::request_stop`] and on drop.
pub struct Worker {
    name: String,
    stop: StopToken,
    flags: Arc<WorkerFlags>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Worker {
    pub fn spawn<F>(name: impl Into<String>, f: F) -> Result<Self>
    where
        F: FnOnce(&StopToken) -> Result<()> + Send + 'static,
    {
        let name = name.into();
        let stop = StopToken::new();
        let flags = Arc::new(WorkerFlags::default());

        let thread_stop = stop.clone();
        let thread_flags = Arc::clone(&flags);
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            thread_flags.started.store(true, Ordering::Release);
            let result = f(&thread_stop);
            match &result {
                Ok(()) => info!("worker {} exited", thread_name),
                Err(err) => error!("worker {} failed: {}", thread_name, err),
            }
            thread_flags.stopped.store(true, Ordering::Release);
            result
        })?;

        Ok(Self {
            name,
            stop,
            flags,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_started(&self) -> bool {
        self.flags.started.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.stopped.load(Ordering::Acquire)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Stopped without anyone asking it to.
    pub fn stopped_unexpectedly(&self) -> bool {
        self.is_stopped() && !self.stop_requested()
    }

    pub fn request_stop(&self) {
        self.stop.stop();
    }

    /// Requests stop and waits for the worker, returning its result.
    pub fn join(mut self) -> Result<()> {
        self.request_stop();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::WorkerPanicked(self.name.clone()))?,
            None => Ok(()),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

//! Stop requests from `SIGINT`, `SIGHUP` and `SIGTERM`.
//!
//! The handler only stores into atomics. It is installed with `SA_RESTART`
//! so in-flight filesystem calls are not interrupted.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::error::{Error, Result};

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn on_stop_signal(signum: libc::c_int) {
    LAST_SIGNAL.store(signum, Ordering::Relaxed);
    STOP_REQUESTED.store(true, Ordering::Release);
}

pub fn install_stop_handlers() -> Result<()> {
    for signum in [libc::SIGINT, libc::SIGHUP, libc::SIGTERM] {
        // SAFETY: the action is fully initialised and the handler is
        // async-signal-safe.
        let rc = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_stop_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signum, &action, std::ptr::null_mut())
        };
        if rc != 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
    }
    Ok(())
}

pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::Acquire)
}

/// Number of the last stop signal received, if any.
pub fn last_signal() -> Option<i32> {
    match LAST_SIGNAL.load(Ordering::Relaxed) {
        0 => None,
        signum => Some(signum),
    }
}

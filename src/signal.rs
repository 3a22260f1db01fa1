//! Shutdown signal handling (§4.7).
//!
//! Grounded on `tcp_server.cpp`'s `signal_normal_cb`/`sigaction` setup: the
//! handler itself does nothing but store into an atomic, deferring all real
//! work to the loop thread polling the flag between waits. `SIGTERM`,
//! `SIGINT` and `SIGQUIT` all map to the same flag.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared between the signal handler (async-signal-safe store only) and the
/// loop thread (polls it once per `wait_and_dispatch` cycle).
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

static FLAG: std::sync::OnceLock<ShutdownFlag> = std::sync::OnceLock::new();

extern "C" fn on_signal(_sig: libc::c_int) {
    if let Some(flag) = FLAG.get() {
        flag.set();
    }
}

/// Installs handlers for `SIGTERM`, `SIGINT` and `SIGQUIT` that set `flag`.
/// Safe to call once per process; later calls reuse the same flag storage
/// rather than installing a second handler.
pub fn install(flag: ShutdownFlag) -> io::Result<()> {
    let _ = FLAG.set(flag);

    for sig in [libc::SIGTERM, libc::SIGINT, libc::SIGQUIT] {
        let rc = unsafe { libc::signal(sig, on_signal as libc::sighandler_t) };
        if rc == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_clear_and_latches() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
    }
}

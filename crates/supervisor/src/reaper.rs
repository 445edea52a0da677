//! The reaper thread (§4.5, §5): marks this process a child subreaper so
//! descendants of the OCI runtime tool reparent here, masks SIGCHLD and
//! SIGUSR1 in every thread, then spins a dedicated thread on
//! `sigwaitinfo`-equivalent blocking waits. A SIGCHLD wakes it to run one
//! `Manager::reap_cycle`; a SIGUSR1 is the shutdown nudge, consulted
//! against `Manager::terminate` so a spurious delivery doesn't exit the
//! loop early.
//!
//! Grounded in `examples/original_source/daemon/lib/source/DobbyManager.cpp`'s
//! child-subreaper setup and signal-thread loop, and its
//! `pthread_kill(SIGUSR1)`-then-join shutdown sequence.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use nix::sys::pthread::pthread_kill;
use nix::sys::signal::{SigSet, Signal};

use crate::manager::Manager;

impl Manager {
    /// Installs the subreaper bit and spawns the sigwait loop thread.
    /// Must run before any other thread in the process is spawned: the
    /// blocked-signal mask set here is only inherited by threads created
    /// afterwards (§5 "Signal handlers ... are masked in all threads").
    pub fn start_reaper(self: &Arc<Self>) {
        unsafe {
            libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0);
        }

        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        mask.add(Signal::SIGUSR1);
        mask.thread_block().expect("failed to block SIGCHLD/SIGUSR1");

        let manager = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("dobby-reaper".into())
            .spawn(move || manager.reaper_loop(mask))
            .expect("failed to spawn reaper thread");

        use std::os::unix::thread::JoinHandleExt;
        let pthread_id = handle.as_pthread_t();
        *self.reaper_thread.lock().unwrap() = Some(pthread_id);
        // The loop thread outlives this call; it is signalled to exit via
        // `stop_reaper` rather than joined here, matching the source's
        // detached-thread shutdown (join happens, if at all, in `main`
        // after `stop_reaper` has set the terminate flag).
        drop(handle);
    }

    /// §4.5 "Termination at shutdown": sets the terminate flag and wakes
    /// the reaper thread out of its blocking wait with SIGUSR1.
    pub fn stop_reaper(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        if let Some(pthread_id) = *self.reaper_thread.lock().unwrap() {
            if let Err(e) = pthread_kill(pthread_id, Signal::SIGUSR1) {
                log::warn!("failed to signal reaper thread for shutdown: {e}");
            }
        }
    }

    fn reaper_loop(self: Arc<Self>, mask: SigSet) {
        loop {
            match mask.wait() {
                Ok(Signal::SIGCHLD) => self.reap_cycle(),
                Ok(Signal::SIGUSR1) => {
                    if self.terminate.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Ok(other) => {
                    log::warn!("reaper thread woke on unexpected signal {other:?}");
                }
                Err(e) => {
                    log::error!("sigwaitinfo failed: {e}");
                }
            }
        }
        log::info!("reaper thread exiting");
    }
}

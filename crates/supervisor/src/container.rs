//! The live container record (§3 `Container`, §4.5): everything a running
//! container needs across its whole lifetime, from allocation to final
//! reap. Owned exclusively by the manager's container table; nothing else
//! holds a reference to one (§9 "cyclic references through
//! `shared_from_this`" — this core's containers carry a `Descriptor` only,
//! never a back-pointer to the manager).

use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bundle::{Bundle, Rootfs};
use common::{ContainerId, ContainerInitPid, Descriptor, ExecPid};
use oci_config::ResolvedConfig;

/// Lifecycle states a container cycles through (§3, §4.5). There is no
/// explicit `Stopped` state: once the reaper finishes tearing a container
/// down it is erased from the table entirely.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    Starting,
    Running,
    Paused,
    Stopping,
}

/// Restart-on-crash bookkeeping (§3, §4.5): whether the policy is active,
/// the fds to hand back to `RuntimeDriver::create` on a restart, and the
/// 10-attempts/5-minute sliding window rate limit.
pub struct RestartPolicy {
    pub enabled: bool,
    pub fds: Vec<RawFd>,
    pub attempt_count: u32,
    pub last_attempt: Option<Instant>,
}

impl RestartPolicy {
    pub fn new(enabled: bool, fds: Vec<RawFd>) -> Self {
        Self {
            enabled,
            fds,
            attempt_count: 0,
            last_attempt: None,
        }
    }

    /// §4.5 step 3 / §8 invariant 8: restart if the policy is on and either
    /// the attempt count hasn't hit the cap or the last attempt was long
    /// enough ago to reset the window.
    pub fn should_restart(&mut self, exit_status: i32) -> bool {
        if !self.enabled || exit_status == 0 {
            return false;
        }
        const MAX_ATTEMPTS: u32 = 10;
        const WINDOW: std::time::Duration = std::time::Duration::from_secs(5 * 60);

        if let Some(last) = self.last_attempt {
            if last.elapsed() > WINDOW {
                self.attempt_count = 0;
            }
        }
        if self.attempt_count >= MAX_ATTEMPTS {
            return false;
        }
        self.attempt_count += 1;
        self.last_attempt = Some(Instant::now());
        true
    }
}

/// The live record for one container (§3). `bundle`/`rootfs` outlive every
/// restart; only the runtime-level state (pid, lifecycle, override path)
/// resets between a crash and its restart.
///
/// No plugin-manager handle lives here: the original's legacy plugin
/// manager is a single daemon-wide object (constructed once at startup,
/// shared by every container), which this core mirrors with
/// `Manager::legacy_plugins`; its per-container RDK plugin manager has no
/// counterpart here since `plugin::modern`'s three driven hook points are
/// stateless calls into the external launcher binary, not an object this
/// core constructs per container.
pub struct Container {
    pub descriptor: Descriptor,
    pub id: ContainerId,
    pub bundle: Bundle,
    pub rootfs: Rootfs,
    pub config: ResolvedConfig,
    pub state: LifecycleState,
    /// Set by `stop` when a caller asks to stop a container still
    /// `Starting`; `preStart` hooks consult this and fail, unwinding the
    /// start sequence cooperatively (§4.5 "Stop sequence").
    pub curse_of_death: AtomicBool,
    /// pid of the container's own init process (inside the namespaces),
    /// never the OCI tool's own pid.
    pub container_pid: Option<ContainerInitPid>,
    /// pids handed back by `exec`, reaped by the supervisor's reaper so
    /// they never become zombies; not the container's init pid (§4.5 "Exec
    /// in container").
    pub exec_pids: Vec<ExecPid>,
    pub override_path: Option<PathBuf>,
    pub restart: RestartPolicy,
}

impl Container {
    pub fn is_cursed(&self) -> bool {
        self.curse_of_death.load(Ordering::SeqCst)
    }

    pub fn curse(&self) {
        self.curse_of_death.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_policy_never_restarts() {
        let mut policy = RestartPolicy::new(false, Vec::new());
        assert!(!policy.should_restart(1));
    }

    #[test]
    fn clean_exit_never_restarts_even_when_enabled() {
        let mut policy = RestartPolicy::new(true, Vec::new());
        assert!(!policy.should_restart(0));
    }

    #[test]
    fn caps_at_ten_attempts_within_the_window() {
        let mut policy = RestartPolicy::new(true, Vec::new());
        for attempt in 1..=10 {
            assert!(policy.should_restart(1), "attempt {attempt} should be allowed");
        }
        assert!(!policy.should_restart(1), "11th attempt within the window must be refused");
        assert_eq!(policy.attempt_count, 10);
    }
}

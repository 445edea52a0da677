//! Namespace-entry helper (§4.6 `callInNamespace`), generalized from
//! `crates/network/src/cni/namespace.rs`'s `Namespace::run` (which spawns a
//! blocking tokio task and drives an async future inside the switched
//! namespace) to a plain OS thread: this core's concurrency model outside
//! the runtime driver's own timed calls is threads plus mutexes, not a
//! process-wide async runtime (§5), so `setns` happens on a one-shot
//! `std::thread::spawn` rather than `tokio::task::spawn_blocking`.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use common::{EngineError, Result};
use nix::sched::{setns, CloneFlags};

/// Runs `func` with the calling thread's mount/network/etc. namespace
/// switched to the one at `target_ns_path` for the duration of the call,
/// then switches back, matching `IDobbyUtils::callInNamespace`'s contract.
///
/// Namespace switches are per-thread in Linux, so this spawns `func` onto a
/// dedicated thread rather than running it on the caller's: switching the
/// caller's own namespace back afterwards would still leave every other
/// concurrently-running piece of code on that thread observing the target
/// namespace for the duration of the call.
pub fn call_in_namespace<F, T>(
    target_ns_path: impl AsRef<Path>,
    ns_flag: CloneFlags,
    func: F,
) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let target_ns_path = target_ns_path.as_ref().to_path_buf();

    let handle = std::thread::Builder::new()
        .name("dobby-ns-entry".into())
        .spawn(move || -> Result<T> {
            let current =
                File::open(current_thread_namespace_path(ns_flag)).map_err(EngineError::from)?;
            let target = File::open(&target_ns_path).map_err(EngineError::from)?;

            setns(target.as_raw_fd(), ns_flag).map_err(EngineError::from)?;
            let result = func();
            setns(current.as_raw_fd(), ns_flag).map_err(EngineError::from)?;

            Ok(result)
        })
        .map_err(EngineError::from)?;

    handle.join().map_err(|_| {
        EngineError::SystemFailure("namespace-entry thread panicked".into())
    })?
}

/// The saved-current-namespace fd must come from the same `/proc/.../ns/<type>`
/// entry as `ns_flag` names, or the restore `setns` at the end of the switch
/// rejects it with `EINVAL` (`setns(2)`: the fd's namespace type must match
/// the flag passed). Mirrors `IDobbyUtils::callInNamespace` deriving the path
/// from the namespace type it was asked to enter rather than hardcoding one.
fn current_thread_namespace_path(ns_flag: CloneFlags) -> &'static str {
    if ns_flag.contains(CloneFlags::CLONE_NEWNET) {
        "/proc/thread-self/ns/net"
    } else if ns_flag.contains(CloneFlags::CLONE_NEWNS) {
        "/proc/thread-self/ns/mnt"
    } else if ns_flag.contains(CloneFlags::CLONE_NEWPID) {
        "/proc/thread-self/ns/pid"
    } else if ns_flag.contains(CloneFlags::CLONE_NEWUTS) {
        "/proc/thread-self/ns/uts"
    } else if ns_flag.contains(CloneFlags::CLONE_NEWIPC) {
        "/proc/thread-self/ns/ipc"
    } else if ns_flag.contains(CloneFlags::CLONE_NEWUSER) {
        "/proc/thread-self/ns/user"
    } else if ns_flag.contains(CloneFlags::CLONE_NEWCGROUP) {
        "/proc/thread-self/ns/cgroup"
    } else {
        "/proc/thread-self/ns/net"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn runs_closure_and_returns_its_value() {
        // A regular file isn't a real namespace inode, so `setns` itself
        // fails; this only exercises the thread-spawn/open/join plumbing,
        // matching the teacher's own `new_failure_not_existing`-style test.
        let temp_file = NamedTempFile::new().unwrap();
        let result = call_in_namespace(temp_file.path(), CloneFlags::CLONE_NEWNET, || 7);
        assert!(result.is_err());
    }

    #[test]
    fn missing_namespace_path_is_reported_as_an_error() {
        let result = call_in_namespace("/path/does/not/exist", CloneFlags::CLONE_NEWNET, || 1);
        assert!(result.is_err());
    }

    #[test]
    fn current_thread_path_matches_the_requested_namespace_type() {
        assert_eq!(
            current_thread_namespace_path(CloneFlags::CLONE_NEWNET),
            "/proc/thread-self/ns/net"
        );
        assert_eq!(
            current_thread_namespace_path(CloneFlags::CLONE_NEWNS),
            "/proc/thread-self/ns/mnt"
        );
        assert_eq!(
            current_thread_namespace_path(CloneFlags::CLONE_NEWPID),
            "/proc/thread-self/ns/pid"
        );
    }
}

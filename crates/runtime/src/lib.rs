//! Fork/exec driver around the host's external OCI runtime tool (§4.4):
//! `run`, `create`, `start`, `kill`, `pause`, `resume`, `exec`, `destroy`,
//! `state`, `list`. Grounded in `src/oci/oci_runtime.rs`'s
//! `OCIRuntime`/`Subcommand`/`*Args` shape (kept and narrowed to the
//! subcommands §4.4 actually drives) and in the original's
//! `DobbyRunC.cpp` for the exact fork/exec contract this module's
//! `child_contract` helpers reproduce.
//!
//! Every public method is synchronous: the supervisor's concurrency model
//! is a single coarse-grained mutex held across whole lifecycle
//! operations (§5), not a task scheduler. `create()` is the one method
//! that genuinely needs a clock race (the 5.5s timeout), so it spins up a
//! dedicated current-thread `tokio` runtime for the duration of that one
//! call, the same idiom `plugin::modern::run_post_halt` uses for its own
//! 4s timeout.

pub mod args;
pub mod status;
pub mod stream;

use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt as StdCommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use common::{ContainerId, ContainerInitPid, EngineError, ExecPid, Result, RuntimeToolPid};
use log::{error, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid as NixPid;

pub use args::KillSignal;
pub use status::{parse_list_json, ContainerListItem, ContainerStatus};
pub use stream::StreamSink;

/// Wall-clock timeout bounding `create` (§4.4, §5): whichever of the
/// worker and a sibling sleeper exits first wins the race.
const CREATE_TIMEOUT: Duration = Duration::from_millis(5_500);
/// TERM-then-escalate-to-KILL compensation loop: 10 retries at ~50ms each
/// (§9 open-question resolution — the source's 500µs reads as a typo for
/// 500ms; 50ms keeps ten retries well under the 5.5s create timeout's
/// order of magnitude without dominating it).
const TERM_COMPENSATION_RETRIES: u32 = 10;
const TERM_COMPENSATION_DELAY: Duration = Duration::from_millis(50);
/// Maximum fds dup'd into a spawned child (§4.4).
pub const MAX_INHERITED_FDS: usize = 128;
/// In-container init wrapper always prepended to `exec`'s argv so signal
/// handling inside the namespaces is correct (§4.4).
const EXEC_INIT_WRAPPER: &str = "/usr/libexec/DobbyInit";

/// Location of the external OCI runtime binary and the root/log paths
/// passed to every invocation (§6 "OCI runtime tool").
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub binary: PathBuf,
    pub root: PathBuf,
    pub log_path: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("crun"),
            root: PathBuf::from("/var/run/rdk/crun"),
            log_path: PathBuf::from("/var/log/rdk/crun.log"),
        }
    }
}

/// Clears `O_CLOEXEC` on `fd` and `dup2`s it to `target`, both
/// async-signal-safe syscalls, safe to run in a post-fork `pre_exec` hook.
fn inherit_fd(fd: RawFd, target: RawFd) -> std::io::Result<()> {
    if fd != target && unsafe { libc::dup2(fd, target) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    let flags = unsafe { libc::fcntl(target, libc::F_GETFD) };
    if flags == -1 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(target, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// The post-fork, pre-exec body common to every spawned OCI-tool
/// invocation (§4.4): new session, cwd `/`, umask 0, SIGCHLD unblocked,
/// and the inherited-fd dance. Only async-signal-safe libc calls — no
/// allocation — since it runs between fork and exec in the child.
fn child_contract(fds: &[RawFd]) -> impl Fn() -> std::io::Result<()> + Send + 'static {
    let fds: Vec<RawFd> = fds.iter().copied().take(MAX_INHERITED_FDS).collect();
    move || {
        if unsafe { libc::setsid() } == -1 {
            return Err(std::io::Error::last_os_error());
        }
        if unsafe { libc::chdir(b"/\0".as_ptr() as *const libc::c_char) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        unsafe {
            libc::umask(0);
        }
        let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, libc::SIGCHLD);
            libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
        }
        for (i, fd) in fds.iter().enumerate() {
            inherit_fd(*fd, 3 + i as RawFd)?;
        }
        Ok(())
    }
}

/// Wires `stdin` to `/dev/null` and `stdout`/`stderr` to fresh duplicates
/// of `sink`'s write-side fd (§4.4).
fn wire_stdio(cmd: &mut std::process::Command, sink: &dyn StreamSink) -> Result<()> {
    cmd.stdin(Stdio::null());
    let out = sink.dup_write_fd(false)?;
    let err = sink.dup_write_fd(false)?;
    unsafe {
        cmd.stdout(Stdio::from_raw_fd(out));
        cmd.stderr(Stdio::from_raw_fd(err));
    }
    Ok(())
}

fn wire_stdio_tokio(cmd: &mut tokio::process::Command, sink: &dyn StreamSink) -> Result<()> {
    cmd.stdin(Stdio::null());
    let out = sink.dup_write_fd(false)?;
    let err = sink.dup_write_fd(false)?;
    unsafe {
        cmd.stdout(Stdio::from_raw_fd(out));
        cmd.stderr(Stdio::from_raw_fd(err));
    }
    Ok(())
}

fn read_pidfile(path: &Path) -> Result<i32> {
    let raw = std::fs::read_to_string(path).map_err(EngineError::from)?;
    raw.trim()
        .parse::<i32>()
        .map_err(|e| EngineError::RuntimeFailure(format!("pidfile {}: {e}", path.display())))
}

/// Wraps an external OCI runtime binary (runc/crun-equivalent), driving it
/// through the subset of its CLI this core uses.
pub struct RuntimeDriver {
    cfg: RuntimeConfig,
}

impl RuntimeDriver {
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self { cfg }
    }

    fn base_cmd(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.cfg.binary);
        cmd.arg("--root").arg(&self.cfg.root);
        cmd.arg("--log").arg(&self.cfg.log_path);
        cmd
    }

    fn base_cmd_tokio(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.cfg.binary);
        cmd.arg("--root").arg(&self.cfg.root);
        cmd.arg("--log").arg(&self.cfg.log_path);
        cmd
    }

    /// `run(id, bundle, console, fds) → pid` (§4.4): synchronously forks
    /// the tool with `run --bundle <dir> <id>` and returns its pid without
    /// waiting for it to exit — this core's reaper thread, not this
    /// driver, owns reaping the reparented container-init pid.
    pub fn run(
        &self,
        id: &ContainerId,
        bundle: &Path,
        console: &dyn StreamSink,
        fds: &[RawFd],
    ) -> Result<RuntimeToolPid> {
        let mut cmd = self.base_cmd();
        cmd.arg("run").arg("--bundle").arg(bundle).arg(id.as_str());
        wire_stdio(&mut cmd, console)?;
        unsafe {
            cmd.pre_exec(child_contract(fds));
        }
        let child = cmd.spawn().map_err(EngineError::from)?;
        Ok(RuntimeToolPid::new(child.id() as i32))
    }

    /// `create(id, bundle, console, fds, configOverride?) → (toolPid,
    /// containerPid)` (§4.4): forks `create`, waits with the 5.5s
    /// timeout, and on success reads the container's pid from the
    /// pidfile the tool wrote.
    pub fn create(
        &self,
        id: &ContainerId,
        bundle: &Path,
        console: &dyn StreamSink,
        fds: &[RawFd],
        config_override: Option<&Path>,
    ) -> Result<(RuntimeToolPid, ContainerInitPid)> {
        let pidfile = bundle.join("container.pid");
        let console_socket = bundle.join("console.sock");

        let mut cmd = self.base_cmd_tokio();
        cmd.arg("create")
            .arg("--bundle")
            .arg(bundle)
            .arg("--console-socket")
            .arg(&console_socket)
            .arg("--pid-file")
            .arg(&pidfile);
        if !fds.is_empty() {
            cmd.arg("--preserve-fds").arg(fds.len().to_string());
        }
        if let Some(path) = config_override {
            cmd.arg("--config").arg(path);
        }
        cmd.arg(id.as_str());
        wire_stdio_tokio(&mut cmd, console)?;
        unsafe {
            cmd.pre_exec(child_contract(fds));
        }

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(EngineError::from)?;

        rt.block_on(async {
            let mut child = cmd.spawn().map_err(EngineError::from)?;
            let tool_pid = RuntimeToolPid::new(child.id().ok_or_else(|| {
                EngineError::RuntimeFailure("create worker pid unavailable".into())
            })? as i32);

            match tokio::time::timeout(CREATE_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) if status.success() => {
                    let container_pid = read_pidfile(&pidfile)?;
                    Ok((tool_pid, ContainerInitPid::new(container_pid)))
                }
                Ok(Ok(status)) => Err(EngineError::RuntimeFailure(format!(
                    "create exited with {status}"
                ))),
                Ok(Err(e)) => Err(EngineError::from(e)),
                Err(_) => {
                    warn!(
                        "create timed out after {:?} for {}, killing process group {}",
                        CREATE_TIMEOUT,
                        id,
                        tool_pid
                    );
                    let _ = kill(NixPid::from_raw(-tool_pid.raw()), Signal::SIGKILL);
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    if let Ok(partial_pid) = read_pidfile(&pidfile) {
                        let _ = kill(NixPid::from_raw(partial_pid), Signal::SIGKILL);
                    }
                    let _ = self.destroy(id, true);
                    Err(EngineError::RuntimeFailure(format!(
                        "create timed out after {CREATE_TIMEOUT:?}"
                    )))
                }
            }
        })
    }

    /// `start(id, console)` (§4.4): blocks on the tool's own `waitpid`
    /// until the container has exec'd its init.
    pub fn start(&self, id: &ContainerId, console: &dyn StreamSink) -> Result<()> {
        let mut cmd = self.base_cmd();
        cmd.arg("start").arg(id.as_str());
        wire_stdio(&mut cmd, console)?;
        let status = cmd.status().map_err(EngineError::from)?;
        if status.success() {
            Ok(())
        } else {
            Err(EngineError::RuntimeFailure(format!(
                "start({id}) exited with {status}"
            )))
        }
    }

    fn run_signal(&self, id: &ContainerId, signal: KillSignal, all: bool) -> Result<bool> {
        let mut cmd = self.base_cmd();
        cmd.arg("kill");
        if all {
            cmd.arg("--all");
        }
        cmd.arg(id.as_str()).arg(signal.as_ref());
        let status = cmd.status().map_err(EngineError::from)?;
        Ok(status.success())
    }

    /// `kill(id, signal, all?)` (§4.4): `TERM` carries the
    /// compensation-to-`KILL` escalation — if the container's state is
    /// still alive after the retry budget, a `KILL` is sent.
    pub fn kill(&self, id: &ContainerId, signal: KillSignal, all: bool) -> Result<()> {
        if !self.run_signal(id, signal, all)? {
            return Err(EngineError::RuntimeFailure(format!(
                "kill({id}, {signal:?}) failed"
            )));
        }
        if signal != KillSignal::Term {
            return Ok(());
        }
        for _ in 0..TERM_COMPENSATION_RETRIES {
            match self.state(id) {
                Ok(ContainerStatus::Stopped) | Ok(ContainerStatus::Unknown) => return Ok(()),
                _ => std::thread::sleep(TERM_COMPENSATION_DELAY),
            }
        }
        warn!("{id}: SIGTERM did not stop the container in time, escalating to SIGKILL");
        if self.run_signal(id, KillSignal::Kill, all)? {
            Ok(())
        } else {
            Err(EngineError::RuntimeFailure(format!(
                "kill({id}, KILL) escalation failed"
            )))
        }
    }

    pub fn pause(&self, id: &ContainerId) -> Result<()> {
        let mut cmd = self.base_cmd();
        cmd.arg("pause").arg(id.as_str());
        let status = cmd.status().map_err(EngineError::from)?;
        status
            .success()
            .then_some(())
            .ok_or_else(|| EngineError::RuntimeFailure(format!("pause({id}) failed")))
    }

    pub fn resume(&self, id: &ContainerId) -> Result<()> {
        let mut cmd = self.base_cmd();
        cmd.arg("resume").arg(id.as_str());
        let status = cmd.status().map_err(EngineError::from)?;
        status
            .success()
            .then_some(())
            .ok_or_else(|| EngineError::RuntimeFailure(format!("resume({id}) failed")))
    }

    /// `exec(id, options, command) → (toolPid, execPid)` (§4.4): always
    /// prepends the in-container init wrapper so signal handling of the
    /// exec'd process is correct.
    pub fn exec(
        &self,
        id: &ContainerId,
        bundle: &Path,
        command: &[String],
    ) -> Result<(RuntimeToolPid, ExecPid)> {
        let pidfile = std::env::temp_dir().join(format!("dobby-exec-{id}-{}.pid", std::process::id()));
        let console_socket = bundle.join("exec-console.sock");

        let mut cmd = self.base_cmd();
        cmd.arg("exec")
            .arg("--detach")
            .arg("--tty")
            .arg("--console-socket")
            .arg(&console_socket)
            .arg("--pid-file")
            .arg(&pidfile)
            .arg(id.as_str())
            .arg(EXEC_INIT_WRAPPER);
        cmd.args(command);

        let mut child = cmd.spawn().map_err(EngineError::from)?;
        let tool_pid = RuntimeToolPid::new(child.id() as i32);
        let status = child.wait().map_err(EngineError::from)?;
        if !status.success() {
            return Err(EngineError::RuntimeFailure(format!("exec({id}) failed")));
        }

        let exec_pid = read_pidfile(&pidfile)?;
        let _ = std::fs::remove_file(&pidfile);
        Ok((tool_pid, ExecPid::new(exec_pid)))
    }

    /// `destroy(id, console, force)` (§4.4): attempts a graceful delete,
    /// retrying with `--force` on failure.
    pub fn destroy(&self, id: &ContainerId, force: bool) -> Result<()> {
        let mut cmd = self.base_cmd();
        cmd.arg("delete");
        if force {
            cmd.arg("--force");
        }
        cmd.arg(id.as_str());
        let status = cmd.status().map_err(EngineError::from)?;
        if status.success() {
            return Ok(());
        }
        if force {
            return Err(EngineError::RuntimeFailure(format!(
                "destroy({id}, force) failed"
            )));
        }
        info!("{id}: graceful delete failed, retrying with --force");
        self.destroy(id, true)
    }

    /// `state(id) → status` (§4.4): parses the tool's JSON reply.
    pub fn state(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let mut cmd = self.base_cmd();
        cmd.arg("state").arg(id.as_str());
        let output = cmd.output().map_err(EngineError::from)?;
        if !output.status.success() {
            return Ok(ContainerStatus::Unknown);
        }
        let root: serde_json::Value = serde_json::from_slice(&output.stdout).map_err(EngineError::from)?;
        Ok(ContainerStatus::from_state_json(&root))
    }

    /// `list() → [{id, pid, bundlePath, status}]` (§4.4).
    pub fn list(&self) -> Result<Vec<ContainerListItem>> {
        let mut cmd = self.base_cmd();
        cmd.arg("list").arg("--format").arg("json");
        let output = cmd.output().map_err(EngineError::from)?;
        if !output.status.success() {
            return Err(EngineError::RuntimeFailure("list failed".into()));
        }
        let root: serde_json::Value = serde_json::from_slice(&output.stdout).map_err(EngineError::from)?;
        Ok(parse_list_json(&root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::DevNullStream;

    fn echo_driver() -> RuntimeDriver {
        let binary = which::which("echo").expect("echo must be on PATH for this test");
        RuntimeDriver::new(RuntimeConfig {
            binary,
            root: std::env::temp_dir(),
            log_path: std::env::temp_dir().join("dobby-test.log"),
        })
    }

    #[test]
    fn run_returns_a_live_pid() {
        let driver = echo_driver();
        let id = ContainerId::new("runtime-test").unwrap();
        let pid = driver.run(&id, Path::new("/tmp"), &DevNullStream, &[]).unwrap();
        assert!(pid.is_valid());
        unsafe {
            libc::waitpid(pid.raw(), std::ptr::null_mut(), 0);
        }
    }

    #[test]
    fn kill_signal_display_matches_runc_vocabulary() {
        assert_eq!(KillSignal::Term.as_ref(), "TERM");
        assert_eq!(KillSignal::Usr1.as_ref(), "USR1");
    }
}

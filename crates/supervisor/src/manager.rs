//! The container manager (§4.5): the global container table, the start/
//! stop/pause/resume/exec entry points, and their rollback paths. The
//! reaper thread (`reaper.rs`) is the manager's other half, consuming the
//! same locked state asynchronously as containers' runtime processes exit.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bundle::{Bundle, Rootfs};
use common::{ContainerId, ContainerInitPid, Descriptor, EngineError, ExecPid, Result};
use oci_config::{ResolvedConfig, Settings};
use plugin::legacy::LegacyPluginManager;
use plugin::HookPoint;
use runtime::{KillSignal, RuntimeConfig, RuntimeDriver, StreamSink};
use serde_json::{json, Value};
use state::SharedState;

use crate::container::{Container, LifecycleState, RestartPolicy};
use crate::descriptor::DescriptorAllocator;
use crate::events::{StartedCallback, StoppedCallback};

/// Either shape a start request can arrive in — unified by the
/// configuration pipeline before anything downstream cares which one it
/// was (§2 "the shapes are unified after the configuration pipeline").
pub enum StartOrigin {
    Spec(String),
    Bundle(PathBuf),
}

/// Everything a start call can carry beyond the container's origin (§4.5
/// step 2/6).
pub struct StartRequest {
    pub id: ContainerId,
    pub origin: StartOrigin,
    pub extra_fds: Vec<RawFd>,
    pub command_override: Option<Vec<String>>,
    pub display_socket: Option<PathBuf>,
    pub extra_env: Vec<String>,
}

pub(crate) struct Inner {
    pub(crate) allocator: DescriptorAllocator,
    pub(crate) containers: HashMap<Descriptor, Container>,
    pub(crate) id_index: HashMap<ContainerId, Descriptor>,
}

/// Owns the container table, the shared runtime driver, and the shared
/// services every container's plugins reach for. One instance per process,
/// constructed by `main` and handed to collaborators by reference (§9
/// "Engine value" note) rather than reached for through a global.
pub struct Manager {
    pub(crate) inner: Mutex<Inner>,
    pub(crate) runtime: RuntimeDriver,
    pub(crate) settings: Settings,
    /// Discovered once at startup and shared by every container, matching
    /// the original's single daemon-wide `DobbyLegacyPluginManager`.
    pub(crate) legacy_plugins: LegacyPluginManager,
    pub shared: SharedState,
    pub(crate) on_started: Option<StartedCallback>,
    pub(crate) on_stopped: Option<StoppedCallback>,
    /// Consulted by the reaper on SIGUSR1 to decide whether to exit its
    /// `sigwaitinfo` loop (§4.5 "Termination at shutdown").
    pub(crate) terminate: AtomicBool,
    pub(crate) reaper_thread: Mutex<Option<libc::pthread_t>>,
}

impl Manager {
    pub fn new(
        settings: Settings,
        runtime_cfg: RuntimeConfig,
        legacy_plugin_dir: &Path,
        on_started: Option<StartedCallback>,
        on_stopped: Option<StoppedCallback>,
    ) -> Self {
        let shared = SharedState::new(settings.network_address_range);
        Self {
            inner: Mutex::new(Inner {
                allocator: DescriptorAllocator::new(),
                containers: HashMap::new(),
                id_index: HashMap::new(),
            }),
            runtime: RuntimeDriver::new(runtime_cfg),
            settings,
            legacy_plugins: LegacyPluginManager::discover(legacy_plugin_dir),
            shared,
            on_started,
            on_stopped,
            terminate: AtomicBool::new(false),
            reaper_thread: Mutex::new(None),
        }
    }

    /// Number of containers currently in the table. Takes the manager lock,
    /// matching §5 "Stats reads take the same lock".
    pub fn container_count(&self) -> usize {
        self.inner.lock().unwrap().containers.len()
    }

    fn materialize(
        &self,
        req: &StartRequest,
    ) -> Result<(Bundle, Rootfs, ResolvedConfig, bool)> {
        match &req.origin {
            StartOrigin::Spec(spec_json) => {
                let bundle = Bundle::new_auto(&self.settings.workspace_dir, &req.id)?;
                let rootfs_path = bundle.path().join("rootfs");
                let (config, _json) = oci_config::resolve_spec(
                    spec_json,
                    &self.settings,
                    &self.shared.devices,
                    bundle.path(),
                    &rootfs_path,
                )?;
                let rootfs = Rootfs::new_spec_origin(&bundle, &config)?;
                Ok((bundle, rootfs, config, true))
            }
            StartOrigin::Bundle(path) => {
                let bundle = Bundle::new_persistent(path)?;
                let config = oci_config::resolve_bundle(bundle.path(), &self.settings, &self.shared.devices)?;
                let rootfs = Rootfs::new_bundle_origin(&bundle)?;
                Ok((bundle, rootfs, config, false))
            }
        }
    }

    /// Writes `<bundle>/config-<descriptor>.json` with the requested
    /// mutations applied (§4.5 step 6): argv replacement, the display
    /// socket bind-mounted to `/tmp/westeros`, and extra env entries.
    fn write_override(
        bundle_path: &Path,
        descriptor: Descriptor,
        command_override: Option<&[String]>,
        display_socket: Option<&Path>,
        extra_env: &[String],
    ) -> Result<PathBuf> {
        let raw = std::fs::read_to_string(bundle_path.join("config.json")).map_err(EngineError::from)?;
        let mut doc: Value = serde_json::from_str(&raw).map_err(EngineError::from)?;

        if let Some(args) = command_override {
            doc["process"]["args"] = json!(args);
        }
        if let Some(socket) = display_socket {
            if doc.get("mounts").and_then(Value::as_array).is_none() {
                doc["mounts"] = Value::Array(Vec::new());
            }
            doc["mounts"].as_array_mut().unwrap().push(json!({
                "source": socket.to_string_lossy(),
                "destination": "/tmp/westeros",
                "type": "bind",
                "options": ["rbind"],
            }));
        }
        if !extra_env.is_empty() {
            if doc["process"].get("env").and_then(Value::as_array).is_none() {
                doc["process"]["env"] = Value::Array(Vec::new());
            }
            let env = doc["process"]["env"].as_array_mut().unwrap();
            env.extend(extra_env.iter().map(|e| Value::String(e.clone())));
        }

        let override_path = bundle_path.join(format!("config-{descriptor}.json"));
        std::fs::write(&override_path, serde_json::to_vec_pretty(&doc).map_err(EngineError::from)?)
            .map_err(EngineError::from)?;
        Ok(override_path)
    }

    fn console_sink(&self) -> impl StreamSink {
        runtime::stream::DevNullStream
    }

    /// §4.5 "Start sequence". Returns the new descriptor's value, or
    /// `Descriptor::INVALID` on any failure (§7 "User-visible behavior").
    pub fn start(&self, req: StartRequest) -> i32 {
        match self.try_start(req) {
            Ok(descriptor) => descriptor.value(),
            Err(e) => {
                log::error!("start failed: {e}");
                Descriptor::INVALID
            }
        }
    }

    fn try_start(&self, req: StartRequest) -> Result<Descriptor> {
        let mut inner = self.inner.lock().unwrap();

        if inner.id_index.contains_key(&req.id) {
            return Err(EngineError::config_invalid("id", format!("'{}' already running", req.id)));
        }

        let (bundle, rootfs, config, spec_origin) = self.materialize(&req)?;
        let restart_on_crash = config.restart_on_crash();

        let descriptor = inner
            .allocator
            .alloc()
            .ok_or_else(|| EngineError::SystemFailure("descriptor pool exhausted".into()))?;

        let container = Container {
            descriptor,
            id: req.id.clone(),
            bundle,
            rootfs,
            config,
            state: LifecycleState::Starting,
            curse_of_death: AtomicBool::new(false),
            container_pid: None,
            exec_pids: Vec::new(),
            override_path: None,
            restart: RestartPolicy::new(restart_on_crash, req.extra_fds.clone()),
        };
        inner.id_index.insert(req.id.clone(), descriptor);
        inner.containers.insert(descriptor, container);

        match self.run_start_sequence(&mut inner, descriptor, &req, spec_origin, true) {
            Ok(()) => Ok(descriptor),
            Err(e) => {
                self.unwind_failed_start(&mut inner, descriptor);
                Err(e)
            }
        }
    }

    /// The part of §4.5's start sequence shared between a fresh start and a
    /// reaper-driven restart (steps 3-8); `run_post_construction` is
    /// skipped on a restart, matching step 4's "Skip legacy
    /// postConstruction and preDestruction; still run legacy
    /// preStart/postStart."
    fn run_start_sequence(
        &self,
        inner: &mut Inner,
        descriptor: Descriptor,
        req: &StartRequest,
        spec_origin: bool,
        run_post_construction: bool,
    ) -> Result<()> {
        let container = inner.containers.get(&descriptor).expect("just inserted");
        let bundle_path = container.bundle.path().to_path_buf();
        let rootfs_path = container.rootfs.path().to_path_buf();
        let id_str = container.id.as_str().to_string();
        let legacy_order = container.config.legacy_plugin_order().clone();
        let legacy_data = container.config.legacy_plugins().clone();

        if run_post_construction && spec_origin && !self.legacy_plugins.is_empty() {
            if !self
                .legacy_plugins
                .run_hook(HookPoint::PostConstruction, &legacy_order, &legacy_data, &id_str, &rootfs_path.to_string_lossy())
            {
                return Err(EngineError::PluginFailure {
                    plugin: "legacy".into(),
                    hook: "postConstruction".into(),
                });
            }
        }

        if !container.config.rdk_plugins().is_empty() {
            if !plugin::modern::run_post_installation(&bundle_path)? {
                return Err(EngineError::PluginFailure {
                    plugin: "modern".into(),
                    hook: "postInstallation".into(),
                });
            }
            if !plugin::modern::run_pre_creation(&bundle_path)? {
                return Err(EngineError::PluginFailure {
                    plugin: "modern".into(),
                    hook: "preCreation".into(),
                });
            }
        }

        let needs_override = req.command_override.is_some()
            || req.display_socket.is_some()
            || !req.extra_env.is_empty();
        let override_path = if needs_override {
            Some(Self::write_override(
                &bundle_path,
                descriptor,
                req.command_override.as_deref(),
                req.display_socket.as_deref(),
                &req.extra_env,
            )?)
        } else {
            None
        };
        if let Some(container) = inner.containers.get_mut(&descriptor) {
            container.override_path = override_path.clone();
        }

        let console = self.console_sink();
        let (_, container_pid) = self.runtime.create(
            &req.id,
            &bundle_path,
            &console,
            &req.extra_fds,
            override_path.as_deref(),
        )?;

        if let Some(container) = inner.containers.get_mut(&descriptor) {
            container.container_pid = Some(container_pid);
        }

        if container.is_cursed() {
            return Err(EngineError::StateMismatch(format!(
                "{} was stopped while starting",
                req.id
            )));
        }

        if !self.legacy_plugins.is_empty() {
            if !self.legacy_plugins.run_hook(
                HookPoint::PreStart,
                &legacy_order,
                &legacy_data,
                &id_str,
                &rootfs_path.to_string_lossy(),
            ) {
                return Err(EngineError::PluginFailure {
                    plugin: "legacy".into(),
                    hook: "preStart".into(),
                });
            }
        }
        if let Some(container) = inner.containers.get_mut(&descriptor) {
            container.state = LifecycleState::Running;
        }

        self.runtime.start(&req.id, &console)?;

        if let Some(cb) = self.on_started {
            cb(descriptor, &req.id);
        }

        if !self.legacy_plugins.is_empty() {
            if !self.legacy_plugins.run_hook(
                HookPoint::PostStart,
                &legacy_order,
                &legacy_data,
                &id_str,
                &rootfs_path.to_string_lossy(),
            ) {
                log::warn!("{}: postStart hook failed (logged, not fatal)", req.id);
            }
        }

        Ok(())
    }

    /// §4.5 step 9: rollback after any failure between steps 3 and 8.
    fn unwind_failed_start(&self, inner: &mut Inner, descriptor: Descriptor) {
        if let Some(container) = inner.containers.get(&descriptor) {
            let id_str = container.id.as_str().to_string();
            let rootfs_path = container.rootfs.path().to_string_lossy().to_string();
            let order = container.config.legacy_plugin_order().clone();
            let data = container.config.legacy_plugins().clone();
            let bundle_path = container.bundle.path().to_path_buf();

            if !self.legacy_plugins.is_empty() {
                self.legacy_plugins.run_hook(HookPoint::PostStop, &order, &data, &id_str, &rootfs_path);
                self.legacy_plugins.run_hook(HookPoint::PreDestruction, &order, &data, &id_str, &rootfs_path);
            }
            if !container.config.rdk_plugins().is_empty() {
                let _ = plugin::modern::run_post_halt(&bundle_path);
            }
            if let Some(pid) = container.container_pid {
                let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid.raw()), nix::sys::signal::Signal::SIGKILL);
                unsafe {
                    libc::waitpid(pid.raw(), std::ptr::null_mut(), 0);
                }
            }
            let _ = self.runtime.destroy(&container.id, true);
            if let Some(path) = &container.override_path {
                let _ = std::fs::remove_file(path);
            }
        }

        inner.containers.remove(&descriptor);
        inner.id_index.retain(|_, d| *d != descriptor);
        inner.allocator.free(descriptor);
    }

    /// §4.5 "Stop sequence".
    pub fn stop(&self, descriptor_value: i32, with_prejudice: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let descriptor = match Self::find_descriptor(descriptor_value) {
            Some(d) => d,
            None => return false,
        };
        let container = match inner.containers.get_mut(&descriptor) {
            Some(c) => c,
            None => return false,
        };

        container.restart.enabled = false;

        match container.state {
            LifecycleState::Starting => {
                container.curse();
                true
            }
            LifecycleState::Running => {
                let signal = if with_prejudice { KillSignal::Kill } else { KillSignal::Term };
                container.state = LifecycleState::Stopping;
                self.runtime.kill(&container.id, signal, false).is_ok()
            }
            LifecycleState::Stopping => true,
            LifecycleState::Paused => {
                if with_prejudice {
                    let id = container.id.clone();
                    drop(inner);
                    let resumed = self.runtime.resume(&id).is_ok();
                    if !resumed {
                        return false;
                    }
                    return self.stop(descriptor_value, true);
                }
                false
            }
        }
    }

    /// §4.5 "Pause/Resume": only Running→Paused is allowed; an
    /// already-Paused container rejects a second pause.
    pub fn pause(&self, descriptor_value: i32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let descriptor = match Self::find_descriptor(descriptor_value) {
            Some(d) => d,
            None => return false,
        };
        let container = match inner.containers.get_mut(&descriptor) {
            Some(c) => c,
            None => return false,
        };
        if container.state != LifecycleState::Running {
            return false;
        }
        if self.runtime.pause(&container.id).is_ok() {
            container.state = LifecycleState::Paused;
            true
        } else {
            false
        }
    }

    pub fn resume(&self, descriptor_value: i32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let descriptor = match Self::find_descriptor(descriptor_value) {
            Some(d) => d,
            None => return false,
        };
        let container = match inner.containers.get_mut(&descriptor) {
            Some(c) => c,
            None => return false,
        };
        if container.state != LifecycleState::Paused {
            return false;
        }
        if self.runtime.resume(&container.id).is_ok() {
            container.state = LifecycleState::Running;
            true
        } else {
            false
        }
    }

    /// §4.5 "Exec in container": Running only. The returned exec pid is
    /// recorded so the reaper can `waitpid` it without confusing it for
    /// the container's own init pid.
    pub fn exec(&self, descriptor_value: i32, command: &[String]) -> Result<ExecPid> {
        let mut inner = self.inner.lock().unwrap();
        let descriptor = Self::find_descriptor(descriptor_value)
            .ok_or_else(|| EngineError::NotFound(format!("descriptor {descriptor_value}")))?;
        let container = inner
            .containers
            .get_mut(&descriptor)
            .ok_or_else(|| EngineError::NotFound(format!("descriptor {descriptor_value}")))?;
        if container.state != LifecycleState::Running {
            return Err(EngineError::StateMismatch(format!(
                "exec requires Running, container is {:?}",
                container.state
            )));
        }
        let bundle_path = container.bundle.path().to_path_buf();
        let id = container.id.clone();
        let (_, exec_pid) = self.runtime.exec(&id, &bundle_path, command)?;
        container.exec_pids.push(exec_pid);
        Ok(exec_pid)
    }

    fn find_descriptor(value: i32) -> Option<Descriptor> {
        if !(Descriptor::MIN..=Descriptor::MAX).contains(&value) {
            return None;
        }
        Some(Descriptor::new_unchecked(value))
    }

    pub(crate) fn reap_cycle(&self) {
        let mut inner = self.inner.lock().unwrap();
        let descriptors: Vec<Descriptor> = inner.containers.keys().copied().collect();

        for descriptor in descriptors {
            self.reap_exec_pids(&mut inner, descriptor);

            let exited_status = {
                let container = match inner.containers.get(&descriptor) {
                    Some(c) => c,
                    None => continue,
                };
                match container.container_pid {
                    None => continue,
                    Some(pid) => Self::poll_exit_status(pid),
                }
            };
            let status = match exited_status {
                Some(status) => status,
                None => continue,
            };
            self.handle_container_exit(&mut inner, descriptor, status);
        }
    }

    fn reap_exec_pids(&self, inner: &mut Inner, descriptor: Descriptor) {
        if let Some(container) = inner.containers.get_mut(&descriptor) {
            container.exec_pids.retain(|pid| Self::poll_exit_status(*pid).is_none());
        }
    }

    /// Non-blocking `waitpid`; treats "no such child but also not
    /// signalable" as reaped too, matching §4.5's `kill(pid, 0)` fallback
    /// for a process that's already been reaped by someone else.
    fn poll_exit_status<R: common::PidRole>(pid: common::Pid<R>) -> Option<i32> {
        use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
        let nix_pid = nix::unistd::Pid::from_raw(pid.raw());
        match waitpid(nix_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, status)) => Some(status),
            Ok(WaitStatus::Signaled(_, signal, _)) => Some(128 + signal as i32),
            Ok(_) => None,
            Err(_) => {
                if nix::sys::signal::kill(nix_pid, None).is_err() {
                    Some(-1)
                } else {
                    None
                }
            }
        }
    }

    /// §4.5 reaper steps 1-5, for one container whose runtime process has
    /// exited with `status`.
    fn handle_container_exit(&self, inner: &mut Inner, descriptor: Descriptor, status: i32) {
        let (id, rootfs_path, order, data, bundle_path, was_running) = {
            let container = match inner.containers.get_mut(&descriptor) {
                Some(c) => c,
                None => return,
            };
            let was_running = container.state == LifecycleState::Running;
            if was_running {
                container.state = LifecycleState::Stopping;
            }
            (
                container.id.clone(),
                container.rootfs.path().to_string_lossy().to_string(),
                container.config.legacy_plugin_order().clone(),
                container.config.legacy_plugins().clone(),
                container.bundle.path().to_path_buf(),
                was_running,
            )
        };

        if was_running && !self.legacy_plugins.is_empty() {
            self.legacy_plugins.run_hook(HookPoint::PostStop, &order, &data, id.as_str(), &rootfs_path);
        }

        if let Some(cb) = self.on_stopped {
            cb(descriptor, &id, status);
        }

        let should_restart = inner
            .containers
            .get_mut(&descriptor)
            .map(|c| c.restart.should_restart(status))
            .unwrap_or(false);

        if should_restart {
            let _ = self.runtime.destroy(&id, true);
            let extra_fds = inner
                .containers
                .get(&descriptor)
                .map(|c| c.restart.fds.clone())
                .unwrap_or_default();
            let req = StartRequest {
                id: id.clone(),
                origin: StartOrigin::Bundle(bundle_path),
                extra_fds,
                command_override: None,
                display_socket: None,
                extra_env: Vec::new(),
            };
            if let Some(container) = inner.containers.get_mut(&descriptor) {
                container.container_pid = None;
                container.state = LifecycleState::Starting;
            }
            if let Err(e) = self.run_start_sequence(inner, descriptor, &req, false, false) {
                log::error!("{id}: restart failed: {e}");
                self.dispose_container(inner, descriptor, &bundle_path);
            }
            return;
        }

        self.dispose_container(inner, descriptor, &bundle_path);
    }

    /// §4.5 step 5: final teardown once a container will not be restarted.
    fn dispose_container(&self, inner: &mut Inner, descriptor: Descriptor, bundle_path: &Path) {
        if let Some(container) = inner.containers.get(&descriptor) {
            let rootfs_path = container.rootfs.path().to_string_lossy().to_string();
            let order = container.config.legacy_plugin_order().clone();
            let data = container.config.legacy_plugins().clone();
            let id = container.id.clone();
            let has_rdk = !container.config.rdk_plugins().is_empty();
            let override_path = container.override_path.clone();

            if !self.legacy_plugins.is_empty() {
                self.legacy_plugins.run_hook(HookPoint::PreDestruction, &order, &data, id.as_str(), &rootfs_path);
            }
            if has_rdk {
                let _ = plugin::modern::run_post_halt(bundle_path);
            }
            let _ = self.runtime.destroy(&id, true);
            if let Some(path) = override_path {
                let _ = std::fs::remove_file(path);
            }
            self.shared.metadata.clear_container_meta_data(&id);
        }

        inner.containers.remove(&descriptor);
        inner.id_index.retain(|_, d| *d != descriptor);
        inner.allocator.free(descriptor);
    }

    /// Startup stale-container sweep (SPEC_FULL.md §4.5 supplement): on
    /// construction, list whatever the external OCI runtime still has
    /// registered from a previous run and destroy anything this process has
    /// no record of, since this core does not persist state across reboots.
    pub fn sweep_stale_containers(&self) {
        let list = match self.runtime.list() {
            Ok(list) => list,
            Err(e) => {
                log::warn!("stale-container sweep: failed to list runtime containers: {e}");
                return;
            }
        };
        let inner = self.inner.lock().unwrap();
        for item in list {
            if let Ok(id) = ContainerId::new(item.id.clone()) {
                if !inner.id_index.contains_key(&id) {
                    log::info!("destroying stale container {id} left over from a previous run");
                    let _ = self.runtime.destroy(&id, true);
                }
            }
        }
    }
}

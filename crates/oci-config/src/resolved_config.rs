//! The merged, normalized representation of a container spec (§3
//! `ResolvedConfig`). Processors accumulate into this struct; `oci_build`
//! renders it into an `oci_spec::runtime::Spec` and writes `config.json`.

use std::collections::HashMap;
use std::path::PathBuf;

use getset::{CopyGetters, Getters, MutGetters};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which revision of the vendor spec schema produced this config. `rtPriority`
/// and a handful of other processors branch on this.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpecVersion {
    V1_0,
    V1_1,
}

impl SpecVersion {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "1.0" => Some(Self::V1_0),
            "1.1" => Some(Self::V1_1),
            _ => None,
        }
    }
}

/// The console sink chosen by the `console` processor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConsoleSink {
    /// `console: null` — disabled, but the logging plugin is still wired to
    /// devnull so downstream tooling can rely on its presence.
    DevNull,
    /// `console: {path, limit}` — a file sink with an optional byte cap.
    /// `limit` is always materialized; `-1` means unbounded.
    File { path: PathBuf, limit: i64 },
}

impl Default for ConsoleSink {
    fn default() -> Self {
        ConsoleSink::DevNull
    }
}

/// One of the three bus selections in `dbus`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DbusBus {
    System,
    AiPublic,
    AiPrivate,
    None,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DbusSelection {
    pub system: Option<DbusBus>,
    pub session: Option<DbusBus>,
    pub debug: Option<DbusBus>,
}

/// `network` processor's resolved mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkMode {
    Nat,
    Open,
    Private,
}

/// One `{major, minor, access}` device grant, already validated against the
/// host allowlist.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceEntry {
    pub major: u32,
    pub minor: u32,
    pub access: String,
}

/// A mount-point placeholder that `Rootfs` construction must materialize.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MountKind {
    Directory,
    File,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountPoint {
    pub kind: MountKind,
    pub destination: PathBuf,
}

/// A single `mounts[]` entry that survives into the OCI spec's `mounts`
/// array (i.e. not a `type == "loop"` entry, which is diverted into the
/// `storage` plugin's data instead).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OciMountEntry {
    pub source: Option<PathBuf>,
    pub destination: PathBuf,
    pub typ: Option<String>,
    pub options: Vec<String>,
}

/// A `type == "loop"` mount, diverted to the `storage` plugin.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct LoopMount {
    pub source: String,
    pub destination: String,
    pub fstype: Option<String>,
    pub flags: u32,
    pub options: Vec<String>,
}

/// One entry of the `rdkPlugins` (modern) or legacy plugin table.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct PluginEntry {
    pub data: Value,
    pub required: bool,
    #[serde(rename = "dependsOn", default)]
    pub depends_on: Vec<String>,
}

/// The five `/etc` files written by a spec-origin `Rootfs` (§4.2), plus the
/// literal `nsswitch.conf`/`resolv.conf` companions.
#[derive(Clone, Debug, Default)]
pub struct EtcBundle {
    pub hosts: String,
    pub services: String,
    pub passwd: String,
    pub group: String,
    pub ld_so_preload: String,
}

#[derive(Clone, Debug, Default)]
pub struct RtPriority {
    pub default: i64,
    pub limit: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct CpuConfig {
    /// Already scaled to cgroup v1 shares, i.e. `(1024/100) * shares`.
    pub shares: Option<u64>,
    /// Bit set of permitted cpu indices, capped at 8 and filtered by the
    /// online-cpu count.
    pub cores: Option<Vec<u32>>,
}

#[derive(Clone, Debug, Default)]
pub struct SeccompConfig {
    pub default_action: String,
    pub rules: Vec<SeccompRule>,
}

#[derive(Clone, Debug)]
pub struct SeccompRule {
    pub action: String,
    pub names: Vec<String>,
}

/// Strace/apparmor round through `Settings` into the resolved config
/// untouched; no processor in this core acts on them, but a faithful
/// settings loader carries them for external plugins to consume.
#[derive(Clone, Debug, Default)]
pub struct PassthroughSettings {
    pub strace_logs_dir: Option<PathBuf>,
    pub strace_apps: Vec<String>,
    pub apparmor_enabled: bool,
    pub apparmor_profile_name: Option<String>,
}

/// The merged, normalized representation of a container spec (§3).
#[derive(Clone, Debug, Getters, CopyGetters, MutGetters)]
pub struct ResolvedConfig {
    #[getset(get_copy = "pub")]
    pub(crate) version: SpecVersion,

    #[getset(get_copy = "pub")]
    pub(crate) uid: u32,
    #[getset(get_copy = "pub")]
    pub(crate) gid: u32,

    #[getset(get = "pub")]
    pub(crate) rootfs_path: PathBuf,

    #[getset(get = "pub")]
    pub(crate) args: Vec<String>,
    #[getset(get = "pub")]
    pub(crate) env: Vec<String>,
    #[getset(get = "pub")]
    pub(crate) cwd: String,

    #[getset(get_copy = "pub")]
    pub(crate) user_ns: bool,

    #[getset(get_copy = "pub")]
    pub(crate) gpu_enable: bool,
    #[getset(get_copy = "pub")]
    pub(crate) vpu_enable: bool,
    #[getset(get_copy = "pub")]
    pub(crate) mem_limit: u64,

    #[getset(get = "pub")]
    pub(crate) console: ConsoleSink,

    #[getset(get = "pub")]
    pub(crate) dbus: DbusSelection,

    #[getset(get_copy = "pub")]
    pub(crate) network: Option<NetworkMode>,

    #[getset(get = "pub")]
    pub(crate) rt_priority: Option<RtPriority>,

    #[getset(get_copy = "pub")]
    pub(crate) restart_on_crash: bool,

    #[getset(get = "pub", get_mut = "pub(crate)")]
    pub(crate) mounts: Vec<MountPoint>,
    #[getset(get = "pub", get_mut = "pub(crate)")]
    pub(crate) oci_mounts: Vec<OciMountEntry>,
    #[getset(get = "pub", get_mut = "pub(crate)")]
    pub(crate) loop_mounts: Vec<LoopMount>,

    #[getset(get = "pub", get_mut = "pub(crate)")]
    pub(crate) rdk_plugins: HashMap<String, PluginEntry>,
    #[getset(get = "pub", get_mut = "pub(crate)")]
    pub(crate) legacy_plugins: HashMap<String, PluginEntry>,
    /// Spec declaration order of `legacy_plugins`' keys — `plugin`'s
    /// dispatcher iterates hook points in this order, not HashMap order.
    #[getset(get = "pub", get_mut = "pub(crate)")]
    pub(crate) legacy_plugin_order: Vec<String>,
    #[getset(get = "pub", get_mut = "pub(crate)")]
    pub(crate) enabled_system_hooks: Vec<String>,

    #[getset(get = "pub")]
    pub(crate) cpu: CpuConfig,
    #[getset(get = "pub")]
    pub(crate) devices: Vec<DeviceEntry>,
    #[getset(get = "pub")]
    pub(crate) capabilities: Vec<String>,
    #[getset(get = "pub")]
    pub(crate) seccomp: Option<SeccompConfig>,

    #[getset(get = "pub")]
    pub(crate) etc: EtcBundle,

    #[getset(get = "pub")]
    pub(crate) passthrough: PassthroughSettings,

    #[getset(get_copy = "pub")]
    pub(crate) no_new_privileges: bool,
}

impl ResolvedConfig {
    /// Seeds a config with the defaults §4.1 specifies: userNs enabled,
    /// network namespace enabled (tracked implicitly — this core always
    /// requests one), an RT rlimit entry present at 0, and
    /// no-new-privileges true.
    pub(crate) fn defaults(version: SpecVersion, rootfs_path: PathBuf) -> Self {
        Self {
            version,
            uid: 0,
            gid: 0,
            rootfs_path,
            args: Vec::new(),
            env: Vec::new(),
            cwd: "/".into(),
            user_ns: true,
            gpu_enable: false,
            vpu_enable: false,
            mem_limit: 0,
            console: ConsoleSink::default(),
            dbus: DbusSelection::default(),
            network: None,
            rt_priority: Some(RtPriority {
                default: 0,
                limit: None,
            }),
            restart_on_crash: false,
            mounts: Vec::new(),
            oci_mounts: Vec::new(),
            loop_mounts: Vec::new(),
            rdk_plugins: HashMap::new(),
            legacy_plugins: HashMap::new(),
            legacy_plugin_order: Vec::new(),
            enabled_system_hooks: Vec::new(),
            cpu: CpuConfig::default(),
            devices: Vec::new(),
            capabilities: Vec::new(),
            seccomp: None,
            etc: EtcBundle::default(),
            passthrough: PassthroughSettings::default(),
            no_new_privileges: true,
        }
    }
}

//! The settings document (§6 "Settings document"). Loaded once by `engine`
//! and handed to the pipeline by reference; processors read it for defaults
//! (workspace dir, hardware-access device grants, default plugin data) but
//! never mutate it.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One mount entry as it appears in `HardwareAccessSettings` or the
/// top-level `mounts` spec field. `options` is drawn from the closed set in
/// §6; unrecognized tokens are rejected by `processors::mounts`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettingsMount {
    pub source: String,
    pub destination: String,
    #[serde(rename = "type", default)]
    pub typ: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

/// GPU/VPU hardware-access grants merged into the dictionary by
/// `processors::hardware` when `gpu.enable`/`vpu.enable` is true.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HardwareAccessSettings {
    #[serde(default)]
    pub device_node_globs: Vec<String>,
    #[serde(default)]
    pub supplementary_gids: Vec<u32>,
    #[serde(default)]
    pub extra_mounts: Vec<SettingsMount>,
    #[serde(default)]
    pub extra_env: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LogRelaySettings {
    #[serde(default)]
    pub syslog_enabled: bool,
    #[serde(default)]
    pub journald_enabled: bool,
    #[serde(default)]
    pub syslog_socket_path: Option<PathBuf>,
    #[serde(default)]
    pub journald_socket_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StraceSettings {
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
    #[serde(default)]
    pub apps: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApparmorSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub profile_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub workspace_dir: PathBuf,
    pub persistent_dir: PathBuf,
    pub console_socket_path: PathBuf,
    #[serde(default)]
    pub extra_env: Vec<String>,
    #[serde(default)]
    pub gpu: HardwareAccessSettings,
    #[serde(default)]
    pub vpu: HardwareAccessSettings,
    #[serde(default)]
    pub external_network_interfaces: Vec<String>,
    /// IPv4 /24 base address, e.g. `100.64.11.0`. `state`'s IP pool adds 2
    /// for the first lease and reserves +1 for the bridge.
    pub network_address_range: std::net::Ipv4Addr,
    #[serde(default)]
    pub default_plugins: Vec<String>,
    #[serde(default)]
    pub plugin_default_data: HashMap<String, Value>,
    #[serde(default)]
    pub log_relay: LogRelaySettings,
    #[serde(default)]
    pub strace: StraceSettings,
    #[serde(default)]
    pub apparmor: ApparmorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::new(),
            persistent_dir: PathBuf::new(),
            console_socket_path: PathBuf::new(),
            extra_env: Vec::new(),
            gpu: HardwareAccessSettings::default(),
            vpu: HardwareAccessSettings::default(),
            external_network_interfaces: Vec::new(),
            network_address_range: std::net::Ipv4Addr::UNSPECIFIED,
            default_plugins: Vec::new(),
            plugin_default_data: HashMap::new(),
            log_relay: LogRelaySettings::default(),
            strace: StraceSettings::default(),
            apparmor: ApparmorSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_str(raw: &str) -> common::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

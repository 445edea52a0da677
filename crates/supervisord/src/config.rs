//! CLI configuration for the supervisor daemon (§6 "Settings document",
//! "Environment variables consumed"). Grounded in `containrs`'s own
//! `src/config.rs` (`derive(Clap)` + `getset` + `env(...)` per field); this
//! crate's fields are the paths the daemon needs before any container can
//! start, not the settings document itself — that's parsed separately by
//! `oci_config::Settings` once `settings_path` is known.

use std::path::PathBuf;

use clap::Parser;
use getset::{CopyGetters, Getters};
use log::LevelFilter;

/// Default legacy-plugin directory differs between a target and a
/// developer build (distilled spec §4.3: "default `/usr/lib/plugins/dobby`
/// on target, `/opt/libexec` on dev").
#[cfg(debug_assertions)]
const DEFAULT_LEGACY_PLUGIN_DIR: &str = "/opt/libexec";
#[cfg(not(debug_assertions))]
const DEFAULT_LEGACY_PLUGIN_DIR: &str = "/usr/lib/plugins/dobby";

/// `dobby-supervisord`: the container lifecycle engine's process
/// entrypoint. The D-Bus/IPC transport and the readline shell that would
/// normally drive this engine are external collaborators (§1 "Out of
/// scope") — this binary wires the crates together and runs the reaper,
/// but exposes no IPC surface of its own.
#[derive(Parser, Getters, CopyGetters)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// Path to the JSON settings document (§6 "Settings document").
    #[get = "pub"]
    #[clap(long, env = "AI_SETTINGS_PATH", default_value = "/etc/rdk/dobby-settings.json")]
    settings_path: PathBuf,

    /// Path to the external OCI runtime binary (§6 "OCI runtime tool").
    #[get = "pub"]
    #[clap(long, env = "DOBBY_RUNTIME_BINARY", default_value = "crun")]
    runtime_binary: PathBuf,

    /// Root directory the OCI runtime tool tracks its containers under.
    #[get = "pub"]
    #[clap(long, env = "DOBBY_RUNTIME_ROOT", default_value = "/var/run/rdk/crun")]
    runtime_root: PathBuf,

    /// Log file the OCI runtime tool itself writes to.
    #[get = "pub"]
    #[clap(long, env = "DOBBY_RUNTIME_LOG", default_value = "/var/log/rdk/crun.log")]
    runtime_log: PathBuf,

    /// Directory legacy hook-library plugins are discovered from (§4.3).
    #[get = "pub"]
    #[clap(long, env = "DOBBY_LEGACY_PLUGIN_DIR", default_value = DEFAULT_LEGACY_PLUGIN_DIR)]
    legacy_plugin_dir: PathBuf,

    /// Log verbosity, forwarded to `RUST_LOG` ahead of `common::init_logging`
    /// unless the caller already set `RUST_LOG` explicitly.
    #[get_copy = "pub"]
    #[clap(long, env = "DOBBY_LOG_LEVEL", default_value = "info")]
    log_level: LevelFilter,
}

impl Config {
    /// Overrides derived from the environment variables §6 documents
    /// (`AI_WORKSPACE_PATH`, `AI_PERSISTENT_PATH`) are applied on top of
    /// the loaded settings document by `Engine::bootstrap`, not here —
    /// this type only owns the paths needed to find that document in the
    /// first place.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_come_from_clap_attributes() {
        let c = Config::parse_from(["dobby-supervisordd"]);
        assert_eq!(c.runtime_binary(), &PathBuf::from("crun"));
        assert_eq!(c.log_level(), LevelFilter::Info);
    }
}

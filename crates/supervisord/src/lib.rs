//! Top-level wiring (§9 "Singleton with shared ownership" redesign): owns
//! the `Engine` value that replaces the source's process-wide
//! shared-pointer singletons (readline, template engine). `main`
//! constructs exactly one `Engine` and hands references to it to whatever
//! external collaborator drives it — the D-Bus/IPC transport and readline
//! shell are both out of scope here (SPEC_FULL.md §1).

pub mod config;
pub mod platform;

use std::path::Path;
use std::sync::Arc;

use common::{EngineError, Result};
use oci_config::Settings;
use runtime::RuntimeConfig;
use supervisor::{Manager, StartRequest};

pub use config::Config;
pub use platform::PlatformInfo;

/// Owns the manager and the settings it was constructed from. Carries no
/// back-reference to anything that owns it, avoiding the cyclic
/// `shared_from_this` pattern §9 calls out.
pub struct Engine {
    pub manager: Arc<Manager>,
}

impl Engine {
    /// Loads the settings document from `config.settings_path()`, applies
    /// the `AI_WORKSPACE_PATH`/`AI_PERSISTENT_PATH` environment overrides
    /// (§6 "Environment variables consumed"), constructs the `Manager`,
    /// runs the startup stale-container sweep (§1 Non-goals: "a
    /// best-effort sweep removes stale containers on start"), and starts
    /// the reaper thread.
    ///
    /// Must be called before any other thread is spawned in the process:
    /// the reaper's blocked-signal mask is only inherited by threads
    /// spawned after it starts (§5 "Signal handlers ... are masked in all
    /// threads").
    pub fn bootstrap(config: &Config) -> Result<Self> {
        let mut settings = load_settings(config.settings_path())?;
        apply_env_overrides(&mut settings);

        let runtime_cfg = RuntimeConfig {
            binary: config.runtime_binary().clone(),
            root: config.runtime_root().clone(),
            log_path: config.runtime_log().clone(),
        };

        let manager = Arc::new(Manager::new(
            settings,
            runtime_cfg,
            config.legacy_plugin_dir(),
            None,
            None,
        ));

        manager.sweep_stale_containers();
        manager.start_reaper();

        Ok(Self { manager })
    }

    /// Starts a container by spec or bundle path, returning the
    /// descriptor value or `Descriptor::INVALID` on failure (§7
    /// "User-visible behavior").
    pub fn start(&self, req: StartRequest) -> i32 {
        self.manager.start(req)
    }

    /// Signals the reaper thread to exit (§4.5 "Termination at
    /// shutdown"). Doesn't wait for live containers to stop first —
    /// callers that need a clean drain should `stop` every container
    /// before calling this.
    pub fn shutdown(&self) {
        self.manager.stop_reaper();
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    let raw = std::fs::read_to_string(path).map_err(EngineError::from)?;
    Settings::from_str(&raw)
}

/// §6 "Environment variables consumed": `AI_WORKSPACE_PATH` and
/// `AI_PERSISTENT_PATH` override whatever the settings document says,
/// matching the original daemon's environment-wins-over-file precedence
/// for the two paths it reads this way.
fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(workspace) = std::env::var("AI_WORKSPACE_PATH") {
        settings.workspace_dir = workspace.into();
    }
    if let Ok(persistent) = std::env::var("AI_PERSISTENT_PATH") {
        settings.persistent_dir = persistent.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_win_over_the_settings_file() {
        let mut settings = Settings {
            workspace_dir: "/from/file".into(),
            persistent_dir: "/from/file/persist".into(),
            ..Settings::default()
        };
        std::env::set_var("AI_WORKSPACE_PATH", "/from/env");
        apply_env_overrides(&mut settings);
        std::env::remove_var("AI_WORKSPACE_PATH");
        assert_eq!(settings.workspace_dir, std::path::PathBuf::from("/from/env"));
        assert_eq!(settings.persistent_dir, std::path::PathBuf::from("/from/file/persist"));
    }
}

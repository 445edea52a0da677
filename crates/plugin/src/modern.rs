//! Modern ("RDK") plugins (§4.3). Declared in a bundle's `rdkPlugins` table
//! and invoked through the same launcher binary `oci-config::oci_build`
//! already wires into the OCI spec's `hooks` array for the hook points the
//! external OCI runtime drives. This module covers the three hook points
//! the supervisor drives itself instead of the OCI tool: PostInstallation
//! (once per bundle), PreCreation, and PostHalt.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use common::{EngineError, Result};
use log::{error, info, warn};

const PLUGIN_LAUNCHER: &str = "/usr/libexec/DobbyPluginLauncher";
const POST_HALT_TIMEOUT: Duration = Duration::from_secs(4);

fn run_launcher(point: &str, bundle_path: &Path) -> Result<bool> {
    let status = std::process::Command::new(PLUGIN_LAUNCHER)
        .arg(point)
        .arg(bundle_path)
        .stdin(Stdio::null())
        .status()
        .map_err(EngineError::from)?;
    Ok(status.success())
}

/// Runs PostInstallation, guarded by the on-disk marker so it only ever
/// runs once per bundle. `config.json` is backed up first; a failed or
/// errored attempt restores it, matching the original's
/// `config-dobby.json` restore dance.
pub fn run_post_installation(bundle_path: &Path) -> Result<bool> {
    if oci_config::postinstall_already_ran(bundle_path) {
        info!("postInstallation already ran for {}", bundle_path.display());
        return Ok(true);
    }

    oci_config::backup_config(bundle_path)?;
    match run_launcher("postinstallation", bundle_path) {
        Ok(true) => {
            oci_config::mark_postinstall_done(bundle_path)?;
            Ok(true)
        }
        Ok(false) => {
            error!("postInstallation hook failed for {}", bundle_path.display());
            oci_config::restore_config_backup(bundle_path)?;
            Ok(false)
        }
        Err(e) => {
            error!("postInstallation hook errored for {}: {e}", bundle_path.display());
            oci_config::restore_config_backup(bundle_path)?;
            Err(e)
        }
    }
}

/// Runs PreCreation, immediately before the OCI tool's `create`. A failure
/// here also restores the `config.json` backup PostInstallation left
/// behind, matching the original's shared `pluginFailure` path which
/// restores on either hook's failure, not only PostInstallation's.
pub fn run_pre_creation(bundle_path: &Path) -> Result<bool> {
    match run_launcher("precreation", bundle_path) {
        Ok(true) => Ok(true),
        Ok(false) => {
            error!("preCreation hook failed for {}", bundle_path.display());
            oci_config::restore_config_backup(bundle_path)?;
            Ok(false)
        }
        Err(e) => {
            error!("preCreation hook errored for {}: {e}", bundle_path.display());
            oci_config::restore_config_backup(bundle_path)?;
            Err(e)
        }
    }
}

/// Runs PostHalt with a 4-second timeout on a dedicated current-thread
/// `tokio` runtime, the same idiom `runtime`'s own create-timeout uses
/// (§5) — PostHalt must never be allowed to hang container teardown.
pub fn run_post_halt(bundle_path: &Path) -> Result<bool> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(EngineError::from)?;

    rt.block_on(async {
        let mut child = tokio::process::Command::new(PLUGIN_LAUNCHER)
            .arg("posthalt")
            .arg(bundle_path)
            .stdin(Stdio::null())
            .spawn()
            .map_err(EngineError::from)?;

        match tokio::time::timeout(POST_HALT_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => Ok(status.success()),
            Ok(Err(e)) => Err(EngineError::from(e)),
            Err(_) => {
                warn!(
                    "postHalt hook for {} timed out after {:?}, killing",
                    bundle_path.display(),
                    POST_HALT_TIMEOUT
                );
                let _ = child.start_kill();
                Ok(false)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_installation_skips_when_marker_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(oci_config::POSTINSTALL_MARKER), b"").unwrap();
        let ok = run_post_installation(dir.path()).unwrap();
        assert!(ok);
    }
}

//! The configuration pipeline (§4.1): turns a vendor spec (or an existing
//! OCI bundle) into a compliant `config.json` plus an in-memory
//! `ResolvedConfig`. A single processor failure aborts the whole pipeline;
//! the partial bundle is never written (`write_config_json` only runs once
//! every processor has succeeded).

mod oci_build;
mod processors;
pub mod resolved_config;
pub mod settings;

use std::path::Path;

use common::{DeviceAllowlist, EngineError, Result};
use serde_json::Value;

pub use resolved_config::{ResolvedConfig, SpecVersion};
pub use settings::Settings;

/// Fields §4.1 calls mandatory on the spec path.
const MANDATORY_FIELDS: &[&str] = &["args", "user", "memLimit"];

/// Name of the on-disk marker recording whether install-time hooks already
/// ran for a bundle (§4.1, §4.3).
pub const POSTINSTALL_MARKER: &str = "postinstallhooksuccess";
/// Backup of the pristine `config.json`, restored on a PostInstallation
/// failure (§4.3).
pub const CONFIG_BACKUP_NAME: &str = "config-dobby.json";

fn online_cpu_count() -> u32 {
    nix::unistd::sysconf(nix::unistd::SysconfVar::_SC_NPROCESSORS_ONLN)
        .ok()
        .flatten()
        .map(|n| n.max(1) as u32)
        .unwrap_or(1)
}

/// Merges `settings.default_plugins` into the rdkPlugins map with
/// `required: false`, skipping names already declared explicitly (an
/// explicit declaration always wins over a default).
fn merge_default_plugins(config: &mut ResolvedConfig, settings: &Settings) {
    for name in &settings.default_plugins {
        if config.rdk_plugins().contains_key(name) {
            continue;
        }
        let data = settings
            .plugin_default_data
            .get(name)
            .cloned()
            .unwrap_or(Value::Null);
        config.rdk_plugins_mut().insert(
            name.clone(),
            resolved_config::PluginEntry {
                data,
                required: false,
                depends_on: Vec::new(),
            },
        );
    }
}

fn check_mandatory(doc: &serde_json::Map<String, Value>) -> Result<()> {
    let missing: Vec<&str> = MANDATORY_FIELDS
        .iter()
        .copied()
        .filter(|f| !doc.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::missing_fields(&missing));
    }
    Ok(())
}

/// Runs the spec-path pipeline: parses `spec_json`, dispatches every
/// recognized field through its processor, checks mandatory fields, merges
/// default plugins, and writes `<bundle_path>/config.json`.
pub fn resolve_spec(
    spec_json: &str,
    settings: &Settings,
    device_allowlist: &dyn DeviceAllowlist,
    bundle_path: &Path,
    rootfs_path: &Path,
) -> Result<(ResolvedConfig, Value)> {
    let doc: Value = serde_json::from_str(spec_json).map_err(EngineError::from)?;
    let obj = doc
        .as_object()
        .ok_or_else(|| EngineError::config_invalid("<root>", "spec must be a JSON object"))?;

    check_mandatory(obj)?;

    let version_raw = obj
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::config_invalid("version", "required, must be \"1.0\" or \"1.1\""))?;
    let version = SpecVersion::parse(version_raw).ok_or_else(|| {
        EngineError::config_invalid("version", "must be \"1.0\" or \"1.1\"")
    })?;

    let mut config = ResolvedConfig::defaults(version, rootfs_path.to_path_buf());
    let table = processors::registry();

    let mut ctx = processors::PipelineContext {
        settings,
        device_allowlist,
        online_cpus: online_cpu_count(),
        config: &mut config,
    };

    for (field, value) in obj {
        if field == "version" {
            continue;
        }
        if let Some(processor) = table.get(field.as_str()) {
            processor.process(value, &mut ctx)?;
        }
        // Unknown fields are ignored (§4.1).
    }
    drop(ctx);

    merge_default_plugins(&mut config, settings);

    let json = oci_build::write_config_json(&config, bundle_path)?;
    Ok((config, json))
}

/// Runs the bundle-path pipeline (§4.1 "Bundle path"): parses an existing
/// `config.json`, then re-runs the reduced processor set
/// (`logging`/`ipc`/`gpu`/`drm`/`rdkServices`) over the `rdkPlugins`
/// subtree to populate the same in-memory fields `resolve_spec` would have.
pub fn resolve_bundle(
    bundle_path: &Path,
    settings: &Settings,
    device_allowlist: &dyn DeviceAllowlist,
) -> Result<ResolvedConfig> {
    let config_path = bundle_path.join("config.json");
    let raw = std::fs::read_to_string(&config_path).map_err(EngineError::from)?;
    let doc: Value = serde_json::from_str(&raw).map_err(EngineError::from)?;

    let rootfs_path = bundle_path.join("rootfs");
    let mut config = ResolvedConfig::defaults(SpecVersion::V1_1, rootfs_path);

    if let Some(user) = doc.pointer("/process/user") {
        config.uid = user.get("uid").and_then(Value::as_u64).unwrap_or(0) as u32;
        config.gid = user.get("gid").and_then(Value::as_u64).unwrap_or(0) as u32;
    }
    if let Some(args) = doc.pointer("/process/args").and_then(Value::as_array) {
        config.args = args.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
    }

    let rdk_plugins = doc
        .get("rdkPlugins")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let table = processors::bundle_path_registry();
    let mut ctx = processors::PipelineContext {
        settings,
        device_allowlist,
        online_cpus: online_cpu_count(),
        config: &mut config,
    };

    for entry in &rdk_plugins {
        let name = entry.get("name").and_then(Value::as_str).unwrap_or_default();
        let data = entry.get("data").cloned().unwrap_or(Value::Null);
        if let Some(processor) = table.get(name) {
            processor.process(&data, &mut ctx)?;
        }
    }
    drop(ctx);

    Ok(config)
}

/// Whether `<bundle>/postinstallhooksuccess` is present.
pub fn postinstall_already_ran(bundle_path: &Path) -> bool {
    bundle_path.join(POSTINSTALL_MARKER).exists()
}

/// Writes the marker after a successful PostInstallation pass.
pub fn mark_postinstall_done(bundle_path: &Path) -> Result<()> {
    std::fs::write(bundle_path.join(POSTINSTALL_MARKER), b"").map_err(EngineError::from)?;
    Ok(())
}

/// Backs up `config.json` to `config-dobby.json` before running
/// PostInstallation, so a failure can restore the pristine file (§4.3).
pub fn backup_config(bundle_path: &Path) -> Result<()> {
    std::fs::copy(
        bundle_path.join("config.json"),
        bundle_path.join(CONFIG_BACKUP_NAME),
    )
    .map_err(EngineError::from)?;
    Ok(())
}

/// Restores `config.json` from the backup made by `backup_config`.
pub fn restore_config_backup(bundle_path: &Path) -> Result<()> {
    std::fs::copy(
        bundle_path.join(CONFIG_BACKUP_NAME),
        bundle_path.join("config.json"),
    )
    .map_err(EngineError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct AllowAll;
    impl DeviceAllowlist for AllowAll {
        fn is_allowed(&self, _major: u32, _minor: u32) -> bool {
            true
        }
        fn resolve_major(&self, _driver_name: &str) -> Option<u32> {
            Some(1)
        }
    }

    fn settings() -> Settings {
        Settings {
            workspace_dir: "/tmp/dobby".into(),
            persistent_dir: "/tmp/dobby-persistent".into(),
            console_socket_path: "/tmp/dobby-console.sock".into(),
            network_address_range: "100.64.11.0".parse().unwrap(),
            ..Default::default()
        }
    }

    fn minimal_spec() -> &'static str {
        r#"{
            "version": "1.0",
            "args": ["/bin/true"],
            "user": {"uid": 30000, "gid": 30000},
            "memLimit": 4194304
        }"#
    }

    #[test]
    fn minimal_spec_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).unwrap();
        let (config, json) =
            resolve_spec(minimal_spec(), &settings(), &AllowAll, dir.path(), &rootfs).unwrap();
        assert_eq!(config.uid(), 30000);
        assert_eq!(config.mem_limit(), 4194304);
        assert!(dir.path().join("config.json").exists());
        assert_eq!(json["process"]["args"][0], "/bin/true");
    }

    #[test]
    fn root_uid_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let spec = r#"{"version":"1.0","args":["/bin/true"],"user":{"uid":0,"gid":0},"memLimit":4194304}"#;
        let err = resolve_spec(spec, &settings(), &AllowAll, dir.path(), dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { field, .. } if field == "user.uid"));
    }

    #[test]
    fn missing_mem_limit_reports_field() {
        let dir = tempfile::tempdir().unwrap();
        let spec = r#"{"version":"1.0","args":["/bin/true"],"user":{"uid":100,"gid":100}}"#;
        let err = resolve_spec(spec, &settings(), &AllowAll, dir.path(), dir.path()).unwrap_err();
        match err {
            EngineError::ConfigInvalid { field, .. } => assert!(field.contains("memLimit")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cores_expression_filters_by_online_count() {
        use processors::hardware::parse_cores_for_test;
        assert_eq!(parse_cores_for_test("0-1,3", 2), vec![0, 1]);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).unwrap();
        let mut doc: HashMap<&str, Value> = HashMap::new();
        doc.insert("version", Value::String("1.0".into()));
        doc.insert("args", serde_json::json!(["/bin/true"]));
        doc.insert("user", serde_json::json!({"uid": 100, "gid": 100}));
        doc.insert("memLimit", serde_json::json!(4194304));
        doc.insert("somethingTotallyMadeUp", serde_json::json!(true));
        let spec = serde_json::to_string(&doc).unwrap();
        resolve_spec(&spec, &settings(), &AllowAll, dir.path(), &rootfs).unwrap();
    }

    struct DenyAll;
    impl DeviceAllowlist for DenyAll {
        fn is_allowed(&self, _major: u32, _minor: u32) -> bool {
            false
        }
        fn resolve_major(&self, _driver_name: &str) -> Option<u32> {
            None
        }
    }

    #[test]
    fn device_not_in_allowlist_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).unwrap();
        let mut doc: HashMap<&str, Value> = HashMap::new();
        doc.insert("version", Value::String("1.0".into()));
        doc.insert("args", serde_json::json!(["/bin/true"]));
        doc.insert("user", serde_json::json!({"uid": 100, "gid": 100}));
        doc.insert("memLimit", serde_json::json!(4194304));
        doc.insert(
            "devices",
            serde_json::json!([{"major": 10, "minor": 200, "access": "rw"}]),
        );
        let spec = serde_json::to_string(&doc).unwrap();
        let err = resolve_spec(&spec, &settings(), &DenyAll, dir.path(), &rootfs).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { field, .. } if field == "devices"));
    }

    #[test]
    fn capability_outside_allowed_set_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).unwrap();
        let mut doc: HashMap<&str, Value> = HashMap::new();
        doc.insert("version", Value::String("1.0".into()));
        doc.insert("args", serde_json::json!(["/bin/true"]));
        doc.insert("user", serde_json::json!({"uid": 100, "gid": 100}));
        doc.insert("memLimit", serde_json::json!(4194304));
        doc.insert("capabilities", serde_json::json!(["CAP_SYS_ADMIN"]));
        let spec = serde_json::to_string(&doc).unwrap();
        let err = resolve_spec(&spec, &settings(), &AllowAll, dir.path(), &rootfs).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { field, .. } if field == "capabilities"));
    }

    #[test]
    fn seccomp_rule_with_empty_names_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).unwrap();
        let mut doc: HashMap<&str, Value> = HashMap::new();
        doc.insert("version", Value::String("1.0".into()));
        doc.insert("args", serde_json::json!(["/bin/true"]));
        doc.insert("user", serde_json::json!({"uid": 100, "gid": 100}));
        doc.insert("memLimit", serde_json::json!(4194304));
        doc.insert(
            "seccomp",
            serde_json::json!({
                "defaultAction": "SCMP_ACT_ALLOW",
                "syscalls": [{"action": "SCMP_ACT_ERRNO", "names": []}]
            }),
        );
        let spec = serde_json::to_string(&doc).unwrap();
        let err = resolve_spec(&spec, &settings(), &AllowAll, dir.path(), &rootfs).unwrap_err();
        match err {
            EngineError::ConfigInvalid { field, .. } => {
                assert_eq!(field, "seccomp.syscalls[].names")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn console_limit_below_negative_one_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).unwrap();
        let mut doc: HashMap<&str, Value> = HashMap::new();
        doc.insert("version", Value::String("1.0".into()));
        doc.insert("args", serde_json::json!(["/bin/true"]));
        doc.insert("user", serde_json::json!({"uid": 100, "gid": 100}));
        doc.insert("memLimit", serde_json::json!(4194304));
        doc.insert(
            "console",
            serde_json::json!({"path": "/tmp/dobby.log", "limit": -99}),
        );
        let spec = serde_json::to_string(&doc).unwrap();
        let (config, _) =
            resolve_spec(&spec, &settings(), &AllowAll, dir.path(), &rootfs).unwrap();
        match config.console {
            crate::resolved_config::ConsoleSink::File { limit, .. } => assert_eq!(limit, -1),
            other => panic!("unexpected console sink: {other:?}"),
        }
    }

    #[test]
    fn mount_destination_with_dotdot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).unwrap();
        let mut doc: HashMap<&str, Value> = HashMap::new();
        doc.insert("version", Value::String("1.0".into()));
        doc.insert("args", serde_json::json!(["/bin/true"]));
        doc.insert("user", serde_json::json!({"uid": 100, "gid": 100}));
        doc.insert("memLimit", serde_json::json!(4194304));
        doc.insert(
            "mounts",
            serde_json::json!([{
                "source": "/opt/data",
                "destination": "/opt/../etc",
                "type": "bind"
            }]),
        );
        let spec = serde_json::to_string(&doc).unwrap();
        let err = resolve_spec(&spec, &settings(), &AllowAll, dir.path(), &rootfs).unwrap_err();
        assert!(
            matches!(err, EngineError::ConfigInvalid { field, .. } if field == "mounts[].destination")
        );
    }
}

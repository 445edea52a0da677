//! Renders a `ResolvedConfig` into a compliant OCI `config.json`. Builds the
//! typed `oci_spec::runtime::Spec` the teacher already depends on, then
//! splices in the vendor `rdkPlugins` table as a JSON-level extension (it
//! has no first-class representation in the OCI schema) — a typed builder
//! standing in for the original's textual `{{TOKEN}}` template engine.

use std::fs::File;
use std::path::Path;

use common::{EngineError, Result};
use oci_spec::runtime::{
    LinuxBuilder, LinuxDeviceBuilder, LinuxResourcesBuilder, MountBuilder, ProcessBuilder,
    RootBuilder, SpecBuilder, UserBuilder,
};
use serde_json::{json, Value};

use crate::resolved_config::{ConsoleSink, ResolvedConfig};

const PLUGIN_LAUNCHER: &str = "/usr/libexec/DobbyPluginLauncher";

fn build_env(config: &ResolvedConfig) -> Vec<String> {
    config.env.clone()
}

fn build_mounts(config: &ResolvedConfig) -> Result<Vec<oci_spec::runtime::Mount>> {
    let mut mounts = oci_spec::runtime::get_default_mounts();
    for entry in config.oci_mounts() {
        let mut builder = MountBuilder::default();
        builder = builder.destination(entry.destination.clone());
        if let Some(source) = &entry.source {
            builder = builder.source(source.clone());
        }
        if let Some(typ) = &entry.typ {
            builder = builder.typ(typ.clone());
        }
        if !entry.options.is_empty() {
            builder = builder.options(entry.options.clone());
        }
        mounts.push(
            builder
                .build()
                .map_err(|e| EngineError::config_invalid("mounts", e.to_string()))?,
        );
    }
    Ok(mounts)
}

fn build_devices(config: &ResolvedConfig) -> Result<Vec<oci_spec::runtime::LinuxDevice>> {
    config
        .devices()
        .iter()
        .map(|d| {
            LinuxDeviceBuilder::default()
                .path(format!("/dev/node{}-{}", d.major, d.minor))
                .major(d.major as i64)
                .minor(d.minor as i64)
                .typ("c")
                .build()
                .map_err(|e| EngineError::config_invalid("devices", e.to_string()))
        })
        .collect()
}

/// Emits the plugin-launcher hook entries that cause the external OCI
/// runtime to invoke the modern-plugin launcher at the four hook points it
/// owns (PostInstallation and PreCreation are invoked directly by
/// `plugin::modern`, not through OCI hooks).
fn build_hooks(bundle_path: &Path) -> oci_spec::runtime::Hooks {
    use oci_spec::runtime::HookBuilder;
    let hook = |point: &str| {
        HookBuilder::default()
            .path(PLUGIN_LAUNCHER)
            .args(vec![
                PLUGIN_LAUNCHER.to_string(),
                point.to_string(),
                bundle_path.display().to_string(),
            ])
            .build()
            .expect("static hook fields always build")
    };
    oci_spec::runtime::HooksBuilder::default()
        .create_runtime(vec![hook("createRuntime")])
        .create_container(vec![hook("createContainer")])
        .start_container(vec![hook("startContainer")])
        .poststart(vec![hook("postStart")])
        .poststop(vec![hook("postStop")])
        .build()
        .expect("static hook fields always build")
}

fn plugin_table(config: &ResolvedConfig) -> Value {
    let mut entries = Vec::new();
    for (name, entry) in config.rdk_plugins() {
        entries.push(json!({
            "name": name,
            "data": entry.data,
            "required": entry.required,
            "dependsOn": entry.depends_on,
        }));
    }
    Value::Array(entries)
}

/// Builds the spec, writes `<bundle>/config.json`, and returns the
/// serialized JSON `Value` for re-parse-and-compare round-trip tests.
pub fn write_config_json(config: &ResolvedConfig, bundle_path: &Path) -> Result<Value> {
    let version_tag = match config.version() {
        crate::resolved_config::SpecVersion::V1_0 => "1.0.1",
        crate::resolved_config::SpecVersion::V1_1 => "1.0.1",
    };

    let user = UserBuilder::default()
        .uid(config.uid())
        .gid(config.gid())
        .build()
        .map_err(|e| EngineError::config_invalid("user", e.to_string()))?;

    let mut rlimits = Vec::new();
    if let Some(rt) = config.rt_priority() {
        use oci_spec::runtime::POSIXRlimitBuilder;
        rlimits.push(
            POSIXRlimitBuilder::default()
                .typ("RLIMIT_RTPRIO")
                .soft(rt.limit.unwrap_or(rt.default).max(0) as u64)
                .hard(rt.limit.unwrap_or(rt.default).max(0) as u64)
                .build()
                .map_err(|e| EngineError::config_invalid("rtPriority", e.to_string()))?,
        );
    }

    let mut process_builder = ProcessBuilder::default();
    process_builder = process_builder
        .terminal(!matches!(config.console(), ConsoleSink::DevNull))
        .user(user)
        .args(config.args().clone())
        .env(build_env(config))
        .cwd(config.cwd().clone())
        .no_new_privileges(config.no_new_privileges());
    if !rlimits.is_empty() {
        process_builder = process_builder.rlimits(rlimits);
    }
    let process = process_builder
        .build()
        .map_err(|e| EngineError::config_invalid("process", e.to_string()))?;

    let root = RootBuilder::default()
        .path("rootfs")
        .readonly(false)
        .build()
        .map_err(|e| EngineError::config_invalid("root", e.to_string()))?;

    let mut resources_builder = LinuxResourcesBuilder::default();
    if config.mem_limit() > 0 {
        use oci_spec::runtime::LinuxMemoryBuilder;
        resources_builder = resources_builder.memory(
            LinuxMemoryBuilder::default()
                .limit(config.mem_limit() as i64)
                .build()
                .map_err(|e| EngineError::config_invalid("memLimit", e.to_string()))?,
        );
    }
    if let Some(shares) = config.cpu().shares {
        use oci_spec::runtime::LinuxCpuBuilder;
        resources_builder = resources_builder.cpu(
            LinuxCpuBuilder::default()
                .shares(shares)
                .build()
                .map_err(|e| EngineError::config_invalid("cpu.shares", e.to_string()))?,
        );
    }
    let resources = resources_builder
        .build()
        .map_err(|e| EngineError::config_invalid("linux.resources", e.to_string()))?;

    let linux = LinuxBuilder::default()
        .resources(resources)
        .devices(build_devices(config)?)
        .build()
        .map_err(|e| EngineError::config_invalid("linux", e.to_string()))?;

    let spec = SpecBuilder::default()
        .version(version_tag)
        .process(process)
        .root(root)
        .mounts(build_mounts(config)?)
        .hooks(build_hooks(bundle_path))
        .linux(linux)
        .build()
        .map_err(|e| EngineError::config_invalid("spec", e.to_string()))?;

    let mut json = serde_json::to_value(&spec).map_err(EngineError::from)?;
    json["rdkPlugins"] = plugin_table(config);

    let path = bundle_path.join("config.json");
    let file = File::create(&path).map_err(EngineError::from)?;
    serde_json::to_writer_pretty(file, &json).map_err(EngineError::from)?;

    Ok(json)
}

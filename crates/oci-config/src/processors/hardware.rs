//! `gpu`, `vpu`, `devices`, `cpu`.

use common::{EngineError, Result};
use serde_json::Value;

use crate::resolved_config::{CpuConfig, DeviceEntry, MountKind, MountPoint, OciMountEntry};
use crate::settings::HardwareAccessSettings;

use super::{PipelineContext, Processor};

const DEFAULT_HW_MEM_LIMIT: u64 = 64 * 1024 * 1024;

fn merge_hardware(ctx: &mut PipelineContext<'_>, hw: &HardwareAccessSettings) {
    if ctx.config.mem_limit == 0 {
        ctx.config.mem_limit = DEFAULT_HW_MEM_LIMIT;
    }
    for mount in &hw.extra_mounts {
        ctx.config.oci_mounts.push(OciMountEntry {
            source: Some(mount.source.clone().into()),
            destination: mount.destination.clone().into(),
            typ: mount.typ.clone(),
            options: mount.options.clone(),
        });
        ctx.config.mounts.push(MountPoint {
            kind: MountKind::Directory,
            destination: mount.destination.clone().into(),
        });
    }
    for env in &hw.extra_env {
        ctx.config.env.push(env.clone());
    }
}

pub(crate) struct GpuProcessor;
impl Processor for GpuProcessor {
    fn field(&self) -> &'static str {
        "gpu"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let enable = value
            .get("enable")
            .and_then(Value::as_bool)
            .ok_or_else(|| EngineError::config_invalid("gpu.enable", "must be a boolean"))?;
        ctx.config.gpu_enable = enable;
        if enable {
            let hw = ctx.settings.gpu.clone();
            merge_hardware(ctx, &hw);
        }
        Ok(())
    }
}

pub(crate) struct VpuProcessor;
impl Processor for VpuProcessor {
    fn field(&self) -> &'static str {
        "vpu"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let enable = value
            .get("enable")
            .and_then(Value::as_bool)
            .ok_or_else(|| EngineError::config_invalid("vpu.enable", "must be a boolean"))?;
        ctx.config.vpu_enable = enable;
        if enable {
            let hw = ctx.settings.vpu.clone();
            merge_hardware(ctx, &hw);
        }
        Ok(())
    }
}

/// `major` may be a driver name (looked up via `DeviceAllowlist::resolve_major`,
/// which is backed by a `/proc/devices` cache in `state`) or an integer in
/// `[1, 1024]`. Every requested `(major, minor)` must already be present in
/// the host allowlist.
pub(crate) struct DevicesProcessor;
impl Processor for DevicesProcessor {
    fn field(&self) -> &'static str {
        "devices"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let arr = value
            .as_array()
            .ok_or_else(|| EngineError::config_invalid("devices", "must be an array"))?;
        for entry in arr {
            let major = match entry.get("major") {
                Some(Value::String(name)) => {
                    ctx.device_allowlist.resolve_major(name).ok_or_else(|| {
                        EngineError::config_invalid(
                            "devices[].major",
                            format!("unknown driver name '{name}'"),
                        )
                    })?
                }
                Some(Value::Number(n)) => {
                    let major = n.as_u64().unwrap_or(0) as u32;
                    if !(1..=1024).contains(&major) {
                        return Err(EngineError::config_invalid(
                            "devices[].major",
                            "integer major must be in [1, 1024]",
                        ));
                    }
                    major
                }
                _ => {
                    return Err(EngineError::config_invalid(
                        "devices[].major",
                        "must be a string driver name or an integer",
                    ))
                }
            };
            let minor = entry
                .get("minor")
                .and_then(Value::as_u64)
                .ok_or_else(|| EngineError::config_invalid("devices[].minor", "required"))?
                as u32;
            if minor > 1024 {
                return Err(EngineError::config_invalid(
                    "devices[].minor",
                    "must be in [0, 1024]",
                ));
            }
            let access = entry
                .get("access")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::config_invalid("devices[].access", "required"))?;
            if !matches!(access, "r" | "w" | "rw" | "wr") {
                return Err(EngineError::config_invalid(
                    "devices[].access",
                    "must be one of r, w, rw, wr",
                ));
            }
            if !ctx.device_allowlist.is_allowed(major, minor) {
                return Err(EngineError::config_invalid(
                    "devices",
                    format!("({major}, {minor}) is not in the host device allowlist"),
                ));
            }
            ctx.config.devices.push(DeviceEntry {
                major,
                minor,
                access: access.to_string(),
            });
        }
        Ok(())
    }
}

/// Parses a comma/range expression like `"0-1,3"` into a sorted, deduped
/// bit-set of cpu indices, capped at 8 entries and filtered by the host's
/// online-cpu count.
fn parse_cores(expr: &str, online_cpus: u32) -> Result<Vec<u32>> {
    let mut cores = std::collections::BTreeSet::new();
    for part in expr.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u32 = lo
                .trim()
                .parse()
                .map_err(|_| EngineError::config_invalid("cpu.cores", "invalid range"))?;
            let hi: u32 = hi
                .trim()
                .parse()
                .map_err(|_| EngineError::config_invalid("cpu.cores", "invalid range"))?;
            for c in lo..=hi {
                cores.insert(c);
            }
        } else {
            let c: u32 = part
                .parse()
                .map_err(|_| EngineError::config_invalid("cpu.cores", "invalid index"))?;
            cores.insert(c);
        }
    }
    let filtered: Vec<u32> = cores
        .into_iter()
        .filter(|c| *c < online_cpus)
        .take(8)
        .collect();
    Ok(filtered)
}

#[cfg(test)]
pub(crate) fn parse_cores_for_test(expr: &str, online_cpus: u32) -> Vec<u32> {
    parse_cores(expr, online_cpus).unwrap()
}

pub(crate) struct CpuProcessor;
impl Processor for CpuProcessor {
    fn field(&self) -> &'static str {
        "cpu"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let mut cpu = CpuConfig::default();
        if let Some(shares) = value.get("shares").and_then(Value::as_u64) {
            if shares == 0 || shares > 100 {
                return Err(EngineError::config_invalid("cpu.shares", "must be in (0, 100]"));
            }
            cpu.shares = Some((1024 * shares) / 100);
        }
        if let Some(cores_expr) = value.get("cores").and_then(Value::as_str) {
            cpu.cores = Some(parse_cores(cores_expr, ctx.online_cpus)?);
        }
        ctx.config.cpu = cpu;
        Ok(())
    }
}

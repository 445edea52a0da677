//! `mounts`. `type == "loop"` entries are diverted to the `storage` plugin
//! instead of becoming OCI mounts; recognized option tokens map to flag
//! bits so the `storage` plugin doesn't have to re-parse fstab syntax.

use common::{EngineError, Result};
use serde_json::Value;

use crate::resolved_config::{LoopMount, MountKind, MountPoint, OciMountEntry};

use super::{PipelineContext, Processor};

pub(crate) const OPT_RDONLY: u32 = 1 << 0;
pub(crate) const OPT_SYNCHRONOUS: u32 = 1 << 1;
pub(crate) const OPT_NOSUID: u32 = 1 << 2;
pub(crate) const OPT_DIRSYNC: u32 = 1 << 3;
pub(crate) const OPT_NODIRATIME: u32 = 1 << 4;
pub(crate) const OPT_RELATIME: u32 = 1 << 5;
pub(crate) const OPT_NOEXEC: u32 = 1 << 6;
pub(crate) const OPT_NODEV: u32 = 1 << 7;
pub(crate) const OPT_NOATIME: u32 = 1 << 8;
pub(crate) const OPT_STRICTATIME: u32 = 1 << 9;

fn option_flag(token: &str) -> Option<u32> {
    Some(match token {
        "ro" => OPT_RDONLY,
        "sync" => OPT_SYNCHRONOUS,
        "nosuid" => OPT_NOSUID,
        "dirsync" => OPT_DIRSYNC,
        "nodiratime" => OPT_NODIRATIME,
        "relatime" => OPT_RELATIME,
        "noexec" => OPT_NOEXEC,
        "nodev" => OPT_NODEV,
        "noatime" => OPT_NOATIME,
        "strictatime" => OPT_STRICTATIME,
        _ => return None,
    })
}

fn flags_for(options: &[String]) -> u32 {
    options.iter().filter_map(|o| option_flag(o)).fold(0, |a, b| a | b)
}

fn validate_destination(destination: &str) -> Result<()> {
    if destination.split('/').any(|c| c == "..") {
        return Err(EngineError::config_invalid(
            "mounts[].destination",
            "must not contain '..'",
        ));
    }
    Ok(())
}

pub(crate) struct MountsProcessor;
impl Processor for MountsProcessor {
    fn field(&self) -> &'static str {
        "mounts"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let arr = value
            .as_array()
            .ok_or_else(|| EngineError::config_invalid("mounts", "must be an array"))?;
        for entry in arr {
            let source = entry
                .get("source")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::config_invalid("mounts[].source", "required"))?;
            let destination = entry
                .get("destination")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::config_invalid("mounts[].destination", "required"))?;
            validate_destination(destination)?;
            let typ = entry.get("type").and_then(Value::as_str);
            let options: Vec<String> = entry
                .get("options")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();

            if typ == Some("loop") {
                ctx.config.loop_mounts.push(LoopMount {
                    source: source.to_string(),
                    destination: destination.to_string(),
                    fstype: entry.get("fstype").and_then(Value::as_str).map(str::to_string),
                    flags: flags_for(&options),
                    options,
                });
            } else {
                ctx.config.oci_mounts.push(OciMountEntry {
                    source: Some(source.into()),
                    destination: destination.into(),
                    typ: typ.map(str::to_string),
                    options,
                });
            }
            ctx.config.mounts.push(MountPoint {
                kind: MountKind::Directory,
                destination: destination.into(),
            });
        }
        Ok(())
    }
}

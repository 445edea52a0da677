//! `env`, `args`, `cwd`, `user`, `userNs`, `rtPriority`, `restartOnCrash`,
//! `memLimit` and `etc` — the processors with no sub-collaborator besides
//! the resolved config itself.

use common::{EngineError, Result};
use serde_json::Value;

use crate::resolved_config::RtPriority;

use super::{PipelineContext, Processor};

/// `^(\w+)=(\w+)$` without pulling in `regex`: both sides must be non-empty
/// runs of ASCII alphanumerics/underscore.
fn is_word(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn validate_settings_env(entry: &str) -> bool {
    match entry.split_once('=') {
        Some((name, value)) => is_word(name) && is_word(value),
        None => false,
    }
}

pub(crate) struct EnvProcessor;
impl Processor for EnvProcessor {
    fn field(&self) -> &'static str {
        "env"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let arr = value.as_array().ok_or_else(|| {
            EngineError::config_invalid("env", "must be an array of \"NAME=VALUE\" strings")
        })?;
        for item in arr {
            let entry = item.as_str().ok_or_else(|| {
                EngineError::config_invalid("env", "entries must be strings")
            })?;
            ctx.config.env.push(entry.to_string());
        }
        // Settings-supplied extras are validated more strictly, since they
        // feed a fixed env-var substitution rather than being opaque
        // pass-through strings the process itself interprets.
        for extra in &ctx.settings.extra_env {
            if !validate_settings_env(extra) {
                return Err(EngineError::config_invalid(
                    "env",
                    format!("settings-supplied entry '{extra}' doesn't match NAME=VALUE"),
                ));
            }
            ctx.config.env.push(extra.clone());
        }
        Ok(())
    }
}

pub(crate) struct ArgsProcessor;
impl Processor for ArgsProcessor {
    fn field(&self) -> &'static str {
        "args"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let arr = value
            .as_array()
            .ok_or_else(|| EngineError::config_invalid("args", "must be a non-empty array"))?;
        if arr.is_empty() {
            return Err(EngineError::config_invalid("args", "must not be empty"));
        }
        ctx.config.args = arr
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| EngineError::config_invalid("args", "entries must be strings"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }
}

pub(crate) struct CwdProcessor;
impl Processor for CwdProcessor {
    fn field(&self) -> &'static str {
        "cwd"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        ctx.config.cwd = value
            .as_str()
            .ok_or_else(|| EngineError::config_invalid("cwd", "must be a string"))?
            .to_string();
        Ok(())
    }
}

pub(crate) struct UserProcessor;
impl Processor for UserProcessor {
    fn field(&self) -> &'static str {
        "user"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let uid = value
            .get("uid")
            .and_then(Value::as_u64)
            .ok_or_else(|| EngineError::config_invalid("user.uid", "must be an integer"))?;
        let gid = value
            .get("gid")
            .and_then(Value::as_u64)
            .ok_or_else(|| EngineError::config_invalid("user.gid", "must be an integer"))?;
        if uid == 0 || uid >= 65535 {
            return Err(EngineError::config_invalid(
                "user.uid",
                "must be in (0, 65535)",
            ));
        }
        if gid >= 65535 {
            return Err(EngineError::config_invalid("user.gid", "must be < 65535"));
        }
        ctx.config.uid = uid as u32;
        ctx.config.gid = gid as u32;
        Ok(())
    }
}

pub(crate) struct UserNsProcessor;
impl Processor for UserNsProcessor {
    fn field(&self) -> &'static str {
        "userNs"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        ctx.config.user_ns = value
            .as_bool()
            .ok_or_else(|| EngineError::config_invalid("userNs", "must be a boolean"))?;
        Ok(())
    }
}

pub(crate) struct RestartOnCrashProcessor;
impl Processor for RestartOnCrashProcessor {
    fn field(&self) -> &'static str {
        "restartOnCrash"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        ctx.config.restart_on_crash = value
            .as_bool()
            .ok_or_else(|| EngineError::config_invalid("restartOnCrash", "must be a boolean"))?;
        Ok(())
    }
}

pub(crate) struct MemLimitProcessor;
impl Processor for MemLimitProcessor {
    fn field(&self) -> &'static str {
        "memLimit"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let limit = value
            .as_u64()
            .ok_or_else(|| EngineError::config_invalid("memLimit", "must be a positive integer"))?;
        if limit == 0 {
            return Err(EngineError::config_invalid("memLimit", "must be > 0"));
        }
        ctx.config.mem_limit = limit;
        Ok(())
    }
}

/// v1.0 accepts a bare integer `default`; v1.1 requires `{default, limit}`.
/// A `limit` present but non-null-non-int is treated as ConfigInvalid
/// rather than read into an uninitialized variable (§9 open question).
pub(crate) struct RtPriorityProcessor;
impl Processor for RtPriorityProcessor {
    fn field(&self) -> &'static str {
        "rtPriority"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        use crate::resolved_config::SpecVersion;
        match ctx.config.version() {
            SpecVersion::V1_0 => {
                let default = value.as_i64().ok_or_else(|| {
                    EngineError::config_invalid("rtPriority", "v1.0 requires an integer")
                })?;
                ctx.config.rt_priority = Some(RtPriority {
                    default,
                    limit: None,
                });
            }
            SpecVersion::V1_1 => {
                let default = value.get("default").and_then(Value::as_i64).ok_or_else(|| {
                    EngineError::config_invalid("rtPriority.default", "must be an integer")
                })?;
                let limit = match value.get("limit") {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(v.as_i64().ok_or_else(|| {
                        EngineError::config_invalid(
                            "rtPriority.limit",
                            "must be an integer or null",
                        )
                    })?),
                };
                ctx.config.rt_priority = Some(RtPriority { default, limit });
            }
        }
        Ok(())
    }
}

/// Caller-supplied `/etc` overrides. Any field omitted keeps whatever
/// default `bundle::Rootfs` would otherwise synthesize from uid/gid.
pub(crate) struct EtcProcessor;
impl Processor for EtcProcessor {
    fn field(&self) -> &'static str {
        "etc"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let obj = value
            .as_object()
            .ok_or_else(|| EngineError::config_invalid("etc", "must be an object"))?;
        if let Some(v) = obj.get("hosts").and_then(Value::as_str) {
            ctx.config.etc.hosts = v.to_string();
        }
        if let Some(v) = obj.get("services").and_then(Value::as_str) {
            ctx.config.etc.services = v.to_string();
        }
        if let Some(v) = obj.get("passwd").and_then(Value::as_str) {
            ctx.config.etc.passwd = v.to_string();
        }
        if let Some(v) = obj.get("group").and_then(Value::as_str) {
            ctx.config.etc.group = v.to_string();
        }
        if let Some(v) = obj.get("ldSoPreload").and_then(Value::as_str) {
            ctx.config.etc.ld_so_preload = v.to_string();
        }
        Ok(())
    }
}

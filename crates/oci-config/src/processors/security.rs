//! `capabilities`, `seccomp`, and the two bundle-path processors that
//! always fail by design (§9 open question: `processRdkServices` and
//! `processDrm` always return failure in the original; we match that
//! observed behavior rather than silently tolerate the fields).

use common::{EngineError, Result};
use serde_json::Value;

use crate::resolved_config::{SeccompConfig, SeccompRule};

use super::{PipelineContext, Processor};

const ALLOWED_CAPABILITIES: &[&str] = &[
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_RAW",
];

pub(crate) struct CapabilitiesProcessor;
impl Processor for CapabilitiesProcessor {
    fn field(&self) -> &'static str {
        "capabilities"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let arr = value
            .as_array()
            .ok_or_else(|| EngineError::config_invalid("capabilities", "must be an array"))?;
        let mut caps = Vec::with_capacity(arr.len());
        for item in arr {
            let name = item
                .as_str()
                .ok_or_else(|| EngineError::config_invalid("capabilities[]", "must be a string"))?;
            if !ALLOWED_CAPABILITIES.contains(&name) {
                return Err(EngineError::config_invalid(
                    "capabilities",
                    format!("'{name}' is not in the allowed set {ALLOWED_CAPABILITIES:?}"),
                ));
            }
            caps.push(name.to_string());
        }
        if !caps.is_empty() {
            ctx.config.no_new_privileges = false;
        }
        ctx.config.capabilities = caps;
        Ok(())
    }
}

const ALLOWED_ACTIONS: &[&str] = &["SCMP_ACT_ERRNO", "SCMP_ACT_ALLOW"];

pub(crate) struct SeccompProcessor;
impl Processor for SeccompProcessor {
    fn field(&self) -> &'static str {
        "seccomp"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let default_action = value
            .get("defaultAction")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::config_invalid("seccomp.defaultAction", "required"))?;
        if !ALLOWED_ACTIONS.contains(&default_action) {
            return Err(EngineError::config_invalid(
                "seccomp.defaultAction",
                format!("must be one of {ALLOWED_ACTIONS:?}"),
            ));
        }
        let mut rules = Vec::new();
        if let Some(syscalls) = value.get("syscalls").and_then(Value::as_array) {
            for rule in syscalls {
                let action = rule
                    .get("action")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::config_invalid("seccomp.syscalls[].action", "required"))?;
                if !ALLOWED_ACTIONS.contains(&action) {
                    return Err(EngineError::config_invalid(
                        "seccomp.syscalls[].action",
                        format!("must be one of {ALLOWED_ACTIONS:?}"),
                    ));
                }
                let names: Vec<String> = rule
                    .get("names")
                    .and_then(Value::as_array)
                    .ok_or_else(|| EngineError::config_invalid("seccomp.syscalls[].names", "required"))?
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                if names.is_empty() {
                    return Err(EngineError::config_invalid(
                        "seccomp.syscalls[].names",
                        "must not be empty",
                    ));
                }
                rules.push(SeccompRule {
                    action: action.to_string(),
                    names,
                });
            }
        }
        ctx.config.seccomp = Some(SeccompConfig {
            default_action: default_action.to_string(),
            rules,
        });
        Ok(())
    }
}

/// `drm` and `rdkServices` on the bundle path: the original always returns
/// failure for these regardless of content, so we do too.
pub(crate) struct AlwaysFailProcessor(pub &'static str);
impl Processor for AlwaysFailProcessor {
    fn field(&self) -> &'static str {
        self.0
    }
    fn process(&self, _value: &Value, _ctx: &mut PipelineContext<'_>) -> Result<()> {
        Err(EngineError::config_invalid(
            self.0,
            "not supported on the bundle path",
        ))
    }
}

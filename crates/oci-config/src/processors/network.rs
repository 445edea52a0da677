//! `network`, `dbus`, and the bundle-path `ipc` reparse.

use common::{EngineError, Result};
use serde_json::Value;

use crate::resolved_config::{DbusBus, DbusSelection, NetworkMode, PluginEntry};

use super::{PipelineContext, Processor};

pub(crate) struct NetworkProcessor;
impl Processor for NetworkProcessor {
    fn field(&self) -> &'static str {
        "network"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let mode = match value.as_str() {
            Some("nat") => NetworkMode::Nat,
            Some("open") => NetworkMode::Open,
            Some("private") => NetworkMode::Private,
            _ => {
                return Err(EngineError::config_invalid(
                    "network",
                    "must be one of \"nat\", \"open\", \"private\"",
                ))
            }
        };
        ctx.config.network = Some(mode);
        let plugin_mode = match mode {
            NetworkMode::Private => "none",
            NetworkMode::Nat | NetworkMode::Open => "nat",
        };
        let mut data = serde_json::json!({ "type": plugin_mode });
        if matches!(mode, NetworkMode::Nat | NetworkMode::Open) {
            data["dnsmasq"] = serde_json::json!(true);
        }
        ctx.config.rdk_plugins.insert(
            "networking".into(),
            PluginEntry {
                data,
                required: false,
                depends_on: Vec::new(),
            },
        );
        Ok(())
    }
}

fn parse_bus(name: &str, field: &'static str) -> Result<DbusBus> {
    match name {
        "system" => Ok(DbusBus::System),
        "ai-public" => Ok(DbusBus::AiPublic),
        "ai-private" => Ok(DbusBus::AiPrivate),
        other => Err(EngineError::config_invalid(
            field,
            format!("unknown bus '{other}'"),
        )),
    }
}

pub(crate) struct DbusProcessor;
impl Processor for DbusProcessor {
    fn field(&self) -> &'static str {
        "dbus"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let mut selection = DbusSelection::default();
        if let Some(v) = value.get("system").and_then(Value::as_str) {
            selection.system = Some(parse_bus(v, "dbus.system")?);
        }
        if let Some(v) = value.get("session").and_then(Value::as_str) {
            selection.session = Some(parse_bus(v, "dbus.session")?);
        }
        if let Some(v) = value.get("debug").and_then(Value::as_str) {
            selection.debug = Some(parse_bus(v, "dbus.debug")?);
        }
        let to_name = |b: &Option<DbusBus>| -> &'static str {
            match b {
                Some(DbusBus::System) => "system",
                Some(DbusBus::AiPublic) => "ai-public",
                Some(DbusBus::AiPrivate) => "ai-private",
                Some(DbusBus::None) | None => "none",
            }
        };
        ctx.config.rdk_plugins.insert(
            "ipc".into(),
            PluginEntry {
                data: serde_json::json!({
                    "system": to_name(&selection.system),
                    "session": to_name(&selection.session),
                    "debug": to_name(&selection.debug),
                }),
                required: false,
                depends_on: Vec::new(),
            },
        );
        ctx.config.dbus = selection;
        Ok(())
    }
}

/// Bundle path: re-reads an existing `ipc` plugin entry back into
/// `DbusSelection` rather than accepting the spec-shaped `dbus` value.
pub(crate) struct IpcReparseProcessor;
impl Processor for IpcReparseProcessor {
    fn field(&self) -> &'static str {
        "ipc"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let bus = |key: &str| -> Option<DbusBus> {
            match value.get(key).and_then(Value::as_str) {
                Some("system") => Some(DbusBus::System),
                Some("ai-public") => Some(DbusBus::AiPublic),
                Some("ai-private") => Some(DbusBus::AiPrivate),
                _ => None,
            }
        };
        ctx.config.dbus = DbusSelection {
            system: bus("system"),
            session: bus("session"),
            debug: bus("debug"),
        };
        Ok(())
    }
}

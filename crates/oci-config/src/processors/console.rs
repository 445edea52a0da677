//! `console` and `syslog`, plus the bundle-path `logging` reparse.

use common::{EngineError, Result};
use serde_json::Value;

use crate::resolved_config::ConsoleSink;

use super::{PipelineContext, Processor};

/// `null` disables the console but still activates the logging plugin with
/// a devnull sink; an object requires `path` (else a warning is logged and
/// the sink falls back to devnull) and clamps `limit` to `>= -1`.
pub(crate) struct ConsoleProcessor;
impl Processor for ConsoleProcessor {
    fn field(&self) -> &'static str {
        "console"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        ctx.config.console = match value {
            Value::Null => ConsoleSink::DevNull,
            Value::Object(obj) => match obj.get("path").and_then(Value::as_str) {
                Some(path) => {
                    let limit = obj
                        .get("limit")
                        .and_then(Value::as_i64)
                        .map(|l| if l < -1 { -1 } else { l })
                        .unwrap_or(-1);
                    ConsoleSink::File {
                        path: path.into(),
                        limit,
                    }
                }
                None => {
                    log::warn!("console object missing 'path', falling back to devnull sink");
                    ConsoleSink::DevNull
                }
            },
            _ => return Err(EngineError::config_invalid("console", "must be null or an object")),
        };
        ctx.config
            .rdk_plugins
            .entry("logging".into())
            .or_insert_with(|| crate::resolved_config::PluginEntry {
                data: serde_json::json!({}),
                required: false,
                depends_on: Vec::new(),
            })
            .data = match &ctx.config.console {
            ConsoleSink::DevNull => serde_json::json!({ "sink": "devnull" }),
            ConsoleSink::File { path, limit } => serde_json::json!({
                "sink": "file",
                "fileOptions": { "path": path, "limit": limit }
            }),
        };
        Ok(())
    }
}

pub(crate) struct SyslogProcessor;
impl Processor for SyslogProcessor {
    fn field(&self) -> &'static str {
        "syslog"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let enabled = value
            .as_bool()
            .ok_or_else(|| EngineError::config_invalid("syslog", "must be a boolean"))?;
        if enabled {
            ctx.config
                .enabled_system_hooks
                .push("syslog".to_string());
        }
        Ok(())
    }
}

/// Bundle path: the `logging` subtree of an existing `rdkPlugins` table is
/// re-read into the same `ConsoleSink` representation rather than accepting
/// a fresh spec-shaped `console` value.
pub(crate) struct LoggingReparseProcessor;
impl Processor for LoggingReparseProcessor {
    fn field(&self) -> &'static str {
        "logging"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let sink = value.get("sink").and_then(Value::as_str).unwrap_or("devnull");
        ctx.config.console = match sink {
            "file" => {
                let opts = value.get("fileOptions");
                let path = opts
                    .and_then(|o| o.get("path"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        EngineError::config_invalid("logging.fileOptions.path", "required")
                    })?;
                let limit = opts
                    .and_then(|o| o.get("limit"))
                    .and_then(Value::as_i64)
                    .unwrap_or(-1);
                ConsoleSink::File {
                    path: path.into(),
                    limit,
                }
            }
            _ => ConsoleSink::DevNull,
        };
        Ok(())
    }
}

//! `plugins` (legacy hook-library declarations) and `rdkPlugins` (modern
//! plugins). Settings-default plugins are merged in afterwards by
//! `crate::pipeline::merge_default_plugins`, not here, since that step
//! needs the full settings document rather than a single field's value.

use common::{EngineError, Result};
use serde_json::Value;

use crate::resolved_config::PluginEntry;

use super::{PipelineContext, Processor};

fn parse_entry(name: &str, value: &Value) -> Result<PluginEntry> {
    let data = value.get("data").cloned().unwrap_or(Value::Null);
    let required = value
        .get("required")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let depends_on = value
        .get("dependsOn")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let _ = name;
    Ok(PluginEntry {
        data,
        required,
        depends_on,
    })
}

pub(crate) struct PluginsProcessor;
impl Processor for PluginsProcessor {
    fn field(&self) -> &'static str {
        "plugins"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let obj = value
            .as_object()
            .ok_or_else(|| EngineError::config_invalid("plugins", "must be an object"))?;
        for (name, entry) in obj {
            ctx.config
                .legacy_plugin_order
                .push(name.clone());
            ctx.config
                .legacy_plugins
                .insert(name.clone(), parse_entry(name, entry)?);
        }
        Ok(())
    }
}

pub(crate) struct RdkPluginsProcessor;
impl Processor for RdkPluginsProcessor {
    fn field(&self) -> &'static str {
        "rdkPlugins"
    }
    fn process(&self, value: &Value, ctx: &mut PipelineContext<'_>) -> Result<()> {
        let obj = value
            .as_object()
            .ok_or_else(|| EngineError::config_invalid("rdkPlugins", "must be an object"))?;
        for (name, entry) in obj {
            ctx.config
                .rdk_plugins
                .insert(name.clone(), parse_entry(name, entry)?);
        }
        Ok(())
    }
}

//! Parses `runc state`/`runc list --format json` output (§4.4).

use common::ContainerId;
use serde_json::Value;

/// Mirrors `DobbyRunC::ContainerStatus`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerStatus {
    Unknown,
    Created,
    Running,
    Pausing,
    Paused,
    Stopped,
}

impl ContainerStatus {
    fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "pausing" => Self::Pausing,
            "paused" => Self::Paused,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    /// Parses a single `{"status": "..."}` object as produced by `runc state`.
    pub fn from_state_json(root: &Value) -> Self {
        match root.get("status").and_then(Value::as_str) {
            Some(label) => Self::from_label(label),
            None => Self::Unknown,
        }
    }

    pub fn is_alive(self) -> bool {
        !matches!(self, Self::Unknown | Self::Stopped)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerListItem {
    pub id: ContainerId,
    pub status: ContainerStatus,
}

/// Parses `runc list --format json`'s array of `{"id": ..., "status": ...}`
/// objects. A `null` response (no containers) yields an empty list, not an
/// error, matching the original.
pub fn parse_list_json(root: &Value) -> Vec<ContainerListItem> {
    let Some(entries) = root.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let id = entry.get("id").and_then(Value::as_str)?;
            Some(ContainerListItem {
                id: ContainerId::new(id).ok()?,
                status: ContainerStatus::from_state_json(entry),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_status_labels_case_insensitively() {
        assert_eq!(
            ContainerStatus::from_state_json(&serde_json::json!({"status": "RUNNING"})),
            ContainerStatus::Running
        );
        assert_eq!(
            ContainerStatus::from_state_json(&serde_json::json!({"status": "paused"})),
            ContainerStatus::Paused
        );
    }

    #[test]
    fn missing_status_field_is_unknown() {
        assert_eq!(
            ContainerStatus::from_state_json(&serde_json::json!({})),
            ContainerStatus::Unknown
        );
    }

    #[test]
    fn null_list_response_is_empty() {
        assert!(parse_list_json(&Value::Null).is_empty());
    }

    #[test]
    fn list_response_parses_entries() {
        let root = serde_json::json!([
            {"id": "a", "status": "running"},
            {"id": "b", "status": "stopped"},
        ]);
        let items = parse_list_json(&root);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].status, ContainerStatus::Running);
        assert_eq!(items[1].status, ContainerStatus::Stopped);
    }
}

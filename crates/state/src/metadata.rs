//! Per-container metadata key/value maps (§4.6), generalized from
//! `crates/storage/src/memory_key_value_storage.rs`'s sled-backed
//! `KeyValueStorage` to a plain in-memory store: this core does not persist
//! state across reboots (§1 Non-goals), so there is no `rmp_serde`-encoded
//! disk-backed store to keep, only the in-process map shape.

use std::collections::HashMap;
use std::sync::RwLock;

use common::ContainerId;

#[derive(Debug, Default, Clone)]
struct ContainerMeta {
    ints: HashMap<String, i64>,
    strings: HashMap<String, String>,
}

/// Holds every running container's arbitrary int/string metadata, keyed by
/// container id then by the caller-chosen metadata key. Legacy and modern
/// plugins use this to stash values between hook invocations (e.g. a
/// network plugin recording the veth name it created in `PostConstruction`
/// for `PreDestruction` to tear down).
#[derive(Debug, Default)]
pub struct MetadataStore {
    containers: RwLock<HashMap<ContainerId, ContainerMeta>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_int(&self, id: &ContainerId, key: &str, value: i64) {
        let mut containers = self.containers.write().unwrap();
        containers.entry(id.clone()).or_default().ints.insert(key.to_string(), value);
    }

    pub fn get_int(&self, id: &ContainerId, key: &str) -> Option<i64> {
        self.containers.read().unwrap().get(id)?.ints.get(key).copied()
    }

    pub fn set_string(&self, id: &ContainerId, key: &str, value: impl Into<String>) {
        let mut containers = self.containers.write().unwrap();
        containers
            .entry(id.clone())
            .or_default()
            .strings
            .insert(key.to_string(), value.into());
    }

    pub fn get_string(&self, id: &ContainerId, key: &str) -> Option<String> {
        self.containers.read().unwrap().get(id)?.strings.get(key).cloned()
    }

    /// Drops every key belonging to `id`, matching
    /// `clearContainerMetaData`'s full-wipe-on-container-exit behaviour.
    pub fn clear_container_meta_data(&self, id: &ContainerId) {
        self.containers.write().unwrap().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ContainerId {
        ContainerId::new(s).unwrap()
    }

    #[test]
    fn int_and_string_values_are_isolated_per_container() {
        let store = MetadataStore::new();
        let a = id("containerA");
        let b = id("containerB");
        store.set_int(&a, "pid", 42);
        store.set_string(&a, "veth", "veth0");
        assert_eq!(store.get_int(&a, "pid"), Some(42));
        assert_eq!(store.get_int(&b, "pid"), None);
        assert_eq!(store.get_string(&a, "veth").as_deref(), Some("veth0"));
    }

    #[test]
    fn clear_removes_every_key_for_that_container() {
        let store = MetadataStore::new();
        let a = id("containerA");
        store.set_int(&a, "pid", 42);
        store.clear_container_meta_data(&a);
        assert_eq!(store.get_int(&a, "pid"), None);
    }
}

//! Legacy hook-library plugins, loaded by scanning a directory of shared
//! objects and resolving two symbols from each (matching
//! `DobbyPluginManager::loadPlugins`'s dlopen/dlsym contract). The original's
//! ABI returns a C++ `shared_ptr<IDobbyPlugin>`, which has no portable
//! Rust-across-a-dylib-boundary equivalent (`dyn Trait` pointers are fat and
//! not FFI-safe), so plugins built against this core export a `repr(C)`
//! vtable of function pointers instead; the discovery scan, the hint
//! bitmask, and the sync/async dispatch rules are otherwise unchanged from
//! the original.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use bitflags::bitflags;
use common::Result;
use libloading::{Library, Symbol};
use log::warn;
use oci_config::resolved_config::PluginEntry;
use serde_json::Value;

use crate::HookPoint;

bitflags! {
    /// Mirrors `IDobbyPlugin::HintFlags` bit-for-bit: sync variants occupy
    /// bits 0-4, async variants the corresponding bits 16-20.
    pub struct HintFlags: u32 {
        const POST_CONSTRUCTION_SYNC  = 1 << 0;
        const PRE_START_SYNC          = 1 << 1;
        const POST_START_SYNC         = 1 << 2;
        const POST_STOP_SYNC          = 1 << 3;
        const PRE_DESTRUCTION_SYNC    = 1 << 4;
        const POST_CONSTRUCTION_ASYNC = 1 << 16;
        const PRE_START_ASYNC         = 1 << 17;
        const POST_START_ASYNC        = 1 << 18;
        const POST_STOP_ASYNC         = 1 << 19;
        const PRE_DESTRUCTION_ASYNC   = 1 << 20;
    }
}

impl HookPoint {
    fn flags(self) -> (HintFlags, HintFlags) {
        match self {
            HookPoint::PostConstruction => {
                (HintFlags::POST_CONSTRUCTION_SYNC, HintFlags::POST_CONSTRUCTION_ASYNC)
            }
            HookPoint::PreStart => (HintFlags::PRE_START_SYNC, HintFlags::PRE_START_ASYNC),
            HookPoint::PostStart => (HintFlags::POST_START_SYNC, HintFlags::POST_START_ASYNC),
            HookPoint::PostStop => (HintFlags::POST_STOP_SYNC, HintFlags::POST_STOP_ASYNC),
            HookPoint::PreDestruction => {
                (HintFlags::PRE_DESTRUCTION_SYNC, HintFlags::PRE_DESTRUCTION_ASYNC)
            }
        }
    }
}

/// Opaque plugin object. Its first field is the vtable pointer, the same
/// layout a C++ object with a single virtual base has, so a `createIDobbyPlugin`
/// implementation written against this header is a faithful FFI counterpart
/// of the original's factory function.
#[repr(C)]
pub struct PluginHandle {
    pub vtable: *const PluginVtable,
}

type HookFn = unsafe extern "C" fn(
    handle: *mut PluginHandle,
    container_id: *const c_char,
    rootfs_path: *const c_char,
    json_data: *const c_char,
) -> bool;

#[repr(C)]
pub struct PluginVtable {
    pub name: unsafe extern "C" fn(*const PluginHandle) -> *const c_char,
    pub hook_hints: unsafe extern "C" fn(*const PluginHandle) -> u32,
    pub post_construction: HookFn,
    pub pre_start: HookFn,
    pub post_start: HookFn,
    pub post_stop: HookFn,
    pub pre_destruction: HookFn,
}

type CreateFn = unsafe extern "C" fn() -> *mut PluginHandle;
type DestroyFn = unsafe extern "C" fn(*mut PluginHandle);

struct LoadedPlugin {
    // Kept alive for as long as `handle`'s code is in use; never read after
    // construction.
    _library: Library,
    handle: *mut PluginHandle,
    destroy: DestroyFn,
    name: String,
    hints: HintFlags,
}

// The handle is only ever dereferenced through the plugin's own vtable
// functions, which the plugin author is responsible for making thread-safe;
// the original's `IDobbyPlugin` implementations carry the same contract.
unsafe impl Send for LoadedPlugin {}
unsafe impl Sync for LoadedPlugin {}

impl Drop for LoadedPlugin {
    fn drop(&mut self) {
        unsafe { (self.destroy)(self.handle) }
    }
}

fn load_one(path: &Path) -> Result<Option<LoadedPlugin>> {
    let library = match unsafe { Library::new(path) } {
        Ok(lib) => lib,
        Err(e) => {
            warn!("{}: dlopen failed: {e}", path.display());
            return Ok(None);
        }
    };

    let create: Symbol<CreateFn> = match unsafe { library.get(b"createIDobbyPlugin\0") } {
        Ok(sym) => sym,
        Err(_) => return Ok(None),
    };
    let destroy: Symbol<DestroyFn> = match unsafe { library.get(b"destroyIDobbyPlugin\0") } {
        Ok(sym) => sym,
        Err(_) => return Ok(None),
    };
    let create_fn: CreateFn = *create;
    let destroy_fn: DestroyFn = *destroy;

    let handle = unsafe { create_fn() };
    if handle.is_null() {
        warn!("{}: createIDobbyPlugin returned null", path.display());
        return Ok(None);
    }

    let vtable = unsafe { &*(*handle).vtable };
    let name = unsafe { CStr::from_ptr((vtable.name)(handle)) }
        .to_string_lossy()
        .into_owned();
    let hints = HintFlags::from_bits_truncate(unsafe { (vtable.hook_hints)(handle) });

    Ok(Some(LoadedPlugin {
        _library: library,
        handle,
        destroy: destroy_fn,
        name,
        hints,
    }))
}

fn is_candidate(entry: &std::fs::DirEntry) -> bool {
    let is_regular_or_symlinked_file = match entry.file_type() {
        Ok(t) if t.is_file() => true,
        Ok(t) if t.is_symlink() => std::fs::metadata(entry.path())
            .map(|m| m.is_file())
            .unwrap_or(false),
        _ => false,
    };
    if !is_regular_or_symlinked_file {
        return false;
    }
    std::fs::metadata(entry.path())
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn discover(dir: &Path) -> HashMap<String, LoadedPlugin> {
    let mut plugins = HashMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("{}: cannot scan legacy plugin dir: {e}", dir.display());
            return plugins;
        }
    };
    for entry in entries.flatten() {
        if !is_candidate(&entry) {
            continue;
        }
        match load_one(&entry.path()) {
            Ok(Some(plugin)) => {
                plugins.insert(plugin.name.clone(), plugin);
            }
            Ok(None) => {}
            Err(e) => warn!("{}: {e}", entry.path().display()),
        }
    }
    plugins
}

/// Owns every legacy plugin discovered in a directory and dispatches hook
/// points to the subset a container's spec declares, in spec-declared order.
pub struct LegacyPluginManager {
    plugins: HashMap<String, LoadedPlugin>,
}

impl LegacyPluginManager {
    pub fn discover(plugin_dir: &Path) -> Self {
        Self {
            plugins: discover(plugin_dir),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Runs a hook point across the plugins named in `order`, looking up
    /// each plugin's JSON data in `data`. Async-hinted plugins run on their
    /// own named worker thread (name truncated to 15 bytes, the
    /// `pthread_setname_np` limit); sync-hinted plugins run on the calling
    /// thread after the async plugins have been started. Every plugin's
    /// result is collected; a `false` from any plugin fails the hook.
    /// Unknown plugin hint or a name with no discovered plugin is logged
    /// and skipped, not treated as a failure.
    pub fn run_hook(
        &self,
        hook: HookPoint,
        order: &[String],
        data: &HashMap<String, PluginEntry>,
        container_id: &str,
        rootfs_path: &str,
    ) -> bool {
        let (sync_flag, async_flag) = hook.flags();
        let mut sync_plugins = Vec::new();
        let mut async_plugins = Vec::new();

        for name in order {
            let plugin = match self.plugins.get(name) {
                Some(plugin) => plugin,
                None => {
                    warn!("no legacy plugin named '{name}' discovered");
                    continue;
                }
            };
            if plugin.hints.contains(async_flag) {
                async_plugins.push(plugin);
            } else if plugin.hints.contains(sync_flag) {
                sync_plugins.push(plugin);
            }
        }

        let json_for = |name: &str| -> Value {
            data.get(name).map(|e| e.data.clone()).unwrap_or(Value::Null)
        };

        let mut overall = true;
        std::thread::scope(|scope| {
            let handles: Vec<_> = async_plugins
                .iter()
                .map(|plugin| {
                    let thread_name: String = plugin.name.chars().take(15).collect();
                    let json = json_for(&plugin.name);
                    std::thread::Builder::new()
                        .name(thread_name)
                        .spawn_scoped(scope, move || invoke(plugin, hook, container_id, rootfs_path, &json))
                        .expect("spawn legacy plugin hook thread")
                })
                .collect();

            for plugin in &sync_plugins {
                let json = json_for(&plugin.name);
                if !invoke(plugin, hook, container_id, rootfs_path, &json) {
                    overall = false;
                }
            }
            for handle in handles {
                if !handle.join().unwrap_or(false) {
                    overall = false;
                }
            }
        });
        overall
    }
}

fn invoke(plugin: &LoadedPlugin, hook: HookPoint, id: &str, rootfs: &str, data: &Value) -> bool {
    let id_c = match CString::new(id) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let rootfs_c = match CString::new(rootfs) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let data_c = match CString::new(data.to_string()) {
        Ok(s) => s,
        Err(_) => return false,
    };

    let vtable = unsafe { &*(*plugin.handle).vtable };
    let hook_fn = match hook {
        HookPoint::PostConstruction => vtable.post_construction,
        HookPoint::PreStart => vtable.pre_start,
        HookPoint::PostStart => vtable.post_start,
        HookPoint::PostStop => vtable.post_stop,
        HookPoint::PreDestruction => vtable.pre_destruction,
    };
    unsafe { hook_fn(plugin.handle, id_c.as_ptr(), rootfs_c.as_ptr(), data_c.as_ptr()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_yields_no_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LegacyPluginManager::discover(dir.path());
        assert!(manager.is_empty());
    }

    #[test]
    fn missing_directory_yields_no_plugins_and_does_not_panic() {
        let manager = LegacyPluginManager::discover(Path::new("/nonexistent/plugin/dir"));
        assert!(manager.is_empty());
    }

    #[test]
    fn non_executable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_plugin.so");
        std::fs::write(&path, b"not an elf file").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o644);
        std::fs::set_permissions(&path, perms).unwrap();
        let manager = LegacyPluginManager::discover(dir.path());
        assert!(manager.is_empty());
    }

    #[test]
    fn hint_flags_match_expected_bit_positions() {
        assert_eq!(HintFlags::POST_CONSTRUCTION_SYNC.bits(), 1);
        assert_eq!(HintFlags::PRE_DESTRUCTION_SYNC.bits(), 1 << 4);
        assert_eq!(HintFlags::POST_CONSTRUCTION_ASYNC.bits(), 1 << 16);
        assert_eq!(HintFlags::PRE_DESTRUCTION_ASYNC.bits(), 1 << 20);
    }

    #[test]
    fn run_hook_on_empty_manager_with_declared_names_logs_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LegacyPluginManager::discover(dir.path());
        let order = vec!["networking".to_string()];
        let data = HashMap::new();
        let ok = manager.run_hook(HookPoint::PreStart, &order, &data, "container1", "/tmp/rootfs");
        assert!(ok);
    }
}

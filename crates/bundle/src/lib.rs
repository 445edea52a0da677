//! Scoped RAII acquisition of the two directory trees a container lives in
//! (§3/§4.2): the `Bundle` (the directory holding `config.json` and
//! `rootfs/`) and the `Rootfs` (the `rootfs/` subtree itself). Both are
//! "destroy unless marked persistent" types, mirroring the Builder +
//! scoped-acquisition idiom `crates/sandbox`'s `Sandbox<T>` uses for its own
//! namespace/cgroup resources, generalized here to plain directories.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Component, Path, PathBuf};

use common::{ContainerId, EngineError, Result};
use nix::dir::Dir;
use nix::fcntl::OFlag;
use nix::mount::{umount2, MntFlags};
use nix::sys::stat::Mode;
use oci_config::resolved_config::{EtcBundle, MountKind, ResolvedConfig};
use rand::Rng;

/// Mode every bundle/rootfs directory is forced to, beating whatever the
/// process umask would otherwise apply (§4.2 "creation races against umask").
const DIR_MODE: u32 = 0o755;

/// Guard against fd exhaustion on a pathologically deep or cyclic tree
/// (§4.2 point 3 of the Rootfs drop procedure). Shared by `Bundle`'s own
/// non-persistent cleanup since both are bounded recursive deletes of a
/// directory this process owns.
const MAX_DELETE_DEPTH: u32 = 128;

/// The canonical rootfs skeleton (§3), each created at `DIR_MODE`.
const ROOTFS_SKELETON: &[&str] = &[
    "etc",
    "proc",
    "dev",
    "sys",
    "sys/fs/cgroup",
    "tmp",
    "lib",
    "bin",
    "sbin",
    "usr",
    "home",
    "home/private",
    "etc/ssl",
    "etc/ssl/certs",
];

const NSSWITCH_CONF: &str = "hosts:     files mdns4_minimal [NOTFOUND=return] dns mdns4\nprotocols: files\n";

fn chmod(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE)).map_err(EngineError::from)
}

fn mkdir_0755(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(EngineError::from)?;
    chmod(path)
}

/// Recursively removes `path`'s contents then `path` itself, refusing to
/// descend past `MAX_DELETE_DEPTH`. Best-effort: individual failures are
/// logged, not propagated, matching §4.2's "logged but not propagated"
/// destruction semantics.
fn remove_dir_bounded(path: &Path, depth: u32) {
    if depth > MAX_DELETE_DEPTH {
        log::error!("{}: recursive delete exceeded max depth, aborting", path.display());
        return;
    }
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            log::error!("{}: read_dir failed during cleanup: {e}", path.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let child = entry.path();
        let is_dir = entry
            .file_type()
            .map(|t| t.is_dir() && !t.is_symlink())
            .unwrap_or(false);
        if is_dir {
            remove_dir_bounded(&child, depth + 1);
            if let Err(e) = fs::remove_dir(&child) {
                log::error!("{}: rmdir failed during cleanup: {e}", child.display());
            }
        } else if let Err(e) = fs::remove_file(&child) {
            log::error!("{}: unlink failed during cleanup: {e}", child.display());
        }
    }
}

/// A scoped acquisition of a bundle directory (the directory containing
/// `config.json` and `rootfs/`). See §3/§4.2.
pub struct Bundle {
    path: PathBuf,
    dir: Dir,
    persistent: bool,
}

impl Bundle {
    fn open_dir_forcing_mode(path: &Path) -> Result<Dir> {
        chmod(path)?;
        Dir::open(
            path,
            OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(EngineError::from)
    }

    /// Mode (i): a caller-supplied absolute path. Always persistent; the
    /// caller owns the directory's lifetime, not us.
    pub fn new_persistent(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        mkdir_0755(&path)?;
        let dir = Self::open_dir_forcing_mode(&path)?;
        Ok(Self {
            path,
            dir,
            persistent: true,
        })
    }

    /// Mode (ii): auto-created under
    /// `<workspace>/dobby/bundles/<id>.<5-digit-random>/`. Non-persistent.
    pub fn new_auto(workspace: &Path, id: &ContainerId) -> Result<Self> {
        let parent = workspace.join("dobby").join("bundles");
        mkdir_0755(&parent)?;
        let suffix: u32 = rand::thread_rng().gen_range(0..100_000);
        let path = parent.join(format!("{}.{:05}", id.as_str(), suffix));
        mkdir_0755(&path)?;
        let dir = Self::open_dir_forcing_mode(&path)?;
        Ok(Self {
            path,
            dir,
            persistent: false,
        })
    }

    /// Mode (iii): a caller-supplied debug path, left on disk for
    /// inspection after the run (persistent by default; a caller may still
    /// flip this with `set_persistence`).
    pub fn new_debug(path: impl Into<PathBuf>) -> Result<Self> {
        let mut bundle = Self::new_persistent(path)?;
        bundle.persistent = true;
        Ok(bundle)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir_fd(&self) -> RawFd {
        self.dir.as_raw_fd()
    }

    pub fn set_persistence(&mut self, persistent: bool) {
        self.persistent = persistent;
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

impl Drop for Bundle {
    fn drop(&mut self) {
        if self.persistent {
            return;
        }
        remove_dir_bounded(&self.path, 0);
        if let Err(e) = fs::remove_dir(&self.path) {
            log::error!(
                "{}: failed to remove bundle directory (child filesystems may still be mounted): {e}",
                self.path.display()
            );
        }
    }
}

/// A scoped acquisition of the `rootfs/` subtree within a `Bundle`. See
/// §3/§4.2.
pub struct Rootfs {
    path: PathBuf,
    persistent: bool,
}

/// Rejects `..` components, drops `.` components, rejects an empty
/// destination after trimming the leading `/` (§4.2).
fn sanitize_mount_destination(dest: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in dest.components() {
        match component {
            Component::ParentDir => {
                return Err(EngineError::config_invalid(
                    "mounts[].destination",
                    format!("'{}' contains a '..' component", dest.display()),
                ))
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::Normal(part) => out.push(part),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(EngineError::config_invalid(
            "mounts[].destination",
            "destination is empty after trimming leading '/'",
        ));
    }
    Ok(out)
}

fn write_etc(rootfs: &Path, etc: &EtcBundle) -> Result<()> {
    let etc_dir = rootfs.join("etc");
    fs::write(etc_dir.join("hosts"), &etc.hosts).map_err(EngineError::from)?;
    fs::write(etc_dir.join("services"), &etc.services).map_err(EngineError::from)?;
    fs::write(etc_dir.join("passwd"), &etc.passwd).map_err(EngineError::from)?;
    fs::write(etc_dir.join("group"), &etc.group).map_err(EngineError::from)?;
    fs::write(etc_dir.join("ld.so.preload"), &etc.ld_so_preload).map_err(EngineError::from)?;
    fs::write(etc_dir.join("nsswitch.conf"), NSSWITCH_CONF).map_err(EngineError::from)?;
    fs::write(etc_dir.join("resolv.conf"), b"").map_err(EngineError::from)?;
    Ok(())
}

fn materialize_mount_point(rootfs: &Path, destination: &Path, kind: &MountKind) -> Result<()> {
    let relative = sanitize_mount_destination(destination)?;
    let absolute = rootfs.join(&relative);
    if let Some(parent) = absolute.parent() {
        mkdir_0755(parent)?;
    }
    match kind {
        MountKind::Directory => mkdir_0755(&absolute)?,
        MountKind::File => {
            if !absolute.exists() {
                fs::write(&absolute, b"").map_err(EngineError::from)?;
            }
        }
    }
    Ok(())
}

impl Rootfs {
    /// Spec-origin construction (§4.2): builds the canonical skeleton, the
    /// five `/etc` files, `nsswitch.conf`/`resolv.conf`, and a placeholder
    /// for every declared mount point. Non-persistent.
    pub fn new_spec_origin(bundle: &Bundle, config: &ResolvedConfig) -> Result<Self> {
        let path = bundle.path().join("rootfs");
        mkdir_0755(&path)?;
        for entry in ROOTFS_SKELETON {
            mkdir_0755(&path.join(entry))?;
        }
        write_etc(&path, config.etc())?;
        for mount in config.mounts() {
            materialize_mount_point(&path, &mount.destination, &mount.kind)?;
        }
        Ok(Self {
            path,
            persistent: false,
        })
    }

    /// Bundle-origin construction: the rootfs already exists on disk and is
    /// merely referenced, not written.
    pub fn new_bundle_origin(bundle: &Bundle) -> Result<Self> {
        let path = bundle.path().join("rootfs");
        if !path.is_dir() {
            return Err(EngineError::ConfigInvalid {
                field: "rootfs".into(),
                reason: format!("{} does not exist", path.display()),
            });
        }
        Ok(Self {
            path,
            persistent: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_persistence(&mut self, persistent: bool) {
        self.persistent = persistent;
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

/// Reads `/proc/self/mountinfo` and returns the mount-point column (field 5)
/// of every line, unparsed beyond whitespace splitting.
fn mountinfo_mount_points() -> Vec<PathBuf> {
    let raw = match fs::read_to_string("/proc/self/mountinfo") {
        Ok(raw) => raw,
        Err(e) => {
            log::error!("failed to read /proc/self/mountinfo: {e}");
            return Vec::new();
        }
    };
    raw.lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(PathBuf::from)
        .collect()
}

impl Drop for Rootfs {
    fn drop(&mut self) {
        if self.persistent {
            return;
        }
        for mount_point in mountinfo_mount_points() {
            if mount_point.starts_with(&self.path) {
                log::error!(
                    "{}: unmounting leftover mount at drop time (plugin should have cleaned up)",
                    mount_point.display()
                );
                if let Err(e) = umount2(&mount_point, MntFlags::MNT_DETACH | MntFlags::UMOUNT_NOFOLLOW)
                {
                    log::error!("{}: umount2 failed: {e}", mount_point.display());
                }
            }
        }
        remove_dir_bounded(&self.path, 0);
        if let Err(e) = fs::remove_dir(&self.path) {
            log::error!(
                "{}: failed to remove rootfs directory: {e}",
                self.path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DeviceAllowlist;
    use oci_config::Settings;

    struct AllowAll;
    impl DeviceAllowlist for AllowAll {
        fn is_allowed(&self, _major: u32, _minor: u32) -> bool {
            true
        }
        fn resolve_major(&self, _driver_name: &str) -> Option<u32> {
            Some(1)
        }
    }

    fn settings() -> Settings {
        Settings {
            workspace_dir: "/tmp/dobby".into(),
            persistent_dir: "/tmp/dobby-persistent".into(),
            console_socket_path: "/tmp/dobby-console.sock".into(),
            network_address_range: "100.64.11.0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn auto_bundle_creates_suffixed_directory() {
        let workspace = tempfile::tempdir().unwrap();
        let id = ContainerId::new("my-container").unwrap();
        let bundle = Bundle::new_auto(workspace.path(), &id).unwrap();
        assert!(bundle.path().starts_with(workspace.path().join("dobby/bundles")));
        let name = bundle.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("my-container."));
        assert_eq!(name.len(), "my-container.".len() + 5);
        let meta = fs::metadata(bundle.path()).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, DIR_MODE);
    }

    #[test]
    fn non_persistent_bundle_removed_on_drop() {
        let workspace = tempfile::tempdir().unwrap();
        let id = ContainerId::new("ephemeral").unwrap();
        let path = {
            let bundle = Bundle::new_auto(workspace.path(), &id).unwrap();
            bundle.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn persistent_bundle_survives_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept");
        let bundle_path = {
            let bundle = Bundle::new_persistent(&path).unwrap();
            bundle.path().to_path_buf()
        };
        assert!(bundle_path.exists());
    }

    #[test]
    fn spec_origin_rootfs_writes_skeleton_and_etc() {
        let dir = tempfile::tempdir().unwrap();
        let mut bundle = Bundle::new_persistent(dir.path().join("bundle")).unwrap();
        bundle.set_persistence(true);

        let rootfs_path = bundle.path().join("rootfs");
        fs::create_dir_all(&rootfs_path).unwrap();
        let spec = r#"{
            "version": "1.0",
            "args": ["/bin/true"],
            "user": {"uid": 30000, "gid": 30000},
            "memLimit": 4194304,
            "etc": {"hosts": "127.0.0.1 localhost\n"},
            "mounts": [{"source": "/data", "destination": "/mnt/data"}]
        }"#;
        let (config, _json) = oci_config::resolve_spec(
            spec,
            &settings(),
            &AllowAll,
            bundle.path(),
            &rootfs_path,
        )
        .unwrap();

        let mut rootfs = Rootfs::new_spec_origin(&bundle, &config).unwrap();
        rootfs.set_persistence(true);

        assert!(rootfs.path().join("etc/nsswitch.conf").exists());
        assert!(rootfs.path().join("etc/resolv.conf").exists());
        assert!(rootfs.path().join("home/private").is_dir());
        assert!(rootfs.path().join("mnt/data").is_dir());
        let hosts = fs::read_to_string(rootfs.path().join("etc/hosts")).unwrap();
        assert_eq!(hosts, "127.0.0.1 localhost\n");
    }

    #[test]
    fn mount_destination_rejects_parent_dir_traversal() {
        let err = sanitize_mount_destination(Path::new("/foo/../bar")).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { .. }));
    }

    #[test]
    fn mount_destination_collapses_dot_components() {
        let out = sanitize_mount_destination(Path::new("/foo/./bar")).unwrap();
        assert_eq!(out, PathBuf::from("foo/bar"));
    }

    #[test]
    fn mount_destination_rejects_empty() {
        let err = sanitize_mount_destination(Path::new("/")).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { .. }));
    }
}

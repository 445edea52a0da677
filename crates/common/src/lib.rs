//! Shared types used across the container supervisor crates: the container
//! identifier and descriptor newtypes, the pid role wrappers, the error
//! taxonomy and the capability set.

pub mod capability;
pub mod error;

use getset::CopyGetters;
use std::fmt;
use std::str::FromStr;

pub use error::{EngineError, Result};

/// Opaque, caller-chosen container identifier. Used as both the OCI
/// container name and the bundle subdirectory prefix, so it must be a
/// filesystem-safe token.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Maximum length of a container id, matched against filesystem path
    /// component limits with headroom for the `.NNNNN` bundle suffix.
    pub const MAX_LEN: usize = 256;

    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > Self::MAX_LEN {
            return Err(EngineError::ConfigInvalid {
                field: "id".into(),
                reason: format!("id length must be in 1..={}", Self::MAX_LEN),
            });
        }
        if !id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
        {
            return Err(EngineError::ConfigInvalid {
                field: "id".into(),
                reason: "id must only contain [A-Za-z0-9_.-]".into(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContainerId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Short-lived integer handle (1..=1023) identifying a live container to
/// callers. See `supervisor::descriptor` for the allocator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, CopyGetters)]
pub struct Descriptor {
    #[getset(get_copy = "pub")]
    value: i32,
}

impl Descriptor {
    pub const MIN: i32 = 1;
    pub const MAX: i32 = 1023;

    /// Constructs a descriptor, panicking if out of range. Only the
    /// allocator in `supervisor` should call this; everyone else receives
    /// an already-validated `Descriptor`. Not `pub(crate)`, since the
    /// allocator that owns this invariant lives in a different crate; the
    /// doc comment is the boundary here, the way `pid_t`-wrapping
    /// constructors are documented-not-enforced elsewhere in this type.
    pub fn new_unchecked(value: i32) -> Self {
        debug_assert!((Self::MIN..=Self::MAX).contains(&value));
        Self { value }
    }

    /// The distinguished "invalid" value returned to callers on failure.
    pub const INVALID: i32 = -1;
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Marker distinguishing the three kinds of raw pid the runtime driver
/// hands back, so they can never be confused with each other (§9 "raw pids
/// as identities").
pub trait PidRole: Clone + Copy + fmt::Debug {}

#[derive(Clone, Copy, Debug)]
pub struct RuntimeToolRole;
#[derive(Clone, Copy, Debug)]
pub struct ContainerInitRole;
#[derive(Clone, Copy, Debug)]
pub struct ExecRole;

impl PidRole for RuntimeToolRole {}
impl PidRole for ContainerInitRole {}
impl PidRole for ExecRole {}

/// A pid tagged with the role it plays, e.g. `Pid<RuntimeToolRole>` is the
/// pid of the external OCI runtime process, never the container's init.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Pid<R: PidRole> {
    raw: libc::pid_t,
    _role: std::marker::PhantomData<R>,
}

impl<R: PidRole> Pid<R> {
    pub fn new(raw: libc::pid_t) -> Self {
        Self {
            raw,
            _role: std::marker::PhantomData,
        }
    }

    pub fn raw(&self) -> libc::pid_t {
        self.raw
    }

    pub fn is_valid(&self) -> bool {
        self.raw > 0
    }
}

impl<R: PidRole> fmt::Debug for Pid<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pid").field(&self.raw).finish()
    }
}

impl<R: PidRole> fmt::Display for Pid<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

pub type RuntimeToolPid = Pid<RuntimeToolRole>;
pub type ContainerInitPid = Pid<ContainerInitRole>;
pub type ExecPid = Pid<ExecRole>;

/// Initializes `env_logger` once for the whole process. Cheap to call
/// multiple times; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Seam between the configuration pipeline (which validates `devices[]`
/// entries) and `state`'s device allowlist (which owns the policy and the
/// `/proc/devices` driver-name cache). Kept as a trait so `oci-config`
/// doesn't need to depend on `state` directly.
pub trait DeviceAllowlist {
    /// Whether `(major, minor)` may be exposed to a container.
    fn is_allowed(&self, major: u32, minor: u32) -> bool;

    /// Resolves a driver name (as it appears in `/proc/devices`) to a major
    /// number, or `None` if the driver isn't registered on this host.
    fn resolve_major(&self, driver_name: &str) -> Option<u32>;
}

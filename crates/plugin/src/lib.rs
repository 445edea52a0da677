//! Container hook plugins (§4.3): two independent plugin systems invoked at
//! different points of a container's lifecycle.
//!
//! [`legacy`] loads `.so` hook libraries discovered by directory scan and
//! dispatches them synchronously or on a worker thread per plugin, matching
//! the hint bitmask each plugin advertises. [`modern`] invokes the RDK
//! plugin launcher directly for the three hook points this core drives
//! itself (PostInstallation, PreCreation, PostHalt); the remaining RDK hook
//! points are invoked by the external OCI runtime via the `hooks` entries
//! `oci-config` already wires into `config.json`.

pub mod legacy;
pub mod modern;

/// The five hook points the legacy plugin system dispatches directly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HookPoint {
    PostConstruction,
    PreStart,
    PostStart,
    PostStop,
    PreDestruction,
}

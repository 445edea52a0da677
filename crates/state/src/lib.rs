//! Shared services used across the supervisor (§4.6): the device allowlist,
//! the per-bridge IPv4 address pool, per-container metadata maps, the
//! timer queue, and the namespace-entry helper. Each is guarded by its own
//! lock, never one held across a plugin call (§5).

pub mod device_allowlist;
pub mod ip_pool;
pub mod metadata;
pub mod namespace;
pub mod timer;

pub use device_allowlist::{DeviceAllowlist, DriverMajorCache};
pub use ip_pool::AddressPool;
pub use metadata::MetadataStore;
pub use namespace::call_in_namespace;
pub use timer::{TimerId, TimerQueue};

/// The full set of shared services a running daemon keeps for the lifetime
/// of the process, handed to every `Container` by reference rather than
/// reached for through a global (§9 "no global singletons").
pub struct SharedState {
    pub devices: DeviceAllowlist,
    pub addresses: AddressPool,
    pub metadata: MetadataStore,
    pub timers: TimerQueue,
}

impl SharedState {
    pub fn new(address_range: std::net::Ipv4Addr) -> Self {
        Self {
            devices: DeviceAllowlist::new(),
            addresses: AddressPool::new(address_range),
            metadata: MetadataStore::new(),
            timers: TimerQueue::new(),
        }
    }
}

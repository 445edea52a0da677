//! IPv4 address pool for container veth endpoints (§4.6), grounded verbatim
//! in the original's `DobbyState::getIpAddress`/`freeIpAddress`: a FIFO
//! queue of free addresses plus a registration map, guarded by one mutex.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Mutex;

/// Matches the original's `TOTAL_ADDRESS_POOL_SIZE`.
pub const TOTAL_ADDRESS_POOL_SIZE: u32 = 250;

struct Inner {
    pool: VecDeque<u32>,
    registered: HashMap<u32, String>,
}

/// A bridge subnet's address pool. One instance per bridge device.
pub struct AddressPool {
    inner: Mutex<Inner>,
}

impl AddressPool {
    /// Populates the pool from `address_range + 2` up to
    /// `address_range + 2 + TOTAL_ADDRESS_POOL_SIZE`, leaving `.1` open for
    /// the bridge device itself, matching the original's constructor.
    pub fn new(address_range: Ipv4Addr) -> Self {
        let base = u32::from(address_range) + 2;
        let pool = (base..base + TOTAL_ADDRESS_POOL_SIZE).collect();
        Self {
            inner: Mutex::new(Inner { pool, registered: HashMap::new() }),
        }
    }

    /// Number of veth interfaces currently connected through the bridge.
    pub fn bridge_connections(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        TOTAL_ADDRESS_POOL_SIZE - inner.pool.len() as u32
    }

    /// Pops the next free address from the pool and registers it against
    /// `veth_name`. Returns `None` if the pool is exhausted, matching the
    /// original's "0 if none available" sentinel.
    pub fn get_ip_address(&self, veth_name: &str) -> Option<Ipv4Addr> {
        let mut inner = self.inner.lock().unwrap();
        let addr = inner.pool.pop_front()?;
        inner.registered.insert(addr, veth_name.to_string());
        Some(Ipv4Addr::from(addr))
    }

    /// Returns `address` to the pool, dropping its veth registration.
    /// Matches the original's always-succeeds semantics: an address not
    /// currently registered is still pushed back.
    pub fn free_ip_address(&self, address: Ipv4Addr) {
        let mut inner = self.inner.lock().unwrap();
        let addr = u32::from(address);
        inner.registered.remove(&addr);
        inner.pool.push_back(addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_from_dot_two_and_tracks_connections() {
        let pool = AddressPool::new(Ipv4Addr::new(100, 64, 11, 0));
        assert_eq!(pool.bridge_connections(), 0);
        let first = pool.get_ip_address("veth0").unwrap();
        assert_eq!(first, Ipv4Addr::new(100, 64, 11, 2));
        assert_eq!(pool.bridge_connections(), 1);
    }

    #[test]
    fn free_returns_address_to_the_back_of_the_queue() {
        let pool = AddressPool::new(Ipv4Addr::new(100, 64, 11, 0));
        let first = pool.get_ip_address("veth0").unwrap();
        pool.free_ip_address(first);
        assert_eq!(pool.bridge_connections(), 0);
        // Freed address goes to the back, so the next allocation is a new one.
        let second = pool.get_ip_address("veth1").unwrap();
        assert_eq!(second, Ipv4Addr::new(100, 64, 11, 3));
    }

    #[test]
    fn exhausts_after_total_pool_size_allocations() {
        let pool = AddressPool::new(Ipv4Addr::new(100, 64, 11, 0));
        for i in 0..TOTAL_ADDRESS_POOL_SIZE {
            assert!(pool.get_ip_address(&format!("veth{i}")).is_some());
        }
        assert!(pool.get_ip_address("veth-overflow").is_none());
    }
}

//! C1: Local-address set — "is this address local to this node?"
//!
//! The real bit-exact membership structure (the original plugin used a
//! bounded perfect hash, `clib_bihash`) is an implementation detail of
//! the external networking stack's address-configuration callbacks; here
//! it's a plain hash set, updated the same way: explicit `add`/`del`
//! calls from the control plane, `lookup` from anywhere.

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};

/// The IPv4 limited broadcast address, preloaded at init time (original
/// source: `fwabf_locals_init`).
pub const IPV4_LIMITED_BROADCAST: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

#[derive(Debug, Default, Clone)]
pub struct LocalAddressSet {
    v4: HashSet<Ipv4Addr>,
    v6: HashSet<Ipv6Addr>,
}

impl LocalAddressSet {
    pub fn new(initial_capacity: usize) -> Self {
        let mut set = LocalAddressSet {
            v4: HashSet::with_capacity(initial_capacity),
            v6: HashSet::with_capacity(initial_capacity),
        };
        set.v4.insert(IPV4_LIMITED_BROADCAST);
        set
    }

    pub fn add_v4(&mut self, addr: Ipv4Addr) {
        self.v4.insert(addr);
    }

    pub fn add_v6(&mut self, addr: Ipv6Addr) {
        self.v6.insert(addr);
    }

    pub fn del_v4(&mut self, addr: Ipv4Addr) {
        self.v4.remove(&addr);
    }

    pub fn del_v6(&mut self, addr: Ipv6Addr) {
        self.v6.remove(&addr);
    }

    pub fn contains_v4(&self, addr: &Ipv4Addr) -> bool {
        self.v4.contains(addr)
    }

    pub fn contains_v6(&self, addr: &Ipv6Addr) -> bool {
        self.v6.contains(addr)
    }

    pub fn list_v4(&self) -> Vec<Ipv4Addr> {
        let mut v: Vec<_> = self.v4.iter().copied().collect();
        v.sort();
        v
    }

    pub fn list_v6(&self) -> Vec<Ipv6Addr> {
        let mut v: Vec<_> = self.v6.iter().copied().collect();
        v.sort();
        v
    }
}

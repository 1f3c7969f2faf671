//! Contract for the routing-table ("FIB") collaborator (spec §6).
//!
//! This crate never implements longest-prefix-match lookups, pathlist
//! storage, or adjacency resolution — those live in the generic routing
//! table, out of scope per spec §1. What lives here is the *shape* of the
//! contract the engine core consumes, so the engine can be built and
//! tested against a fake without the real FIB.

use crate::dpo::{AddressFamily, Dpo};
use std::net::IpAddr;

/// A FIB-lookup result: one or more forwarding buckets ("Equal Cost
/// MultiPath" fan-out). Spec §4.5 requires `n_buckets` to be a power of
/// two and greater than zero; the FIB collaborator guarantees this.
#[derive(Debug, Clone)]
pub struct LoadBalanceDescriptor {
    pub buckets: Vec<Dpo>,
}

impl LoadBalanceDescriptor {
    pub fn single(dpo: Dpo) -> Self {
        LoadBalanceDescriptor { buckets: vec![dpo] }
    }

    pub fn n_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Selects a bucket by flow hash without modulo, the same
    /// bounded-random technique used for policy group/label selection
    /// (spec §4.3 step 2b).
    pub fn bucket_for_hash(&self, flow_hash: u32) -> &Dpo {
        debug_assert!(!self.buckets.is_empty());
        debug_assert!(self.buckets.len().is_power_of_two());
        let mask = (self.buckets.len() as u32) - 1;
        &self.buckets[(flow_hash & mask) as usize]
    }
}

/// Opaque handle to a pathlist registered with the routing-table
/// collaborator (GLOSSARY: Pathlist).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathListId(pub u32);

/// Opaque handle identifying this child's registration on a parent
/// pathlist, returned by `add_child` and required by `remove_child`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SiblingId(pub u32);

/// A single static next-hop used to build a pathlist: `nexthop` is the
/// remote peer for a tunnel or gateway for a WAN interface.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPath {
    pub family: AddressFamily,
    pub sw_if_index: u32,
}

/// Contract the routing-table collaborator exposes (spec §6, bullet 1).
/// A real implementation wraps a generic FIB; `datapath`/`links`/
/// `default_route` only ever call through this trait.
pub trait RoutingTable {
    /// Longest-prefix-match lookup of `dst_addr` in `fib_index`.
    fn lookup(&self, family: AddressFamily, fib_index: u32, dst_addr: IpAddr) -> LoadBalanceDescriptor;

    /// Lookup of the `0.0.0.0/0` / `::/0` entry itself, used by the
    /// default-route tracker (C3) to learn which adjacencies currently
    /// back the default route.
    fn lookup_default(&self, family: AddressFamily, fib_index: u32) -> LoadBalanceDescriptor;

    fn create_pathlist(&mut self, shared: bool, path: ResolvedPath) -> PathListId;

    fn contribute_forwarding(&self, pathlist: PathListId) -> Dpo;

    fn add_child(&mut self, parent: PathListId, child_index: u32) -> SiblingId;

    fn remove_child(&mut self, parent: PathListId, sibling: SiblingId);
}

/// Implemented by types that register as a FIB child to receive
/// back-walk notifications (spec §9: "FibChild" trait, v-table pattern).
/// `back_walk` recomputes the cached DPO from the pathlist synchronously,
/// on the main thread, then returns whether the walk should continue
/// propagating to further descendants.
pub trait FibChild {
    fn back_walk(&mut self, routing: &dyn RoutingTable) -> BackWalkResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackWalkResult {
    Continue,
    Stop,
}

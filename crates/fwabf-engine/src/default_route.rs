//! C3: Default-route tracker.
//!
//! Tracks, per adjacency index, whether that adjacency currently backs a
//! default route (`0.0.0.0/0` or `::/0`) in either address family. The
//! policy resolution path (spec §4.3) falls back to the original FIB
//! lookup's default-route bucket when no labeled link is reachable, and
//! `links::is_dpo_default_route`/`is_dpo_labeled_or_default_route` read
//! this index directly rather than re-running a FIB lookup.

use crate::dpo::AddressFamily;
use crate::routing::{BackWalkResult, LoadBalanceDescriptor, RoutingTable};

#[derive(Clone)]
pub struct DefaultRouteTracker {
    is_default: Vec<bool>,
    v4_fib_index: Option<u32>,
    v6_fib_index: Option<u32>,
    v4_marked: Vec<u32>,
    v6_marked: Vec<u32>,
}

impl DefaultRouteTracker {
    pub fn new(max_adjacency_index: u32) -> Self {
        DefaultRouteTracker {
            is_default: vec![false; max_adjacency_index as usize],
            v4_fib_index: None,
            v6_fib_index: None,
            v4_marked: Vec::new(),
            v6_marked: Vec::new(),
        }
    }

    /// Registers which FIB table to watch for the `0/0` entry of a given
    /// family. A no-op on subsequent calls with the same family beyond
    /// replacing the tracked index (e.g. VRF reassignment).
    pub fn watch(&mut self, family: AddressFamily, fib_index: u32) {
        match family {
            AddressFamily::V4 => self.v4_fib_index = Some(fib_index),
            AddressFamily::V6 => self.v6_fib_index = Some(fib_index),
        }
    }

    /// Re-derives the `adj->is_default` bitmap for one family from a
    /// fresh default-route lookup, called on back-walk of the default
    /// route's own FIB entry (spec §4.1: default-route tracker "listens"
    /// the same way the link registry does).
    pub fn refresh(&mut self, family: AddressFamily, routing: &dyn RoutingTable) -> BackWalkResult {
        let Some(fib_index) = (match family {
            AddressFamily::V4 => self.v4_fib_index,
            AddressFamily::V6 => self.v6_fib_index,
        }) else {
            return BackWalkResult::Stop;
        };
        let lbd = routing.lookup_default(family, fib_index);
        self.mark(family, &lbd);
        BackWalkResult::Continue
    }

    /// Clears the previous default-route adjacencies for `family` before
    /// marking the freshly looked-up set, so a bucket that has left the
    /// default route's ECMP set (spec §4.2) stops being reported as
    /// default once the FIB back-walk notifies us of the change.
    fn mark(&mut self, family: AddressFamily, lbd: &LoadBalanceDescriptor) {
        let marked = match family {
            AddressFamily::V4 => &mut self.v4_marked,
            AddressFamily::V6 => &mut self.v6_marked,
        };
        for adj in marked.drain(..) {
            if let Some(slot) = self.is_default.get_mut(adj as usize) {
                *slot = false;
            }
        }
        for bucket in &lbd.buckets {
            let adj = bucket.adjacency_index;
            if let Some(slot) = self.is_default.get_mut(adj as usize) {
                *slot = true;
                marked.push(adj);
            }
        }
    }

    pub fn is_default(&self, adjacency_index: u32) -> bool {
        self.is_default
            .get(adjacency_index as usize)
            .copied()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dpo::{Dpo, DpoType};
    use crate::routing::PathListId;
    use std::collections::HashMap;

    struct FakeRouting {
        default_lbd: HashMap<bool, LoadBalanceDescriptor>,
    }

    impl RoutingTable for FakeRouting {
        fn lookup(&self, _family: AddressFamily, _fib_index: u32, _dst_addr: std::net::IpAddr) -> LoadBalanceDescriptor {
            LoadBalanceDescriptor { buckets: vec![] }
        }

        fn lookup_default(&self, _family: AddressFamily, _fib_index: u32) -> LoadBalanceDescriptor {
            self.default_lbd
                .get(&true)
                .cloned()
                .unwrap_or(LoadBalanceDescriptor { buckets: vec![] })
        }
        fn create_pathlist(&mut self, _shared: bool, _path: crate::routing::ResolvedPath) -> PathListId {
            PathListId(0)
        }
        fn contribute_forwarding(&self, _pathlist: PathListId) -> Dpo {
            Dpo::invalid(AddressFamily::V4)
        }
        fn add_child(&mut self, _parent: PathListId, _child_index: u32) -> crate::routing::SiblingId {
            crate::routing::SiblingId(0)
        }
        fn remove_child(&mut self, _parent: PathListId, _sibling: crate::routing::SiblingId) {}
    }

    fn adjacency(i: u32) -> Dpo {
        Dpo {
            dpo_type: DpoType::Adjacency,
            proto: AddressFamily::V4,
            next_node: 1,
            adjacency_index: i,
        }
    }

    #[test]
    fn unwatched_family_refresh_is_noop() {
        let mut tracker = DefaultRouteTracker::new(64);
        let routing = FakeRouting { default_lbd: HashMap::new() };
        assert_eq!(tracker.refresh(AddressFamily::V4, &routing), BackWalkResult::Stop);
    }

    #[test]
    fn refresh_marks_default_bucket_adjacencies() {
        let mut tracker = DefaultRouteTracker::new(64);
        tracker.watch(AddressFamily::V4, 0);
        let mut default_lbd = HashMap::new();
        default_lbd.insert(
            true,
            LoadBalanceDescriptor {
                buckets: vec![adjacency(3), adjacency(7)],
            },
        );
        let routing = FakeRouting { default_lbd };
        assert_eq!(tracker.refresh(AddressFamily::V4, &routing), BackWalkResult::Continue);
        assert!(tracker.is_default(3));
        assert!(tracker.is_default(7));
        assert!(!tracker.is_default(4));
    }

    #[test]
    fn out_of_bound_adjacency_index_is_not_default() {
        let tracker = DefaultRouteTracker::new(4);
        assert!(!tracker.is_default(1000));
    }

    #[test]
    fn refresh_clears_stale_entries_from_a_prior_lookup() {
        let mut tracker = DefaultRouteTracker::new(64);
        tracker.watch(AddressFamily::V4, 0);

        let mut first = HashMap::new();
        first.insert(true, LoadBalanceDescriptor { buckets: vec![adjacency(3)] });
        tracker.refresh(AddressFamily::V4, &FakeRouting { default_lbd: first });
        assert!(tracker.is_default(3));

        let mut second = HashMap::new();
        second.insert(true, LoadBalanceDescriptor { buckets: vec![adjacency(9)] });
        tracker.refresh(AddressFamily::V4, &FakeRouting { default_lbd: second });
        assert!(!tracker.is_default(3), "stale adjacency from the prior lookup must be cleared");
        assert!(tracker.is_default(9));
    }

    #[test]
    fn refresh_for_one_family_does_not_disturb_the_other() {
        let mut tracker = DefaultRouteTracker::new(64);
        tracker.watch(AddressFamily::V4, 0);
        tracker.watch(AddressFamily::V6, 1);

        let mut v4_lbd = HashMap::new();
        v4_lbd.insert(true, LoadBalanceDescriptor { buckets: vec![adjacency(3)] });
        tracker.refresh(AddressFamily::V4, &FakeRouting { default_lbd: v4_lbd });

        let mut v6_lbd = HashMap::new();
        v6_lbd.insert(true, LoadBalanceDescriptor { buckets: vec![adjacency(5)] });
        tracker.refresh(AddressFamily::V6, &FakeRouting { default_lbd: v6_lbd });

        assert!(tracker.is_default(3));
        assert!(tracker.is_default(5));
    }
}

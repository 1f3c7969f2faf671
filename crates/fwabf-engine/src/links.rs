//! C2: Link registry.
//!
//! Maps each egress interface to a label, tracks reachability via FIB
//! back-walk notifications, caches the forwarding descriptor, and
//! maintains the `adj->label` / `adj->reachable_label` indexes the
//! datapath reads lock-free (spec §4.1, §5).
//!
//! Translates the source's `pool_elt_at_index` + vector-indexed-by-label
//! pattern into an arena + stable index (spec §9): labels are hard-bounded
//! at `[0, 254]` by [`crate::label::Label`] itself, so the label-indexed
//! slot array is simply preallocated to its maximum size rather than
//! grown on demand — there is no further growth to manage.

use crate::dpo::{AddressFamily, Dpo};
use crate::error::{EngineError, EngineResult};
use crate::label::{self, Label};
use crate::quality::Quality;
use crate::routing::{
    BackWalkResult, FibChild, LoadBalanceDescriptor, PathListId, ResolvedPath, RoutingTable,
    SiblingId,
};
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct Link {
    pub sw_if_index: u32,
    pub label: Label,
    pub family: AddressFamily,
    pub nexthop: IpAddr,
    pub dpo: Dpo,
    pub quality: Quality,
    pathlist: PathListId,
    sibling: SiblingId,
}

#[derive(Debug, Clone)]
enum LinkSlot {
    Free,
    Live(Link),
}

#[derive(Clone)]
pub struct LinkRegistry {
    slots: Vec<LinkSlot>,
    by_sw_if_index: HashMap<u32, Label>,
    adj_to_label: Vec<Option<Label>>,
    adj_to_reachable_label: Vec<Option<Label>>,
}

impl LinkRegistry {
    pub fn new(max_adjacency_index: u32) -> Self {
        LinkRegistry {
            slots: vec![LinkSlot::Free; label::INVALID as usize],
            by_sw_if_index: HashMap::new(),
            adj_to_label: vec![None; max_adjacency_index as usize],
            adj_to_reachable_label: vec![None; max_adjacency_index as usize],
        }
    }

    pub fn add_link(
        &mut self,
        sw_if_index: u32,
        label: u8,
        family: AddressFamily,
        nexthop: IpAddr,
        routing: &mut dyn RoutingTable,
    ) -> EngineResult<()> {
        let label = Label::try_from(label)?;
        if matches!(self.slots[label.as_usize()], LinkSlot::Live(_)) {
            return Err(EngineError::ValueExists);
        }
        if self.by_sw_if_index.contains_key(&sw_if_index) {
            return Err(EngineError::ValueExists);
        }

        let pathlist = routing.create_pathlist(true, ResolvedPath { family, sw_if_index });
        let sibling = routing.add_child(pathlist, label.as_usize() as u32);
        let dpo = routing.contribute_forwarding(pathlist);

        self.slots[label.as_usize()] = LinkSlot::Live(Link {
            sw_if_index,
            label,
            family,
            nexthop,
            dpo,
            quality: Quality::default(),
            pathlist,
            sibling,
        });
        self.by_sw_if_index.insert(sw_if_index, label);
        self.write_indexes(label, dpo, Quality::default());
        tracing::debug!(sw_if_index, label = label.get(), "link added");
        Ok(())
    }

    /// No-op if the interface has no link (spec §4.1: "if not found,
    /// return 0"). Invalidates the sentinel before touching the
    /// collaborator-owned pathlist/dpo, per the §5 ordering guarantee.
    pub fn delete_link(&mut self, sw_if_index: u32, routing: &mut dyn RoutingTable) {
        let Some(label) = self.by_sw_if_index.remove(&sw_if_index) else {
            return;
        };
        let idx = label.as_usize();
        let LinkSlot::Live(link) = std::mem::replace(&mut self.slots[idx], LinkSlot::Free) else {
            return;
        };
        let adj = link.dpo.adjacency_index as usize;
        if adj < self.adj_to_label.len() {
            self.adj_to_label[adj] = None;
            self.adj_to_reachable_label[adj] = None;
        }
        routing.remove_child(link.pathlist, link.sibling);
        tracing::debug!(sw_if_index, label = label.get(), "link deleted");
    }

    fn write_indexes(&mut self, label: Label, dpo: Dpo, quality: Quality) {
        let adj = dpo.adjacency_index as usize;
        if adj >= self.adj_to_label.len() {
            return;
        }
        self.adj_to_label[adj] = Some(label);
        self.adj_to_reachable_label[adj] = if dpo.is_valid() && !quality.is_down() {
            Some(label)
        } else {
            None
        };
    }

    /// Recomputes a link's cached DPO from its pathlist, the way the
    /// original's back-walk callback does (spec §4.1 "Back-walk
    /// notification"). Idempotent: applying the same notification twice
    /// converges to the same index state (spec §8).
    pub fn refresh_dpo(&mut self, label: Label, routing: &dyn RoutingTable) -> BackWalkResult {
        let idx = label.as_usize();
        let (pathlist, old_adj, quality) = match &self.slots[idx] {
            LinkSlot::Live(link) => (link.pathlist, link.dpo.adjacency_index as usize, link.quality),
            LinkSlot::Free => return BackWalkResult::Stop,
        };
        let new_dpo = routing.contribute_forwarding(pathlist);
        if let LinkSlot::Live(link) = &mut self.slots[idx] {
            link.dpo = new_dpo;
        }
        if old_adj < self.adj_to_label.len() && old_adj != new_dpo.adjacency_index as usize {
            self.adj_to_label[old_adj] = None;
            self.adj_to_reachable_label[old_adj] = None;
        }
        self.write_indexes(label, new_dpo, quality);
        BackWalkResult::Continue
    }

    /// Feeds a fresh quality sample (C7) into C2's reachability index
    /// without waiting for a back-walk: `quality.loss == 100` clears
    /// `adj->reachable_label` immediately (spec §3 invariant).
    pub fn set_quality(&mut self, label: Label, quality: Quality) {
        let idx = label.as_usize();
        let LinkSlot::Live(link) = &mut self.slots[idx] else {
            return;
        };
        link.quality = quality;
        let dpo = link.dpo;
        self.write_indexes(label, dpo, quality);
    }

    /// Returns a short-lived handle implementing [`FibChild`] for `label`,
    /// for callers that drive back-walk propagation generically.
    pub fn handle(&mut self, label: Label) -> LinkBackWalkHandle<'_> {
        LinkBackWalkHandle { registry: self, label }
    }

    /// Intersection query (spec §4.1): does any bucket of `lbd` resolve to
    /// an adjacency whose reachable label is `label`? Scans buckets in
    /// order and returns the first match (spec §9: "preserve first-match
    /// in bucket order").
    pub fn get_dpo(&self, label: Label, lbd: &LoadBalanceDescriptor, family: AddressFamily) -> Option<Dpo> {
        for bucket in &lbd.buckets {
            if bucket.proto != family {
                continue;
            }
            let adj = bucket.adjacency_index as usize;
            if adj < self.adj_to_reachable_label.len() && self.adj_to_reachable_label[adj] == Some(label) {
                return Some(*bucket);
            }
        }
        None
    }

    /// Unconditional query (spec §4.1): the link's own cached DPO, if
    /// that link is reachable *and* bound to `family`. Mirrors
    /// `fwabf_links_get_dpo`'s `dpo_proto != aif->dpo_proto` rejection
    /// (SPEC_FULL.md "Supplemented features": mixed-address-family
    /// protection) — a label bound to a v4 link must never be handed
    /// back for a v6 lookup, even on the default-route-override path.
    pub fn get_labeled_dpo(&self, label: Label, family: AddressFamily) -> Option<Dpo> {
        match &self.slots[label.as_usize()] {
            LinkSlot::Live(link)
                if link.family == family && link.dpo.is_valid() && !link.quality.is_down() =>
            {
                Some(link.dpo)
            }
            _ => None,
        }
    }

    /// Link-level reachability, independent of address family (used by
    /// control-plane callers like `engine::refresh_link` that already
    /// know which link they mean and aren't querying across families).
    pub fn is_reachable(&self, label: Label) -> bool {
        match &self.slots[label.as_usize()] {
            LinkSlot::Live(link) => link.dpo.is_valid() && !link.quality.is_down(),
            LinkSlot::Free => false,
        }
    }

    pub fn adj_label(&self, adjacency_index: u32) -> Option<Label> {
        self.adj_to_label.get(adjacency_index as usize).copied().flatten()
    }

    pub fn adj_reachable_label(&self, adjacency_index: u32) -> Option<Label> {
        self.adj_to_reachable_label
            .get(adjacency_index as usize)
            .copied()
            .flatten()
    }

    pub fn link(&self, label: Label) -> Option<&Link> {
        match &self.slots[label.as_usize()] {
            LinkSlot::Live(link) => Some(link),
            LinkSlot::Free => None,
        }
    }

    /// True if any bucket of `lbd` resolves to an adjacency the default
    /// route tracker (C3) currently marks as backing a default route
    /// (spec §4.1).
    pub fn is_dpo_default_route(
        &self,
        lbd: &LoadBalanceDescriptor,
        default_route: &crate::default_route::DefaultRouteTracker,
        family: AddressFamily,
    ) -> bool {
        lbd.buckets
            .iter()
            .any(|b| b.proto == family && default_route.is_default(b.adjacency_index))
    }

    /// True if any bucket of `lbd` resolves to either a labeled adjacency
    /// or a default-route adjacency (spec §4.1) — used by the policy
    /// resolution path to decide whether the original FIB result is
    /// already "good enough" to keep without further policy work.
    pub fn is_dpo_labeled_or_default_route(
        &self,
        lbd: &LoadBalanceDescriptor,
        default_route: &crate::default_route::DefaultRouteTracker,
        family: AddressFamily,
    ) -> bool {
        lbd.buckets.iter().any(|b| {
            if b.proto != family {
                return false;
            }
            let adj = b.adjacency_index as usize;
            (adj < self.adj_to_label.len() && self.adj_to_label[adj].is_some())
                || default_route.is_default(b.adjacency_index)
        })
    }

    /// The configured adjacency-index bound (spec §3/§9: "a pragmatic
    /// cap, not a guarantee; the source asserts it"). Used by the
    /// datapath to assert every FIB-lookup bucket stays within range.
    pub fn max_adjacency_index(&self) -> u32 {
        self.adj_to_label.len() as u32
    }

    pub fn list_links(&self) -> Vec<Link> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                LinkSlot::Live(l) => Some(l.clone()),
                LinkSlot::Free => None,
            })
            .collect()
    }
}

/// Adapter implementing [`FibChild`] against a borrowed [`LinkRegistry`],
/// so back-walk propagation can be driven through the trait object the
/// way the routing-table collaborator expects (spec §9).
pub struct LinkBackWalkHandle<'a> {
    registry: &'a mut LinkRegistry,
    label: Label,
}

impl<'a> FibChild for LinkBackWalkHandle<'a> {
    fn back_walk(&mut self, routing: &dyn RoutingTable) -> BackWalkResult {
        self.registry.refresh_dpo(self.label, routing)
    }
}


#[cfg(test)]
impl Link {
    fn dpo_pathlist_for_test(&self) -> PathListId {
        self.pathlist
    }
}

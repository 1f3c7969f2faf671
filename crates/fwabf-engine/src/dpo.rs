//! Data-Path Objects: the `{next-node, opaque-index}` pair that tells the
//! datapath which downstream node to hand a packet to, and with what
//! per-node state (GLOSSARY: DPO).

/// Address family a link, DPO, or lookup is bound to. Exactly one per
/// link (spec §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// Tag describing what kind of forwarding object this DPO is. Mirrors the
/// subset of VPP's DPO type lattice the engine's invariants depend on:
/// an `AdjacencyIncomplete` DPO means "ARP/ND not resolved yet", which the
/// link registry and datapath both treat as "link unreachable" without
/// needing to understand adjacency internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpoType {
    Adjacency,
    AdjacencyIncomplete,
    AdjacencyMidchain,
    LoadBalance,
    Drop,
}

impl DpoType {
    /// Adjacency and midchain adjacency DPOs are ready to forward through;
    /// incomplete adjacencies are not (spec §4.1 `get_labeled_dpo`).
    pub fn is_resolved_adjacency(&self) -> bool {
        matches!(self, DpoType::Adjacency | DpoType::AdjacencyMidchain)
    }
}

/// A forwarding descriptor: which node to hand the packet to
/// (`next_node`, opaque to this crate — owned by the downstream graph
/// collaborator) plus an opaque per-node index (e.g. an adjacency id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dpo {
    pub dpo_type: DpoType,
    pub proto: AddressFamily,
    pub next_node: u32,
    pub adjacency_index: u32,
}

impl Dpo {
    pub const INVALID_NODE: u32 = u32::MAX;

    /// The canonical "no forwarding object" value. `is_valid()` is false
    /// for this value regardless of `dpo_type`.
    pub fn invalid(proto: AddressFamily) -> Self {
        Dpo {
            dpo_type: DpoType::AdjacencyIncomplete,
            proto,
            next_node: Self::INVALID_NODE,
            adjacency_index: u32::MAX,
        }
    }

    pub fn drop(proto: AddressFamily) -> Self {
        Dpo {
            dpo_type: DpoType::Drop,
            proto,
            next_node: Self::INVALID_NODE,
            adjacency_index: u32::MAX,
        }
    }

    /// A DPO is usable for forwarding a label/policy decision iff it
    /// resolves to an adjacency (spec §4.1 `get_labeled_dpo`: "reachable"
    /// means `dpo.type in {adjacency, adjacency_midchain}`).
    pub fn is_valid(&self) -> bool {
        self.next_node != Self::INVALID_NODE && self.dpo_type.is_resolved_adjacency()
    }
}

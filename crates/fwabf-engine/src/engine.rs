//! Composed entry point: wires C1–C7 together behind one API.
//!
//! Mirrors the teacher's runtime composition style (one struct owning
//! every collaborator-facing registry, plain methods rather than a
//! message-passing actor) but without a background worker thread: the
//! datapath here is a direct synchronous call, not a scheduled job, so
//! there is no equivalent of `BondingRuntime`'s channel/thread pair.
//! Control-plane methods (`add_link`, `add_policy`, ...) are expected to
//! run from a single administrative thread; `process_packet` is safe to
//! call concurrently with itself from any number of worker threads
//! against the same `&Engine` (spec §5).

use crate::acl::AclCollaborator;
use crate::attachment::{Attachment, AttachmentTable};
use crate::config::EngineConfig;
use crate::counters::{CounterSink, LabelCounters, PolicyCounters, TraceRecord};
use crate::datapath::{self, DatapathConfig, DatapathOutcome};
use crate::default_route::DefaultRouteTracker;
use crate::dpo::AddressFamily;
use crate::error::EngineResult;
use crate::label::Label;
use crate::links::{Link, LinkRegistry};
use crate::locals::LocalAddressSet;
use crate::policy::{Policy, PolicyAction, PolicyRegistry};
use crate::quality::Quality;
use crate::routing::RoutingTable;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// The composed engine. Generic over neither collaborator: both
/// `RoutingTable` and `AclCollaborator` are passed by reference into the
/// methods that need them, the same way the original plugin receives
/// `vnet`/`acl_plugin` callbacks rather than owning them.
pub struct Engine {
    config: EngineConfig,
    links: LinkRegistry,
    policies: PolicyRegistry,
    attachments: AttachmentTable,
    default_route: DefaultRouteTracker,
    locals: LocalAddressSet,
    counters: CounterSink,
    v4: DatapathConfig,
    v6: DatapathConfig,
    dead_link_streak: Vec<u64>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let max_adj = config.max_adjacency_index;
        Engine {
            links: LinkRegistry::new(max_adj),
            policies: PolicyRegistry::new(),
            attachments: AttachmentTable::new(),
            default_route: DefaultRouteTracker::new(max_adj),
            locals: LocalAddressSet::new(config.locals_initial_capacity),
            counters: CounterSink::new(1024),
            v4: DatapathConfig { fib_index: 0, hbh_enabled: false, hbh_node_index: u32::MAX },
            v6: DatapathConfig { fib_index: 0, hbh_enabled: false, hbh_node_index: u32::MAX },
            dead_link_streak: vec![0; max_adj as usize],
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Configures which FIB table and, for IPv6, which Hop-by-Hop node
    /// to redirect to, for packets arriving in `family` (spec §4.5
    /// step 5).
    pub fn configure_datapath(&mut self, family: AddressFamily, datapath_config: DatapathConfig) {
        match family {
            AddressFamily::V4 => self.v4 = datapath_config,
            AddressFamily::V6 => self.v6 = datapath_config,
        }
    }

    /// Registers which FIB table backs the `0/0` (or `::/0`) entry this
    /// engine watches for default-route overrides (spec §4.2).
    pub fn watch_default_route(&mut self, family: AddressFamily, fib_index: u32) {
        self.default_route.watch(family, fib_index);
    }

    // ---- C1: local addresses -------------------------------------------

    pub fn add_local_v4(&mut self, addr: Ipv4Addr) {
        self.locals.add_v4(addr);
    }

    pub fn add_local_v6(&mut self, addr: Ipv6Addr) {
        self.locals.add_v6(addr);
    }

    pub fn del_local_v4(&mut self, addr: Ipv4Addr) {
        self.locals.del_v4(addr);
    }

    pub fn del_local_v6(&mut self, addr: Ipv6Addr) {
        self.locals.del_v6(addr);
    }

    pub fn is_local_v4(&self, addr: &Ipv4Addr) -> bool {
        self.locals.contains_v4(addr)
    }

    pub fn is_local_v6(&self, addr: &Ipv6Addr) -> bool {
        self.locals.contains_v6(addr)
    }

    pub fn list_locals_v4(&self) -> Vec<Ipv4Addr> {
        self.locals.list_v4()
    }

    pub fn list_locals_v6(&self) -> Vec<Ipv6Addr> {
        self.locals.list_v6()
    }

    // ---- C2: links -------------------------------------------------------

    pub fn add_link(
        &mut self,
        sw_if_index: u32,
        label: u8,
        family: AddressFamily,
        nexthop: IpAddr,
        routing: &mut dyn RoutingTable,
    ) -> EngineResult<()> {
        self.links.add_link(sw_if_index, label, family, nexthop, routing)
    }

    pub fn delete_link(&mut self, sw_if_index: u32, routing: &mut dyn RoutingTable) {
        self.links.delete_link(sw_if_index, routing);
    }

    /// Drives a back-walk notification for `label`'s link through to
    /// completion, escalating a `warn!`/`error!` log the way the
    /// teacher's scheduler logs a link going dead (first occurrence,
    /// then every `dead_link_log_every`th occurrence) rather than
    /// logging every single notification.
    pub fn refresh_link(&mut self, label: Label, routing: &dyn RoutingTable) {
        self.links.refresh_dpo(label, routing);
        if self.links.is_reachable(label) {
            if let Some(adj) = self.links.link(label).map(|l| l.dpo.adjacency_index) {
                if let Some(slot) = self.dead_link_streak.get_mut(adj as usize) {
                    *slot = 0;
                }
            }
            return;
        }
        let Some(adj) = self.links.link(label).map(|l| l.dpo.adjacency_index) else {
            return;
        };
        let Some(slot) = self.dead_link_streak.get_mut(adj as usize) else {
            return;
        };
        *slot += 1;
        if *slot == 1 {
            tracing::warn!(label = label.get(), "link became unreachable");
        } else if *slot % self.config.dead_link_log_every == 0 {
            tracing::error!(label = label.get(), streak = *slot, "link still unreachable");
        }
    }

    pub fn set_quality(&mut self, label: Label, quality: Quality) {
        self.links.set_quality(label, quality);
    }

    pub fn is_reachable(&self, label: Label) -> bool {
        self.links.is_reachable(label)
    }

    pub fn list_links(&self) -> Vec<Link> {
        self.links.list_links()
    }

    // ---- C3: default route ----------------------------------------------

    pub fn refresh_default_route(&mut self, family: AddressFamily, routing: &dyn RoutingTable) {
        self.default_route.refresh(family, routing);
    }

    // ---- C4: policies ------------------------------------------------------

    pub fn add_policy(&mut self, policy_id: u32, acl_id: u32, action: PolicyAction) -> EngineResult<()> {
        self.policies.add(policy_id, acl_id, action)
    }

    pub fn delete_policy(&mut self, policy_id: u32) -> EngineResult<()> {
        self.policies.delete(policy_id)
    }

    pub fn set_default_route_action(&mut self, action: PolicyAction) {
        self.policies.set_default_route_action(action);
    }

    pub fn clear_default_route_action(&mut self) {
        self.policies.clear_default_route_action();
    }

    pub fn list_policies(&self) -> Vec<Policy> {
        self.policies.list_policies()
    }

    // ---- C5: attachments -------------------------------------------------

    pub fn attach_policy(
        &mut self,
        family: AddressFamily,
        policy_id: u32,
        priority: u32,
        sw_if_index: u32,
        acl: &mut dyn AclCollaborator,
    ) -> EngineResult<()> {
        self.attachments.attach(family, policy_id, priority, sw_if_index, &mut self.policies, acl)
    }

    pub fn detach_policy(
        &mut self,
        family: AddressFamily,
        policy_id: u32,
        sw_if_index: u32,
        acl: &mut dyn AclCollaborator,
    ) -> EngineResult<()> {
        self.attachments.detach(family, policy_id, sw_if_index, &mut self.policies, acl)
    }

    pub fn list_attachments(&self, family: AddressFamily) -> Vec<Attachment> {
        self.attachments.list_attachments(family)
    }

    // ---- C6: datapath ------------------------------------------------------

    /// Runs one packet through the full pipeline and records its
    /// counters/trace entry. Safe to call concurrently with itself and
    /// with every other `&self` method; never safe to call concurrently
    /// with a `&mut self` control-plane method (spec §5).
    #[allow(clippy::too_many_arguments)]
    pub fn process_packet(
        &mut self,
        sw_if_index: u32,
        family: AddressFamily,
        dst_addr: IpAddr,
        packet_bytes: &[u8],
        routing: &dyn RoutingTable,
        acl: &dyn AclCollaborator,
    ) -> DatapathOutcome {
        let datapath_config = match family {
            AddressFamily::V4 => &self.v4,
            AddressFamily::V6 => &self.v6,
        };
        datapath::process_packet(
            sw_if_index,
            family,
            dst_addr,
            packet_bytes,
            datapath_config,
            routing,
            acl,
            &self.links,
            &self.policies,
            &self.attachments,
            &self.default_route,
            &mut self.counters,
        )
    }

    // ---- C7: counters ------------------------------------------------------

    pub fn label_counters(&self, label: u8) -> LabelCounters {
        self.counters.label_counters(label)
    }

    pub fn policy_counters(&self, policy_id: u32) -> PolicyCounters {
        self.counters.policy_counters(policy_id)
    }

    pub fn trace(&self) -> &[TraceRecord] {
        self.counters.trace()
    }

    pub fn counters_snapshot_json(&self) -> serde_json::Value {
        self.counters.snapshot_json()
    }
}

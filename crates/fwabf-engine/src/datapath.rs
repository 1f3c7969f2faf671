//! C6: the datapath node — the central per-packet algorithm (spec §4.5).
//!
//! One address-family variant, called once per packet: FIB lookup → ACL
//! match → policy resolution → DPO emission. Strictly synchronous and
//! allocation-free on every path (spec §5): no blocking, no suspension
//! points, safe to call concurrently from multiple worker threads against
//! the same read-only view of the control-plane registries.
//!
//! State machine per packet (transient, never persisted): `parsed ->
//! fib_looked_up -> acl_matched? -> policy_resolved? -> dpo_selected`.
//! The only observable outputs are the returned [`DatapathOutcome`] and
//! the counter/trace updates applied along the way.

use crate::acl::AclCollaborator;
use crate::attachment::AttachmentTable;
use crate::counters::{CounterSink, TraceOutcome, TraceRecord};
use crate::default_route::DefaultRouteTracker;
use crate::dpo::{AddressFamily, Dpo, DpoType};
use crate::flow_hash::flow_hash;
use crate::links::LinkRegistry;
use crate::packet;
use crate::policy::{PolicyOutcome, PolicyRegistry};
use crate::routing::{LoadBalanceDescriptor, RoutingTable};
use std::net::IpAddr;

/// Per-(address-family) node configuration: which FIB table this node's
/// lookups run against, and the IPv6 Hop-by-Hop redirect (spec §4.5 step
/// 5: "if the packet has a Hop-by-Hop Options header and HbH processing
/// is enabled globally, redirect the next-node to the HbH handler").
#[derive(Debug, Clone, Copy)]
pub struct DatapathConfig {
    pub fib_index: u32,
    pub hbh_enabled: bool,
    pub hbh_node_index: u32,
}

/// Outcome of running one packet through the node: the DPO to enqueue to,
/// plus whatever the pipeline stashed in packet metadata along the way
/// (spec §4.5 step 5: `ip.flow_hash`, `ip.adj_index`; the latter is
/// `dpo.adjacency_index`, already present in [`Dpo`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatapathOutcome {
    pub dpo: Dpo,
    pub flow_hash: Option<u32>,
    pub policy_id: Option<u32>,
}

/// Runs the per-packet pipeline (spec §4.5). `packet_bytes` is the raw L3
/// header (and beyond) of the packet on the wire; it is parsed at most
/// once by this crate's own extraction ([`packet::parse`]) when no ACL
/// context already supplied a 5-tuple.
#[allow(clippy::too_many_arguments)]
pub fn process_packet(
    sw_if_index: u32,
    family: AddressFamily,
    dst_addr: IpAddr,
    packet_bytes: &[u8],
    config: &DatapathConfig,
    routing: &dyn RoutingTable,
    acl: &dyn AclCollaborator,
    links: &LinkRegistry,
    policies: &PolicyRegistry,
    attachments: &AttachmentTable,
    default_route: &DefaultRouteTracker,
    counters: &mut CounterSink,
) -> DatapathOutcome {
    let lbd = routing.lookup(family, config.fib_index, dst_addr);
    // Invariant violations (spec §7): the FIB collaborator guarantees a
    // default drop entry, so a lookup always yields at least one bucket,
    // and ECMP fan-out is always a power of two. A violation here is a
    // programmer error in the collaborator, not a packet-level fault.
    assert!(lbd.n_buckets() > 0, "FIB lookup returned zero buckets");
    assert!(
        lbd.n_buckets().is_power_of_two(),
        "FIB load-balance bucket count must be a power of two, got {}",
        lbd.n_buckets()
    );
    let max_adjacency_index = links.max_adjacency_index();
    for bucket in &lbd.buckets {
        if bucket.dpo_type.is_resolved_adjacency() {
            assert!(
                bucket.adjacency_index < max_adjacency_index,
                "adjacency index {} exceeds configured bound {} (spec §9: pragmatic cap, asserted)",
                bucket.adjacency_index,
                max_adjacency_index
            );
        }
    }

    let is_def = links.is_dpo_default_route(&lbd, default_route, family);
    let is_v6 = family == AddressFamily::V6;

    let acl_ctx = attachments.acl_context(family, sw_if_index);
    let acl_tuple = acl_ctx.and_then(|ctx| acl.fill_5tuple(ctx, packet_bytes, is_v6));

    let matched_attachment = match (acl_ctx, &acl_tuple) {
        (Some(ctx), Some(tuple)) => acl
            .match_5tuple(ctx, tuple, is_v6)
            .and_then(|m| attachments.matched(family, sw_if_index, m)),
        _ => None,
    };

    let mut policy_id = None;
    let mut resolved = None;

    if let Some(attachment) = matched_attachment {
        policy_id = Some(attachment.policy_id);
        counters.record_policy_matched(attachment.policy_id);
        let tuple = acl_tuple
            .as_ref()
            .expect("a matched attachment always carries the tuple that produced the match");

        match policies.resolve(attachment.policy_id, tuple, &lbd, is_def, links, family) {
            Ok(PolicyOutcome::Forward(dpo)) => {
                counters.record_policy_applied(attachment.policy_id);
                if let Some(label) = links.adj_label(dpo.adjacency_index) {
                    counters.record_label_hit(label.get(), is_def);
                }
                resolved = Some(DatapathOutcome { dpo, flow_hash: None, policy_id });
            }
            Ok(PolicyOutcome::UseFib) => {
                counters.record_policy_fallback(attachment.policy_id);
            }
            Ok(PolicyOutcome::Drop) => {
                counters.record_policy_dropped(attachment.policy_id);
                record_group_misses(policies, attachment.policy_id, is_def, counters);
                resolved = Some(DatapathOutcome {
                    dpo: Dpo::drop(family),
                    flow_hash: None,
                    policy_id,
                });
            }
            Err(_) => {
                // The attachment's cached policy_index raced a concurrent
                // delete between ACL match and resolution; §5's safety
                // guarantee means this is observable but never unsound —
                // fall back to the FIB result like an ACL miss would.
                tracing::warn!(
                    policy_id = attachment.policy_id,
                    "attached policy vanished mid-resolution, falling back to FIB"
                );
            }
        }
    }

    let mut outcome =
        resolved.unwrap_or_else(|| finalize_from_fib(family, &lbd, packet_bytes, config));
    outcome.policy_id = policy_id;

    counters.push_trace(TraceRecord {
        sw_if_index,
        policy_id,
        flow_hash: outcome.flow_hash.unwrap_or(0),
        outcome: trace_outcome(&outcome.dpo),
    });

    outcome
}

/// Records a miss against every label a dropped policy's groups named,
/// so `show fwabf labels` reflects which labels this policy tried and
/// couldn't use (spec §3: per-label `{hits, misses, enforced_hits,
/// enforced_misses}`).
fn record_group_misses(
    policies: &PolicyRegistry,
    policy_id: u32,
    is_def: bool,
    counters: &mut CounterSink,
) {
    let Some(idx) = policies.find(policy_id) else {
        return;
    };
    let Some(policy) = policies.get(idx) else {
        return;
    };
    for group in &policy.action.groups {
        for label in &group.labels {
            counters.record_label_miss(label.get(), is_def);
        }
    }
}

/// FIB finalization (spec §4.5 step 5): used whenever the policy layer
/// didn't dictate a DPO — either there was no ACL match, or the matched
/// policy's fallback is `use_default_routing`.
fn finalize_from_fib(
    family: AddressFamily,
    lbd: &LoadBalanceDescriptor,
    packet_bytes: &[u8],
    config: &DatapathConfig,
) -> DatapathOutcome {
    let parsed = packet::parse(family, packet_bytes);

    let (mut dpo, flow_hash_value) = if lbd.n_buckets() == 1 {
        (lbd.buckets[0], None)
    } else {
        let tuple = parsed.tuple.unwrap_or_else(|| zero_tuple(family));
        let h = flow_hash(&tuple);
        (*lbd.bucket_for_hash(h), Some(h))
    };

    if family == AddressFamily::V6
        && dpo.dpo_type.is_resolved_adjacency()
        && parsed.has_hop_by_hop
        && config.hbh_enabled
    {
        dpo.next_node = config.hbh_node_index;
    }

    DatapathOutcome { dpo, flow_hash: flow_hash_value, policy_id: None }
}

fn zero_tuple(family: AddressFamily) -> crate::acl::FiveTuple {
    let zero = match family {
        AddressFamily::V4 => IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        AddressFamily::V6 => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
    };
    crate::acl::FiveTuple {
        protocol: 0,
        src_addr: zero,
        dst_addr: zero,
        src_port: 0,
        dst_port: 0,
    }
}

fn trace_outcome(dpo: &Dpo) -> TraceOutcome {
    if dpo.dpo_type == DpoType::Drop {
        TraceOutcome::Dropped
    } else if dpo.is_valid() {
        TraceOutcome::Forwarded { adjacency_index: dpo.adjacency_index }
    } else {
        TraceOutcome::FellBackToFib
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{AclContextId, AclMatch, AclUserId, FiveTuple};
    use crate::dpo::AddressFamily;
    use crate::label::Label;
    use crate::policy::{Fallback, LinkGroup, SelectionAlg};
    use crate::quality::Quality;
    use crate::routing::{PathListId, ResolvedPath, SiblingId};
    use std::collections::HashMap;

    struct FakeRouting {
        lbd: LoadBalanceDescriptor,
        default_lbd: LoadBalanceDescriptor,
        next_pathlist: u32,
        next_adjacency: u32,
        dpo_for_pathlist: HashMap<u32, Dpo>,
    }

    impl FakeRouting {
        fn new() -> Self {
            FakeRouting {
                lbd: LoadBalanceDescriptor { buckets: vec![] },
                default_lbd: LoadBalanceDescriptor { buckets: vec![] },
                next_pathlist: 0,
                next_adjacency: 100,
                dpo_for_pathlist: HashMap::new(),
            }
        }
    }

    impl RoutingTable for FakeRouting {
        fn lookup(&self, _family: AddressFamily, _fib_index: u32, _dst_addr: IpAddr) -> LoadBalanceDescriptor {
            self.lbd.clone()
        }
        fn lookup_default(&self, _family: AddressFamily, _fib_index: u32) -> LoadBalanceDescriptor {
            self.default_lbd.clone()
        }
        fn create_pathlist(&mut self, _shared: bool, _path: ResolvedPath) -> PathListId {
            let id = self.next_pathlist;
            self.next_pathlist += 1;
            let adj = self.next_adjacency;
            self.next_adjacency += 1;
            self.dpo_for_pathlist.insert(
                id,
                Dpo {
                    dpo_type: DpoType::Adjacency,
                    proto: AddressFamily::V4,
                    next_node: 7,
                    adjacency_index: adj,
                },
            );
            PathListId(id)
        }
        fn contribute_forwarding(&self, pathlist: PathListId) -> Dpo {
            self.dpo_for_pathlist
                .get(&pathlist.0)
                .copied()
                .unwrap_or(Dpo::invalid(AddressFamily::V4))
        }
        fn add_child(&mut self, _parent: PathListId, _child_index: u32) -> SiblingId {
            SiblingId(0)
        }
        fn remove_child(&mut self, _parent: PathListId, _sibling: SiblingId) {}
    }

    /// An ACL collaborator whose every packet matches attachment position 0.
    struct AlwaysMatchAcl {
        tuple: FiveTuple,
    }

    impl AclCollaborator for AlwaysMatchAcl {
        fn register_user(&mut self, _name: &str) -> AclUserId {
            AclUserId(1)
        }
        fn get_context(&mut self, _user: AclUserId, _sw_if_index: u32, _is_input: bool) -> AclContextId {
            AclContextId(0)
        }
        fn put_context(&mut self, _ctx: AclContextId) {}
        fn set_vec_for_context(&mut self, _ctx: AclContextId, _acl_ids: &[u32]) {}
        fn fill_5tuple(&self, _ctx: AclContextId, _packet: &[u8], _is_v6: bool) -> Option<FiveTuple> {
            Some(self.tuple)
        }
        fn match_5tuple(&self, _ctx: AclContextId, _tuple: &FiveTuple, _is_v6: bool) -> Option<AclMatch> {
            Some(AclMatch { attachment_position: 0 })
        }
    }

    struct NeverMatchAcl;
    impl AclCollaborator for NeverMatchAcl {
        fn register_user(&mut self, _name: &str) -> AclUserId {
            AclUserId(1)
        }
        fn get_context(&mut self, _user: AclUserId, _sw_if_index: u32, _is_input: bool) -> AclContextId {
            AclContextId(0)
        }
        fn put_context(&mut self, _ctx: AclContextId) {}
        fn set_vec_for_context(&mut self, _ctx: AclContextId, _acl_ids: &[u32]) {}
        fn fill_5tuple(&self, _ctx: AclContextId, _packet: &[u8], _is_v6: bool) -> Option<FiveTuple> {
            None
        }
        fn match_5tuple(&self, _ctx: AclContextId, _tuple: &FiveTuple, _is_v6: bool) -> Option<AclMatch> {
            None
        }
    }

    fn tuple() -> FiveTuple {
        FiveTuple {
            protocol: 6,
            src_addr: "10.0.0.1".parse().unwrap(),
            dst_addr: "8.8.8.8".parse().unwrap(),
            src_port: 51000,
            dst_port: 443,
        }
    }

    fn nexthop() -> IpAddr {
        "192.0.2.1".parse().unwrap()
    }

    fn default_config() -> DatapathConfig {
        DatapathConfig { fib_index: 0, hbh_enabled: true, hbh_node_index: 99 }
    }

    #[test]
    fn no_match_falls_back_to_single_bucket_fib_result() {
        let mut routing = FakeRouting::new();
        let fib_dpo = Dpo {
            dpo_type: DpoType::Adjacency,
            proto: AddressFamily::V4,
            next_node: 42,
            adjacency_index: 5,
        };
        routing.lbd = LoadBalanceDescriptor { buckets: vec![fib_dpo] };

        let links = LinkRegistry::new(1024);
        let policies = PolicyRegistry::new();
        let attachments = AttachmentTable::new();
        let default_route = DefaultRouteTracker::new(1024);
        let mut counters = CounterSink::new(16);
        let acl = NeverMatchAcl;

        let outcome = process_packet(
            1,
            AddressFamily::V4,
            "8.8.8.8".parse().unwrap(),
            &[],
            &default_config(),
            &routing,
            &acl,
            &links,
            &policies,
            &attachments,
            &default_route,
            &mut counters,
        );
        assert_eq!(outcome.dpo, fib_dpo);
        assert!(outcome.policy_id.is_none());
        assert_eq!(counters.trace().len(), 1);
    }

    #[test]
    fn multi_bucket_fib_selects_via_flow_hash_and_records_it() {
        let mut routing = FakeRouting::new();
        let a = Dpo { dpo_type: DpoType::Adjacency, proto: AddressFamily::V4, next_node: 1, adjacency_index: 1 };
        let b = Dpo { dpo_type: DpoType::Adjacency, proto: AddressFamily::V4, next_node: 1, adjacency_index: 2 };
        routing.lbd = LoadBalanceDescriptor { buckets: vec![a, b] };

        let links = LinkRegistry::new(1024);
        let policies = PolicyRegistry::new();
        let attachments = AttachmentTable::new();
        let default_route = DefaultRouteTracker::new(1024);
        let mut counters = CounterSink::new(16);
        let acl = NeverMatchAcl;

        let pkt = super_simple_v4_packet();
        let outcome = process_packet(
            1,
            AddressFamily::V4,
            "8.8.8.8".parse().unwrap(),
            &pkt,
            &default_config(),
            &routing,
            &acl,
            &links,
            &policies,
            &attachments,
            &default_route,
            &mut counters,
        );
        assert!(outcome.flow_hash.is_some());
        assert!(outcome.dpo == a || outcome.dpo == b);
    }

    fn super_simple_v4_packet() -> Vec<u8> {
        let mut p = vec![0u8; 28];
        p[0] = 0x45;
        p[9] = 17;
        p[12..16].copy_from_slice(&[10, 0, 0, 1]);
        p[16..20].copy_from_slice(&[8, 8, 8, 8]);
        p[20..22].copy_from_slice(&51000u16.to_be_bytes());
        p[22..24].copy_from_slice(&443u16.to_be_bytes());
        p
    }

    fn attach_policy_with_labels(
        links: &mut LinkRegistry,
        policies: &mut PolicyRegistry,
        attachments: &mut AttachmentTable,
        routing: &mut FakeRouting,
        acl: &mut impl AclCollaborator,
        labels: &[u8],
        fallback: Fallback,
        sw_if_index: u32,
    ) -> u32 {
        for (i, l) in labels.iter().enumerate() {
            links
                .add_link(100 + i as u32, *l, AddressFamily::V4, nexthop(), routing)
                .unwrap();
        }
        let group = LinkGroup::new(
            SelectionAlg::Ordered,
            labels.iter().map(|l| Label::new(*l).unwrap()).collect(),
        )
        .unwrap();
        let action = crate::policy::PolicyAction::new(fallback, SelectionAlg::Ordered, vec![group]).unwrap();
        let policy_id = 1;
        policies.add(policy_id, 500, action).unwrap();
        attachments
            .attach(AddressFamily::V4, policy_id, 0, sw_if_index, policies, acl)
            .unwrap();
        policy_id
    }

    #[test]
    fn matched_policy_forwards_via_labeled_link() {
        let mut routing = FakeRouting::new();
        let mut links = LinkRegistry::new(1024);
        let mut policies = PolicyRegistry::new();
        let mut attachments = AttachmentTable::new();
        let default_route = DefaultRouteTracker::new(1024);
        let mut counters = CounterSink::new(16);
        let mut acl = AlwaysMatchAcl { tuple: tuple() };

        let policy_id =
            attach_policy_with_labels(&mut links, &mut policies, &mut attachments, &mut routing, &mut acl, &[10], Fallback::Drop, 1);

        routing.lbd = LoadBalanceDescriptor { buckets: vec![] };

        let outcome = process_packet(
            1,
            AddressFamily::V4,
            "8.8.8.8".parse().unwrap(),
            &[],
            &default_config(),
            &routing,
            &acl,
            &links,
            &policies,
            &attachments,
            &default_route,
            &mut counters,
        );
        assert_eq!(outcome.policy_id, Some(policy_id));
        assert!(outcome.dpo.is_valid());
        assert_eq!(counters.policy_counters(policy_id).applied, 1);
        assert_eq!(counters.label_counters(10).hits, 1);
    }

    #[test]
    fn matched_policy_drop_fallback_emits_drop_dpo() {
        let mut routing = FakeRouting::new();
        let mut links = LinkRegistry::new(1024);
        let mut policies = PolicyRegistry::new();
        let mut attachments = AttachmentTable::new();
        let default_route = DefaultRouteTracker::new(1024);
        let mut counters = CounterSink::new(16);
        let mut acl = AlwaysMatchAcl { tuple: tuple() };

        // Link exists but is down (loss=100), so the policy can't use it.
        let policy_id =
            attach_policy_with_labels(&mut links, &mut policies, &mut attachments, &mut routing, &mut acl, &[10], Fallback::Drop, 1);
        links.set_quality(Label::new(10).unwrap(), Quality::new(100, 0, 0));
        routing.lbd = LoadBalanceDescriptor { buckets: vec![] };

        let outcome = process_packet(
            1,
            AddressFamily::V4,
            "192.168.5.10".parse().unwrap(),
            &[],
            &default_config(),
            &routing,
            &acl,
            &links,
            &policies,
            &attachments,
            &default_route,
            &mut counters,
        );
        assert_eq!(outcome.dpo.dpo_type, DpoType::Drop);
        assert_eq!(counters.policy_counters(policy_id).dropped, 1);
        assert_eq!(counters.label_counters(10).misses, 1);
    }

    #[test]
    fn matched_policy_default_route_fallback_uses_fib() {
        let mut routing = FakeRouting::new();
        let fib_dpo = Dpo { dpo_type: DpoType::Adjacency, proto: AddressFamily::V4, next_node: 1, adjacency_index: 55 };

        let mut links = LinkRegistry::new(1024);
        let mut policies = PolicyRegistry::new();
        let mut attachments = AttachmentTable::new();
        let default_route = DefaultRouteTracker::new(1024);
        let mut counters = CounterSink::new(16);
        let mut acl = AlwaysMatchAcl { tuple: tuple() };

        let policy_id = attach_policy_with_labels(
            &mut links,
            &mut policies,
            &mut attachments,
            &mut routing,
            &mut acl,
            &[10],
            Fallback::DefaultRoute,
            1,
        );
        links.set_quality(Label::new(10).unwrap(), Quality::new(100, 0, 0));
        routing.lbd = LoadBalanceDescriptor { buckets: vec![fib_dpo] };

        let outcome = process_packet(
            1,
            AddressFamily::V4,
            "192.168.5.10".parse().unwrap(),
            &[],
            &default_config(),
            &routing,
            &acl,
            &links,
            &policies,
            &attachments,
            &default_route,
            &mut counters,
        );
        assert_eq!(outcome.dpo, fib_dpo);
        assert_eq!(counters.policy_counters(policy_id).fallback, 1);
    }

    #[test]
    fn zero_bucket_lbd_asserts() {
        let result = std::panic::catch_unwind(|| {
            let routing = FakeRouting::new(); // default empty buckets
            let links = LinkRegistry::new(1024);
            let policies = PolicyRegistry::new();
            let attachments = AttachmentTable::new();
            let default_route = DefaultRouteTracker::new(1024);
            let mut counters = CounterSink::new(16);
            let acl = NeverMatchAcl;
            process_packet(
                1,
                AddressFamily::V4,
                "8.8.8.8".parse().unwrap(),
                &[],
                &default_config(),
                &routing,
                &acl,
                &links,
                &policies,
                &attachments,
                &default_route,
                &mut counters,
            );
        });
        assert!(result.is_err());
    }

    #[test]
    fn out_of_bound_adjacency_index_asserts() {
        let result = std::panic::catch_unwind(|| {
            let mut routing = FakeRouting::new();
            let oob = Dpo {
                dpo_type: DpoType::Adjacency,
                proto: AddressFamily::V4,
                next_node: 1,
                adjacency_index: 2048,
            };
            routing.lbd = LoadBalanceDescriptor { buckets: vec![oob] };

            let links = LinkRegistry::new(1024);
            let policies = PolicyRegistry::new();
            let attachments = AttachmentTable::new();
            let default_route = DefaultRouteTracker::new(1024);
            let mut counters = CounterSink::new(16);
            let acl = NeverMatchAcl;
            process_packet(
                1,
                AddressFamily::V4,
                "8.8.8.8".parse().unwrap(),
                &[],
                &default_config(),
                &routing,
                &acl,
                &links,
                &policies,
                &attachments,
                &default_route,
                &mut counters,
            );
        });
        assert!(result.is_err());
    }

    #[test]
    fn ipv6_hbh_redirects_next_node_when_enabled() {
        let mut routing = FakeRouting::new();
        let adj = Dpo { dpo_type: DpoType::Adjacency, proto: AddressFamily::V6, next_node: 1, adjacency_index: 9 };
        routing.lbd = LoadBalanceDescriptor { buckets: vec![adj] };

        let links = LinkRegistry::new(1024);
        let policies = PolicyRegistry::new();
        let attachments = AttachmentTable::new();
        let default_route = DefaultRouteTracker::new(1024);
        let mut counters = CounterSink::new(16);
        let acl = NeverMatchAcl;

        let mut pkt = vec![0u8; 48];
        pkt[0] = 0x60;
        pkt[6] = 0; // hop-by-hop
        pkt[40] = PROTO_TCP_FOR_TEST;
        pkt[41] = 0;

        let outcome = process_packet(
            1,
            AddressFamily::V6,
            "2001:db8::1".parse().unwrap(),
            &pkt,
            &default_config(),
            &routing,
            &acl,
            &links,
            &policies,
            &attachments,
            &default_route,
            &mut counters,
        );
        assert_eq!(outcome.dpo.next_node, 99);
    }

    const PROTO_TCP_FOR_TEST: u8 = 6;
}

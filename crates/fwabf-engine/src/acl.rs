//! Contract for the ACL collaborator (spec §6, bullet 2).
//!
//! ACL rule syntax and the rule-matching engine itself are out of scope
//! (spec §1 Non-goals); this module only defines the 5-tuple shape and
//! the hot-path match contract the datapath calls through.

use std::net::IpAddr;

/// The canonical 5-tuple an ACL match (and the flow hash) is computed
/// over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub protocol: u8,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Opaque id for an ACL lookup context, acquired once per (interface,
/// address-family) on first attachment and released on last detachment
/// (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AclContextId(pub u32);

/// Opaque id identifying a registered consumer of ACL contexts (spec §6:
/// `register_user`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AclUserId(pub u32);

/// Outcome of an ACL match: the position of the matching policy within
/// the interface's sorted attachment list (spec §4.5 step 3:
/// `match_acl_pos`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclMatch {
    pub attachment_position: usize,
}

/// Contract the ACL collaborator exposes. Hot-path calls
/// (`fill_5tuple`, `match_5tuple`) must be zero-alloc in a real
/// implementation; this crate only consumes the contract.
pub trait AclCollaborator {
    fn register_user(&mut self, name: &str) -> AclUserId;

    fn get_context(&mut self, user: AclUserId, sw_if_index: u32, is_input: bool) -> AclContextId;

    fn put_context(&mut self, ctx: AclContextId);

    fn set_vec_for_context(&mut self, ctx: AclContextId, acl_ids: &[u32]);

    fn fill_5tuple(&self, ctx: AclContextId, packet: &[u8], is_v6: bool) -> Option<FiveTuple>;

    fn match_5tuple(&self, ctx: AclContextId, tuple: &FiveTuple, is_v6: bool) -> Option<AclMatch>;
}

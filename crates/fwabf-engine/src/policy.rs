//! C4: Policy registry and the policy resolution algorithm (spec §4.3).
//!
//! A policy binds an ACL id to an *action*: an ordered or randomly-picked
//! list of link groups, each itself an ordered or randomly-picked list of
//! labels, plus a fallback for when no labeled link is usable. Resolution
//! never allocates and never blocks — it is called from the datapath.

use crate::acl::FiveTuple;
use crate::dpo::{AddressFamily, Dpo};
use crate::error::{EngineError, EngineResult};
use crate::flow_hash::{bounded_index, flow_hash, pow2_mask_for_len};
use crate::label::Label;
use crate::links::LinkRegistry;
use crate::routing::LoadBalanceDescriptor;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionAlg {
    Ordered,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    DefaultRoute,
    Drop,
}

#[derive(Debug, Clone)]
pub struct LinkGroup {
    pub link_alg: SelectionAlg,
    pub labels: Vec<Label>,
    labels_mask: u32,
    labels_len_minus_1: u32,
}

impl LinkGroup {
    pub fn new(link_alg: SelectionAlg, labels: Vec<Label>) -> EngineResult<Self> {
        if labels.is_empty() {
            return Err(EngineError::InvalidArgument);
        }
        let (labels_mask, labels_len_minus_1) = pow2_mask_for_len(labels.len());
        Ok(LinkGroup {
            link_alg,
            labels,
            labels_mask,
            labels_len_minus_1,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PolicyAction {
    pub fallback: Fallback,
    pub group_alg: SelectionAlg,
    pub groups: Vec<LinkGroup>,
    groups_mask: u32,
    groups_len_minus_1: u32,
}

impl PolicyAction {
    /// Rejects a zero-group action (spec §8 boundary behavior).
    pub fn new(fallback: Fallback, group_alg: SelectionAlg, groups: Vec<LinkGroup>) -> EngineResult<Self> {
        if groups.is_empty() {
            return Err(EngineError::InvalidArgument);
        }
        let (groups_mask, groups_len_minus_1) = pow2_mask_for_len(groups.len());
        Ok(PolicyAction {
            fallback,
            group_alg,
            groups,
            groups_mask,
            groups_len_minus_1,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Policy {
    pub policy_id: u32,
    pub acl_id: u32,
    pub action: PolicyAction,
    ref_count: u32,
}

impl Policy {
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

/// Outcome of resolving a policy against one packet (spec §4.3 step 4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PolicyOutcome {
    Forward(Dpo),
    UseFib,
    Drop,
}

#[derive(Clone)]
pub struct PolicyRegistry {
    pool: Vec<Option<Policy>>,
    id_to_index: HashMap<u32, usize>,
    default_route_action: Option<PolicyAction>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        PolicyRegistry {
            pool: Vec::new(),
            id_to_index: HashMap::new(),
            default_route_action: None,
        }
    }

    pub fn add(&mut self, policy_id: u32, acl_id: u32, action: PolicyAction) -> EngineResult<()> {
        if self.id_to_index.contains_key(&policy_id) {
            return Err(EngineError::ValueExists);
        }
        let idx = self.pool.len();
        self.pool.push(Some(Policy {
            policy_id,
            acl_id,
            action,
            ref_count: 0,
        }));
        self.id_to_index.insert(policy_id, idx);
        Ok(())
    }

    /// Refuses if `ref_count > 0`; otherwise removes the id mapping
    /// before dropping the owned action (spec §4.3: "clears the action
    /// ... before freeing owned lists" — removing the id mapping
    /// forecloses `find` seeing this policy while its lists are dropped).
    pub fn delete(&mut self, policy_id: u32) -> EngineResult<()> {
        let idx = *self.id_to_index.get(&policy_id).ok_or(EngineError::NoSuchEntry)?;
        let ref_count = self.pool[idx].as_ref().ok_or(EngineError::NoSuchEntry)?.ref_count;
        if ref_count > 0 {
            return Err(EngineError::InUse);
        }
        self.id_to_index.remove(&policy_id);
        self.pool[idx] = None;
        Ok(())
    }

    pub fn find(&self, policy_id: u32) -> Option<usize> {
        self.id_to_index.get(&policy_id).copied()
    }

    pub fn get(&self, index: usize) -> Option<&Policy> {
        self.pool.get(index).and_then(|slot| slot.as_ref())
    }

    /// Read-only introspection for `show fwabf policy` style listings.
    pub fn list_policies(&self) -> Vec<Policy> {
        self.pool.iter().filter_map(|slot| slot.clone()).collect()
    }

    pub fn incr_ref(&mut self, policy_id: u32) -> EngineResult<()> {
        let idx = self.find(policy_id).ok_or(EngineError::NoSuchEntry)?;
        self.pool[idx].as_mut().unwrap().ref_count += 1;
        Ok(())
    }

    pub fn decr_ref(&mut self, policy_id: u32) {
        if let Some(idx) = self.find(policy_id) {
            if let Some(policy) = self.pool[idx].as_mut() {
                policy.ref_count = policy.ref_count.saturating_sub(1);
            }
        }
    }

    pub fn set_default_route_action(&mut self, action: PolicyAction) {
        self.default_route_action = Some(action);
    }

    pub fn clear_default_route_action(&mut self) {
        self.default_route_action = None;
    }

    /// Runs the full policy resolution algorithm (spec §4.3) for a
    /// single packet.
    pub fn resolve(
        &self,
        policy_id: u32,
        tuple: &FiveTuple,
        lbd: &LoadBalanceDescriptor,
        is_def: bool,
        links: &LinkRegistry,
        family: AddressFamily,
    ) -> EngineResult<PolicyOutcome> {
        let idx = self.find(policy_id).ok_or(EngineError::NoSuchEntry)?;
        let policy = self.get(idx).ok_or(EngineError::NoSuchEntry)?;
        let action = if is_def {
            self.default_route_action.as_ref().unwrap_or(&policy.action)
        } else {
            &policy.action
        };
        Ok(resolve_action(action, tuple, lbd, is_def, links, family))
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn get_dpo_or_labeled(
    label: Label,
    is_def: bool,
    lbd: &LoadBalanceDescriptor,
    family: AddressFamily,
    links: &LinkRegistry,
) -> Option<Dpo> {
    if is_def {
        links.get_labeled_dpo(label, family)
    } else {
        links.get_dpo(label, lbd, family)
    }
}

/// Tries one hash-picked label first (if `link_alg == random` and there's
/// more than one label), then falls back to ordered iteration (spec
/// §4.3 step 2c / step 3).
fn try_group(
    group: &LinkGroup,
    h: u32,
    is_def: bool,
    lbd: &LoadBalanceDescriptor,
    family: AddressFamily,
    links: &LinkRegistry,
) -> Option<Dpo> {
    if group.link_alg == SelectionAlg::Random && group.labels.len() > 1 {
        let idx = bounded_index(h, group.labels_mask, group.labels_len_minus_1) as usize;
        if let Some(dpo) = get_dpo_or_labeled(group.labels[idx], is_def, lbd, family, links) {
            return Some(dpo);
        }
    }
    group
        .labels
        .iter()
        .find_map(|label| get_dpo_or_labeled(*label, is_def, lbd, family, links))
}

fn resolve_action(
    action: &PolicyAction,
    tuple: &FiveTuple,
    lbd: &LoadBalanceDescriptor,
    is_def: bool,
    links: &LinkRegistry,
    family: AddressFamily,
) -> PolicyOutcome {
    let h = flow_hash(tuple);
    let mut found = None;

    if action.group_alg == SelectionAlg::Random && action.groups.len() > 1 {
        let idx = bounded_index(h, action.groups_mask, action.groups_len_minus_1) as usize;
        found = try_group(&action.groups[idx], h, is_def, lbd, family, links);
    }

    if found.is_none() {
        found = action
            .groups
            .iter()
            .find_map(|group| try_group(group, h, is_def, lbd, family, links));
    }

    match found {
        Some(dpo) => PolicyOutcome::Forward(dpo),
        None => match action.fallback {
            Fallback::DefaultRoute => PolicyOutcome::UseFib,
            Fallback::Drop => PolicyOutcome::Drop,
        },
    }
}

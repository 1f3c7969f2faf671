//! C5: Interface-attachment table.
//!
//! Binds a policy to an ingress interface with a priority. Attachments on
//! the same `(address-family, interface)` pair are kept sorted ascending
//! by priority; the first attachment on a pair acquires an ACL lookup
//! context and the last detachment releases it (spec §4.4).

use crate::acl::{AclCollaborator, AclContextId, AclMatch, AclUserId};
use crate::dpo::AddressFamily;
use crate::error::{EngineError, EngineResult};
use crate::policy::PolicyRegistry;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct Attachment {
    pub policy_id: u32,
    pub sw_if_index: u32,
    pub priority: u32,
    pub acl_id: u32,
    pub policy_index: usize,
}

#[derive(Clone)]
struct InterfaceState {
    attachments: Vec<Attachment>,
    acl_context: Option<AclContextId>,
}

impl InterfaceState {
    fn new() -> Self {
        InterfaceState {
            attachments: Vec::new(),
            acl_context: None,
        }
    }
}

#[derive(Clone)]
pub struct AttachmentTable {
    v4: HashMap<u32, InterfaceState>,
    v6: HashMap<u32, InterfaceState>,
    acl_user: Option<AclUserId>,
}

impl AttachmentTable {
    pub fn new() -> Self {
        AttachmentTable {
            v4: HashMap::new(),
            v6: HashMap::new(),
            acl_user: None,
        }
    }

    fn table_mut(&mut self, family: AddressFamily) -> &mut HashMap<u32, InterfaceState> {
        match family {
            AddressFamily::V4 => &mut self.v4,
            AddressFamily::V6 => &mut self.v6,
        }
    }

    fn table(&self, family: AddressFamily) -> &HashMap<u32, InterfaceState> {
        match family {
            AddressFamily::V4 => &self.v4,
            AddressFamily::V6 => &self.v6,
        }
    }

    /// Increments the policy's `ref_count`, inserts the attachment in
    /// priority order, and (on the interface's first attachment)
    /// acquires an ACL context and re-uploads the ACL vector.
    pub fn attach(
        &mut self,
        family: AddressFamily,
        policy_id: u32,
        priority: u32,
        sw_if_index: u32,
        policies: &mut PolicyRegistry,
        acl: &mut dyn AclCollaborator,
    ) -> EngineResult<()> {
        let policy_index = policies.find(policy_id).ok_or(EngineError::NoSuchEntry)?;
        let acl_id = policies.get(policy_index).ok_or(EngineError::NoSuchEntry)?.acl_id;

        let state_exists = self.table(family).contains_key(&sw_if_index);
        if state_exists && self.table(family)[&sw_if_index]
            .attachments
            .iter()
            .any(|a| a.policy_id == policy_id)
        {
            return Err(EngineError::ValueExists);
        }

        if self.acl_user.is_none() {
            self.acl_user = Some(acl.register_user("fwabf"));
        }

        let state = self.table_mut(family).entry(sw_if_index).or_insert_with(InterfaceState::new);
        if state.acl_context.is_none() {
            let user = self.acl_user.unwrap();
            state.acl_context = Some(acl.get_context(user, sw_if_index, true));
        }

        let attachment = Attachment {
            policy_id,
            sw_if_index,
            priority,
            acl_id,
            policy_index,
        };
        let insert_at = state
            .attachments
            .binary_search_by_key(&priority, |a| a.priority)
            .unwrap_or_else(|at| at);
        state.attachments.insert(insert_at, attachment);

        policies.incr_ref(policy_id)?;

        let acl_ids: Vec<u32> = state.attachments.iter().map(|a| a.acl_id).collect();
        acl.set_vec_for_context(state.acl_context.unwrap(), &acl_ids);
        Ok(())
    }

    /// Inverse of [`attach`](Self::attach): releases the ACL context and
    /// drops the interface entry once its attachment list is empty.
    pub fn detach(
        &mut self,
        family: AddressFamily,
        policy_id: u32,
        sw_if_index: u32,
        policies: &mut PolicyRegistry,
        acl: &mut dyn AclCollaborator,
    ) -> EngineResult<()> {
        let state = self
            .table_mut(family)
            .get_mut(&sw_if_index)
            .ok_or(EngineError::NoSuchEntry)?;
        let pos = state
            .attachments
            .iter()
            .position(|a| a.policy_id == policy_id)
            .ok_or(EngineError::NoSuchEntry)?;
        state.attachments.remove(pos);
        policies.decr_ref(policy_id);

        if state.attachments.is_empty() {
            if let Some(ctx) = state.acl_context.take() {
                acl.put_context(ctx);
            }
            self.table_mut(family).remove(&sw_if_index);
        } else {
            let acl_ids: Vec<u32> = state.attachments.iter().map(|a| a.acl_id).collect();
            acl.set_vec_for_context(state.acl_context.unwrap(), &acl_ids);
        }
        Ok(())
    }

    pub fn acl_context(&self, family: AddressFamily, sw_if_index: u32) -> Option<AclContextId> {
        self.table(family).get(&sw_if_index).and_then(|s| s.acl_context)
    }

    /// Attachments for `(family, sw_if_index)`, strictly ascending by
    /// priority (spec §8 "Attachment priority").
    pub fn attachments(&self, family: AddressFamily, sw_if_index: u32) -> &[Attachment] {
        self.table(family)
            .get(&sw_if_index)
            .map(|s| s.attachments.as_slice())
            .unwrap_or(&[])
    }

    pub fn matched(&self, family: AddressFamily, sw_if_index: u32, m: AclMatch) -> Option<&Attachment> {
        self.attachments(family, sw_if_index).get(m.attachment_position)
    }

    /// Every attachment across every interface for `family`, for
    /// `show fwabf interface` style listings. Unordered across
    /// interfaces; priority-ordered within one.
    pub fn list_attachments(&self, family: AddressFamily) -> Vec<Attachment> {
        self.table(family)
            .values()
            .flat_map(|s| s.attachments.iter().copied())
            .collect()
    }
}

impl Default for AttachmentTable {
    fn default() -> Self {
        Self::new()
    }
}

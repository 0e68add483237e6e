//! Expansion policies.
//!
//! A growth request is first planned against the record's own header
//! ([`GrowthPlan`]). Plans that fit in the record's slack never move bytes.
//! Everything else is applied according to the controller's policy:
//!
//! - `Expulse`: a record sharing its buffer is copied into a private buffer
//!   and grown there; array-mates keep the old buffer untouched.
//! - `Single`: the shared buffer is resized in place and every array-mate
//!   living after the splice point has its offset shifted.
//! - `Multiple`: records own their buffers from load onwards, so growth only
//!   ever resizes that buffer.
//!
//! A record that is the sole occupant of its buffer is always resized in
//! place, whatever the policy.

use tracing::{debug, trace};

use bale_common::config::ExpansionPolicy;
use bale_common::error::{BaleError, BaleResult};
use bale_record::{BufferHandle, GrowthPlan, ManagedHeader, RecordFlags};

use crate::registry::AgentId;
use crate::state::ControllerState;

/// How a growth request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// The record's own bytes absorbed the change; nothing moved.
    InPlace,
    /// The backing buffer was resized and array-mates were shifted.
    Spliced,
    /// The record was copied into a private buffer first.
    Expelled,
}

impl ControllerState {
    /// Resizes an agent according to `plan` under `policy`.
    pub fn grow(
        &mut self,
        id: AgentId,
        policy: ExpansionPolicy,
        plan: impl FnOnce(&ManagedHeader) -> BaleResult<GrowthPlan>,
    ) -> BaleResult<Growth> {
        let (at, header) = self.resident_at(id)?;
        if header.flags.contains(RecordFlags::IMMUTABLE) {
            return Err(BaleError::illegal_state(format!("agent {id} is immutable")));
        }
        let plan = plan(&header)?;
        let total = header.total_length as usize;

        let (growth, at) = if plan.is_in_place() {
            plan.finish(self.arena.region_mut(at, total)?)?;
            (Growth::InPlace, at)
        } else {
            let shared = self.arena.occupants(at.buffer)? > 1;
            match policy {
                ExpansionPolicy::Expulse | ExpansionPolicy::Multiple if shared => {
                    (Growth::Expelled, self.expel(at, total, &plan)?)
                }
                _ => {
                    self.splice(id.slot(), at, total, &plan)?;
                    (Growth::Spliced, at)
                }
            }
        };

        let new_total = (total as isize + plan.delta()) as usize;
        let header = ManagedHeader::from_bytes(self.arena.region(at, new_total)?)?;
        let entry = self.entry_mut(id)?;
        entry.at = Some(at);
        entry.header = header;
        entry.link.synced = false;
        trace!(agent = %id, ?growth, data = header.data_length, slack = header.buffer_length, "agent resized");
        Ok(growth)
    }

    /// Copies the record into a private buffer, applies the plan there and
    /// leaves the old buffer to its array-mates.
    fn expel(&mut self, at: BufferHandle, total: usize, plan: &GrowthPlan) -> BaleResult<BufferHandle> {
        let mut bytes = self.arena.region(at, total)?.to_vec();
        plan.apply(&mut bytes)?;
        let buffer = self.arena.insert(bytes);
        self.arena.retain(buffer)?;
        self.arena.release(at.buffer)?;
        debug!(from = %at.buffer, to = %buffer, "agent expelled into private buffer");
        Ok(BufferHandle::new(buffer, 0))
    }

    /// Resizes the backing buffer in place and shifts every other agent
    /// living after the splice point.
    fn splice(&mut self, slot: usize, at: BufferHandle, total: usize, plan: &GrowthPlan) -> BaleResult<()> {
        let splice_at = at.offset + plan.insert_at;
        self.arena
            .splice(at.buffer, splice_at, plan.remove, plan.insert)?;

        let delta = plan.delta();
        let mut shifted = 0usize;
        for (other, entry) in self.registry.iter_mut() {
            let Some(handle) = entry.at.as_mut() else {
                continue;
            };
            if other != slot && handle.buffer == at.buffer && handle.offset >= splice_at {
                handle.offset = (handle.offset as isize + delta) as usize;
                shifted += 1;
            }
        }
        if shifted > 0 {
            debug!(buffer = %at.buffer, delta, shifted, "array-mates shifted");
        }

        let new_total = (total as isize + delta) as usize;
        plan.finish(self.arena.region_mut(at, new_total)?)
    }
}

//! Authority-side input routing for remote participants.
//!
//! Network handlers call [`InputRouter::receive`]; the tick calls
//! [`InputRouter::resolve`] and, once it has acted on the result,
//! [`InputRouter::consume`]. Held fields come from the newest message.
//! Edge fields (jump, reload, melee) are OR-ed into a pending accumulator so
//! an edge is neither lost when two messages land between ticks nor applied
//! twice.

use glam::Vec3;
use std::collections::HashMap;
use tracing::debug;

use super::{InputIntent, ParticipantId};

/// Edge-triggered fields accumulated between ticks
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PendingEdges {
    jump: bool,
    reload: bool,
    melee: bool,
    melee_origin: Option<Vec3>,
    melee_direction: Option<Vec3>,
}

#[derive(Debug, Default)]
struct InputSlot {
    latest: Option<InputIntent>,
    pending: PendingEdges,
    last_seq: Option<u32>,
}

#[derive(Debug, Default)]
pub struct InputRouter {
    slots: HashMap<ParticipantId, InputSlot>,
}

impl InputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an input slot for a participant
    pub fn register(&mut self, id: ParticipantId) {
        self.slots.entry(id).or_default();
    }

    pub fn remove(&mut self, id: &ParticipantId) {
        self.slots.remove(id);
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.slots.contains_key(id)
    }

    /// Buffer an input message. Returns false if it was dropped (unknown
    /// sender, or not newer than the last accepted message).
    pub fn receive(&mut self, from: &ParticipantId, intent: InputIntent) -> bool {
        let Some(slot) = self.slots.get_mut(from) else {
            debug!(participant = %from, "Input from unregistered participant");
            return false;
        };
        if slot.last_seq.is_some_and(|last| intent.seq <= last) {
            debug!(participant = %from, seq = intent.seq, "Dropping stale input");
            return false;
        }
        let intent = intent.sanitized();

        slot.last_seq = Some(intent.seq);
        slot.pending.jump |= intent.jump;
        slot.pending.reload |= intent.reload;
        if intent.melee && !slot.pending.melee {
            slot.pending.melee = true;
            slot.pending.melee_origin = intent.melee_origin;
            slot.pending.melee_direction = intent.melee_direction;
        }
        slot.latest = Some(intent);
        true
    }

    /// This tick's intent: held fields from the newest message, edges from
    /// the pending accumulator. Missing input resolves to "no intent".
    pub fn resolve(&self, id: &ParticipantId) -> InputIntent {
        let Some(slot) = self.slots.get(id) else {
            return InputIntent::default();
        };
        let mut intent = slot.latest.clone().unwrap_or_default();
        intent.jump = slot.pending.jump;
        intent.reload = slot.pending.reload;
        intent.melee = slot.pending.melee;
        intent.melee_origin = slot.pending.melee_origin;
        intent.melee_direction = slot.pending.melee_direction;
        intent
    }

    /// Clear the pending edges after the tick acted on them
    pub fn consume(&mut self, id: &ParticipantId) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.pending = PendingEdges::default();
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

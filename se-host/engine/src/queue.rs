// Licensed under the Apache-2.0 license

//! Execution queue and scheduler
//!
//! Every instance owns one registration slot for its lifetime. An invoke
//! moves the slot to `Requested` (or `Resume` for the next step of a strict
//! sequence), the scheduler moves exactly one slot to `Processing`, and
//! releasing the lock returns it to `Assigned`.
//!
//! Selection is a plain function over the slot table so the policy can be
//! tested without a timer, a transport or any instance behind it.

use arrayvec::ArrayVec;
use se_host_osal::Ticks;

use crate::config::MAX_REGISTRATIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unassigned,
    /// Owned by an instance with nothing queued
    Assigned,
    Requested,
    Processing,
    /// Strict-lock holder asking for its next step
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRequest {
    None,
    Lock,
    StrictLock,
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSlot {
    pub state: SlotState,
    pub request: LockRequest,
    pub arrival: Ticks,
    /// Owner already holds a session slot
    pub holds_session: bool,
}

impl QueueSlot {
    pub const fn unassigned() -> Self {
        Self {
            state: SlotState::Unassigned,
            request: LockRequest::None,
            arrival: Ticks::MAX,
            holds_session: false,
        }
    }

    /// Back to `Assigned` with no request
    pub fn reset(&mut self) {
        self.state = SlotState::Assigned;
        self.request = LockRequest::None;
        self.arrival = Ticks::MAX;
    }

    /// Queue a request; a strict-lock holder asking again resumes
    pub fn request(&mut self, request: LockRequest, now: Ticks) {
        let resume = self.request == LockRequest::StrictLock && request == LockRequest::StrictLock;
        if !resume {
            self.arrival = now;
        }
        self.state = if resume {
            SlotState::Resume
        } else {
            SlotState::Requested
        };
        self.request = request;
    }

    /// Holds the strict lock between steps of a sequence
    pub fn holds_strict_lock(&self) -> bool {
        self.request == LockRequest::StrictLock && self.state == SlotState::Processing
    }

    fn is_eligible(&self, session_available: bool) -> bool {
        match self.request {
            LockRequest::Lock | LockRequest::StrictLock => true,
            LockRequest::Session => self.holds_session || session_available,
            LockRequest::None => false,
        }
    }
}

pub type QueueTable = ArrayVec<QueueSlot, MAX_REGISTRATIONS>;

/// Slot chosen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub index: usize,
    pub arrival: Ticks,
    /// Assign a session before running the owner
    pub assign_session: bool,
    /// The watermark had to be reset to find this slot
    pub wrapped: bool,
}

/// Pick the next slot to run
///
/// Returns `None` while any slot is processing (including a strict-lock
/// holder between steps), when nothing is queued, or when no queued slot is
/// eligible. A `Resume` slot always wins. Otherwise the eligible
/// `Requested` slot with the earliest arrival at or after `watermark` wins,
/// lower index on ties. If queued slots exist only before the watermark
/// the clock has wrapped, and the scan is repeated once from zero.
pub fn select(slots: &[QueueSlot], watermark: Ticks, session_available: bool) -> Option<Dispatch> {
    if slots.iter().any(|s| s.state == SlotState::Processing) {
        return None;
    }

    if let Some((index, slot)) = slots
        .iter()
        .enumerate()
        .find(|(_, s)| s.state == SlotState::Resume && s.request == LockRequest::StrictLock)
    {
        return Some(Dispatch {
            index,
            arrival: slot.arrival,
            assign_session: false,
            wrapped: false,
        });
    }

    let (found, overflow) = scan(slots, watermark, session_available);
    if let Some(dispatch) = found {
        return Some(dispatch);
    }
    if overflow {
        let (found, _) = scan(slots, 0, session_available);
        return found.map(|d| Dispatch { wrapped: true, ..d });
    }
    None
}

fn scan(slots: &[QueueSlot], watermark: Ticks, session_available: bool) -> (Option<Dispatch>, bool) {
    let mut best: Option<Dispatch> = None;
    let mut overflow = false;

    for (index, slot) in slots.iter().enumerate() {
        if slot.state != SlotState::Requested {
            continue;
        }
        if slot.arrival < watermark {
            overflow = true;
            continue;
        }
        if !slot.is_eligible(session_available) {
            continue;
        }
        if best.map_or(true, |b| slot.arrival < b.arrival) {
            best = Some(Dispatch {
                index,
                arrival: slot.arrival,
                assign_session: slot.request == LockRequest::Session && !slot.holds_session,
                wrapped: false,
            });
        }
    }
    (best, overflow)
}

/// Anything waiting for the scheduler
pub fn has_pending(slots: &[QueueSlot]) -> bool {
    slots
        .iter()
        .any(|s| matches!(s.state, SlotState::Requested | SlotState::Resume))
}

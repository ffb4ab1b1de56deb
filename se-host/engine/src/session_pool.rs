// Licensed under the Apache-2.0 license

//! Device session slots
//!
//! A small fixed pool; each entry is free or owned by one instance. The
//! device addresses entry `n` as OID `0xE100 | n`.

use arrayvec::ArrayVec;
use se_host_command_types::{session_oid, Oid};

use crate::config::MAX_SESSIONS;
use crate::InstanceId;

#[derive(Debug, Clone)]
pub struct SessionPool {
    slots: ArrayVec<Option<InstanceId>, MAX_SESSIONS>,
}

impl SessionPool {
    /// Pool of `size` sessions, capped at [`MAX_SESSIONS`]
    pub fn new(size: usize) -> Self {
        let mut slots = ArrayVec::new();
        for _ in 0..size.min(MAX_SESSIONS) {
            slots.push(None);
        }
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_available(&self) -> bool {
        self.slots.iter().any(Option::is_none)
    }

    /// First free session, now owned by `owner`
    pub fn acquire(&mut self, owner: InstanceId) -> Option<usize> {
        let index = self.slots.iter().position(Option::is_none)?;
        self.slots[index] = Some(owner);
        Some(index)
    }

    pub fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }

    pub fn owner(&self, index: usize) -> Option<InstanceId> {
        self.slots.get(index).copied().flatten()
    }

    pub fn oid(index: usize) -> Oid {
        session_oid(index)
    }
}

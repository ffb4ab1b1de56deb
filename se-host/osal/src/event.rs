// Licensed under the Apache-2.0 license

//! One-shot event timer
//!
//! A device context owns exactly one event. Registering a new callback
//! target replaces whatever was pending, so the scheduler and the command
//! state machines take turns on the same timer.

use crate::time::{is_due, Duration, Ticks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending<T> {
    target: T,
    deadline: Ticks,
}

#[derive(Debug, Clone)]
pub struct OsEvent<T> {
    pending: Option<Pending<T>>,
}

impl<T: Copy> OsEvent<T> {
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Arm the event to fire `target` after `delay`, replacing any pending target
    pub fn register_oneshot(&mut self, target: T, now: Ticks, delay: Duration) {
        self.pending = Some(Pending {
            target,
            deadline: now.wrapping_add(delay.as_ticks()),
        });
    }

    pub fn target(&self) -> Option<T> {
        self.pending.map(|p| p.target)
    }

    pub fn deadline(&self) -> Option<Ticks> {
        self.pending.map(|p| p.deadline)
    }

    /// Consume the pending target if its deadline has passed
    pub fn take_due(&mut self, now: Ticks) -> Option<T> {
        match self.pending {
            Some(p) if is_due(now, p.deadline) => {
                self.pending = None;
                Some(p.target)
            }
            _ => None,
        }
    }

    /// Consume the pending target regardless of its deadline
    pub fn take(&mut self) -> Option<T> {
        self.pending.take().map(|p| p.target)
    }
}

impl<T: Copy> Default for OsEvent<T> {
    fn default() -> Self {
        Self::new()
    }
}

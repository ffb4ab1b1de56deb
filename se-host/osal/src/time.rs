// Licensed under the Apache-2.0 license

//! Time abstraction
//!
//! The engine timestamps queue requests with a 32-bit microsecond tick that
//! wraps roughly every 71 minutes. All comparisons on [`Ticks`] must tolerate
//! that wraparound.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time as std_time;

/// Wrapping microsecond timestamp
pub type Ticks = u32;

/// Duration type used for engine timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Duration {
    micros: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration { micros: 0 };

    pub const fn from_secs(secs: u64) -> Self {
        Self {
            micros: secs * 1_000_000,
        }
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self {
            micros: millis * 1000,
        }
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    pub const fn as_millis(&self) -> u64 {
        self.micros / 1000
    }

    pub const fn as_micros(&self) -> u64 {
        self.micros
    }

    /// Duration as a tick delta, saturating at the tick range
    pub fn as_ticks(&self) -> Ticks {
        u32::try_from(self.micros).unwrap_or(u32::MAX)
    }
}

impl From<std_time::Duration> for Duration {
    fn from(std_dur: std_time::Duration) -> Self {
        Self::from_micros(u64::try_from(std_dur.as_micros()).unwrap_or(u64::MAX))
    }
}

impl From<Duration> for std_time::Duration {
    fn from(dur: Duration) -> Self {
        std_time::Duration::from_micros(dur.as_micros())
    }
}

/// Monotonic tick source
pub trait Clock: Send {
    /// Current time in wrapping microseconds
    fn now(&self) -> Ticks;
}

/// Clock backed by [`std::time::Instant`]
#[derive(Debug)]
pub struct SystemClock {
    origin: std_time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: std_time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Ticks {
        // Truncation is the wraparound.
        self.origin.elapsed().as_micros() as Ticks
    }
}

/// Clock advanced explicitly by the caller
///
/// Clones share the same counter, so a test can keep one handle while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ticks: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start: Ticks) -> Self {
        Self {
            ticks: Arc::new(AtomicU32::new(start)),
        }
    }

    pub fn advance(&self, delta: Duration) {
        let delta = delta.as_ticks();
        // fetch_update never fails with a closure that always returns Some.
        let _ = self
            .ticks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.wrapping_add(delta))
            });
    }

    pub fn set(&self, ticks: Ticks) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Ticks {
        self.ticks.load(Ordering::SeqCst)
    }
}

/// True when `deadline` is at or before `now`, allowing for wraparound
pub fn is_due(now: Ticks, deadline: Ticks) -> bool {
    now.wrapping_sub(deadline) < (1 << 31)
}

/// Sleep the current thread
pub fn sleep(duration: Duration) {
    std::thread::sleep(duration.into());
}

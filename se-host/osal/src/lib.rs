// Licensed under the Apache-2.0 license

//! OS Abstraction Layer (OSAL) for the secure-element host library
//!
//! The engine never talks to the operating system directly. Everything it
//! needs from the platform goes through this crate:
//!
//! - a wrapping microsecond tick source ([`Clock`]), with a real
//!   [`SystemClock`] and a test-driven [`ManualClock`]
//! - a single one-shot event timer ([`OsEvent`]) used to re-enter the
//!   scheduler and the command state machines
//! - a poisoning-aware [`Mutex`] wrapper
//! - the persistence collaborator ([`Datastore`]) with in-memory and
//!   file-backed stores

pub mod datastore;
pub mod error;
pub mod event;
pub mod sync;
pub mod time;

pub use datastore::{Datastore, FileDatastore, MemoryDatastore, SlotId};
pub use error::{IoErrorKind, OsalError, OsalResult};
pub use event::OsEvent;
pub use sync::{Mutex, MutexGuard};
pub use time::{Clock, Duration, ManualClock, SystemClock, Ticks};

/// Get OSAL version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// Licensed under the Apache-2.0 license

//! Command execution engine for the secure-element host library
//!
//! ```text
//!   callers --create/invoke--> +-----------+   select    +------------+
//!                              |   queue   | ----------> | instance   |
//!                              | (slots)   |             | state      |
//!                              +-----------+             | machine    |
//!                                    ^                   +------------+
//!                   release lock     |                        |
//!                   or session       |      APDU              v
//!                              +-----------+   <------   +------------+
//!                              |  session  |             |  secure    | <--> transport
//!                              |   pool    |             |  channel   |
//!                              +-----------+             +------------+
//! ```
//!
//! Many callers share one device through the [`Engine`]. Each caller owns an
//! instance; the scheduler hands the single transport to one instance at a
//! time in arrival order, lets a strict-lock holder finish its multi-step
//! sequence first, and assigns session slots to operations that keep
//! secrets on the device.

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod instance;
pub mod ops;
pub mod queue;
pub mod session_pool;
pub mod shared;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use device::DeviceContext;
pub use engine::{Engine, EngineStatistics, EventTarget};
pub use error::*;
pub use instance::{Callback, InstanceId, InstanceState};
pub use queue::{LockRequest, QueueSlot, SlotState};
pub use session_pool::SessionPool;
pub use shared::SharedEngine;

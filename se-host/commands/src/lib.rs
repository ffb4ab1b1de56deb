// Licensed under the Apache-2.0 license

//! Secure-Element Commands Layer
//!
//! Checked APDU framing ([`packing`]) and one [`api::CommandHandler`] per
//! operation family. A handler only knows how to build its request into the
//! shared buffer and how to interpret the response; locking, sessions,
//! chaining rounds and device-error diagnosis are driven by the engine.

#![no_std]

extern crate alloc;

// Re-export command types for convenience
pub use se_host_command_types::*;

pub mod api;
pub mod packing;

pub use api::*;
pub use packing::*;

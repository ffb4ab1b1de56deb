// Licensed under the Apache-2.0 license

//! Simulated secure element
//!
//! A software device speaking the host channel and the APDU command set:
//! data objects, random, hashing, ECC P-384, key derivation, symmetric
//! operations, protected update and application context hibernation. Faults
//! (corrupted, dropped or failed responses) can be scripted for tests.
//!
//! The device is reachable in process through [`SimTransport`] or over UDP
//! through [`DeviceServer`].

pub mod device;
pub mod faults;
pub mod keys;
pub mod objects;
pub mod processor;
pub mod scp;
pub mod server;
pub mod transport;

pub use device::{DeviceStatistics, SimDevice};
pub use faults::FaultPlan;
pub use keys::{OID_DEVICE_KEY, OID_SYM_KEY};
pub use objects::{DEFAULT_AUTH_SECRET, OID_AUTH_SECRET, OID_PROTECTED_DATA};
pub use processor::ApduProcessor;
pub use scp::{ScpServer, ScpStatistics};
pub use server::{DeviceServer, ServerConfig};
pub use transport::SimTransport;

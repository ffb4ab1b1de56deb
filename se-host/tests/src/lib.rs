// Licensed under the Apache-2.0 license

//! Integration tests for se-host
//!
//! Every test drives a real engine against the simulated secure element
//! through the in-process transport, with a manual clock so scheduling is
//! deterministic.

// Shared test bed
pub mod common;

#[cfg(test)]
pub mod test_scheduling;

#[cfg(test)]
pub mod test_sessions;

#[cfg(test)]
pub mod test_secure_channel;

#[cfg(test)]
pub mod test_hibernation;

#[cfg(test)]
pub mod test_device_errors;

#[cfg(test)]
pub mod test_operations;

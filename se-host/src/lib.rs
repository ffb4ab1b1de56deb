// Licensed under the Apache-2.0 license

//! Secure-Element Host Library
//!
//! Lets many callers in one host process share a single secure element.
//! Commands are queued per caller, serialized onto the one transport, and
//! optionally carried over an authenticated, replay-protected channel.
//!
//! - **command-types**: opcodes, object identifiers, device error codes
//! - **commands**: APDU framing, one handler per operation family
//! - **channel**: secure channel handshake, records, alerts, hibernation
//! - **engine**: instance queue, scheduler, locks and session slots
//! - **transport**: the byte-pipe collaborator trait
//! - **osal**: clock, one-shot event, mutex and persistence store
//!
//! ## Architecture Overview
//!
//! ```text
//!     ┌─────────────────┐    ┌─────────────────┐
//!     │ se-host-        │    │ se-host-        │
//!     │ commands        │    │ command-types   │
//!     │ (Framing)       │    │ (Type Defs)     │
//!     └─────────────────┘    └─────────────────┘
//!              │                       │
//!              └───────────────────────┘
//!                          │
//!             ┌──────────────────┐
//!             │ se-host-engine   │
//!             │ (Scheduler/Locks)│
//!             └──────────────────┘
//!                      │
//!             ┌──────────────────┐
//!             │ se-host-channel  │
//!             │ (Secure Channel) │
//!             └──────────────────┘
//!                      │
//!             ┌──────────────────┐         ┌─────────────────┐
//!             │ se-host-         │◄────────│ Transport impl  │
//!             │ transport        │         │ (UDP, I2C, ...) │
//!             └──────────────────┘         └─────────────────┘
//!                      │
//!             ┌──────────────────┐
//!             │ se-host-osal     │
//!             │ (OS Abstraction) │
//!             └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use se_host::{Engine, EngineConfig, RandomType};
//! use se_host::osal::{FileDatastore, SystemClock};
//!
//! let mut engine = Engine::new(
//!     EngineConfig::default(),
//!     Box::new(my_transport),
//!     Box::new(FileDatastore::new("/var/lib/se-host")?),
//!     Box::new(SystemClock::new()),
//! )?;
//! let id = engine.create(Box::new(|result| println!("{:?}", result)))?;
//! engine.get_random(id, RandomType::Trng, 32)?;
//! engine.run_until_idle();
//! ```

pub use se_host_channel as channel;
pub use se_host_command_types as command_types;
pub use se_host_commands as commands;
pub use se_host_engine as engine;
pub use se_host_osal as osal;
pub use se_host_transport as transport;

// Re-export main public APIs for convenience
pub use se_host_channel::{ChannelConfig, ChannelStatistics, Protection, ProtectionLevel};
pub use se_host_command_types::{
    ApduCommand, CloseMode, HashAlgorithm, KeyDerivation, KeyType, KeyUsage, Oid, OpenMode,
    RandomType, SignatureScheme, SymKeyType, SymMode, WriteMode,
};
pub use se_host_commands::{
    AsymMessage, CalcHash, CommandOutput, DeriveKey, KeyRef, KeyTarget, PublicKeySource,
    SecretTarget, SequenceStep, SetObjectProtected, SymCipher,
};
pub use se_host_engine::{
    Callback, Engine, EngineConfig, EngineStatistics, InstanceId, InstanceState, SharedEngine,
};
pub use se_host_transport::Transport;

// Re-export error types
pub use se_host_channel::ChannelError;
pub use se_host_command_types::DeviceError;
pub use se_host_engine::{EngineError, EngineResult};
pub use se_host_transport::TransportError;

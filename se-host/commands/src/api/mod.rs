// Licensed under the Apache-2.0 license

//! Per-operation command handlers
//!
//! Each operation family implements [`CommandHandler`]. The engine owns the
//! handler for the duration of one `invoke`, calls [`CommandHandler::prepare`]
//! to frame a request into the shared buffer, and feeds the unwrapped
//! response to [`CommandHandler::process`], which decides whether the call is
//! complete, needs another round, or keeps a strict lock for the next step.

use alloc::vec::Vec;
use se_host_command_types::{
    ApduCommand, CommandError, CommandResult, ContextHandle, DeviceError, Oid,
};

use crate::packing::ApduResponse;

pub mod application;
pub mod asym;
pub mod data_object;
pub mod hash;
pub mod key_agreement;
pub mod keygen;
pub mod protected_update;
pub mod random;
pub mod sign;
pub mod sym;

pub use application::*;
pub use asym::*;
pub use data_object::*;
pub use hash::*;
pub use key_agreement::*;
pub use keygen::*;
pub use protected_update::*;
pub use random::*;
pub use sign::*;
pub use sym::*;

/// Queue request a handler needs before it may run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Lock,
    /// Lock plus a session slot, assigned at dispatch if not already held
    Session,
    /// Lock held across several invokes of one sequence
    StrictLock,
}

/// Where a response leaves the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Complete; release the lock
    Done,
    /// Another round trip is needed for the same invoke
    Chain,
    /// Complete for this invoke, but keep the strict lock for the next step
    Hold,
    /// Complete; return the session to the pool, then release the lock
    ReleaseSession,
}

/// Position of a strict-lock step within its sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStep {
    Start,
    StartFinal,
    Continue,
    Final,
}

impl SequenceStep {
    pub fn is_start(&self) -> bool {
        matches!(self, SequenceStep::Start | SequenceStep::StartFinal)
    }
}

/// Identity of a strict-lock sequence
///
/// Continue and final steps must match the family that started the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrictSequence {
    pub command: ApduCommand,
    pub mode: u8,
    pub step: SequenceStep,
}

/// Open/close steps that drive the secure channel around the APDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationStep {
    Open { restore: bool },
    Close { hibernate: bool },
}

/// Instance state the engine exposes to a handler
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecContext {
    /// Session slot held by the instance
    pub session_oid: Option<Oid>,
    /// Largest APDU that fits the shared buffer
    pub max_apdu: usize,
    /// Stored application context handle, for restore
    pub context_handle: Option<ContextHandle>,
}

impl ExecContext {
    pub fn session(&self) -> CommandResult<Oid> {
        self.session_oid.ok_or(CommandError::SessionRequired)
    }
}

/// Result delivered to the caller when an invoke completes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CommandOutput {
    #[default]
    Empty,
    Data(Vec<u8>),
    KeyPair {
        public_key: Vec<u8>,
        private_key: Option<Vec<u8>>,
    },
}

impl CommandOutput {
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            CommandOutput::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            CommandOutput::Data(data) => Some(data),
            _ => None,
        }
    }
}

/// Key addressed by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRef {
    Oid(Oid),
    /// Key material held in the instance's session slot
    Session,
}

impl KeyRef {
    pub fn resolve(&self, ctx: &ExecContext) -> CommandResult<Oid> {
        match self {
            KeyRef::Oid(oid) => Ok(*oid),
            KeyRef::Session => ctx.session(),
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, KeyRef::Session)
    }
}

/// Destination of a generated or derived secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretTarget {
    /// Return the secret to the host
    Export,
    /// Keep the secret in the instance's session slot
    Session,
}

pub trait CommandHandler: Send {
    fn command(&self) -> ApduCommand;

    fn lock_kind(&self) -> LockKind {
        LockKind::Lock
    }

    /// Operation reads a session-held key, so the instance must already own a session
    fn requires_session(&self) -> bool {
        false
    }

    fn strict_sequence(&self) -> Option<StrictSequence> {
        None
    }

    fn application_step(&self) -> Option<ApplicationStep> {
        None
    }

    /// Step ends a strict sequence without contacting the device
    fn release_only(&self) -> bool {
        false
    }

    /// Frame the next request into `buf`, returning its length
    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize>;

    /// Interpret a successful response
    fn process(&mut self, ctx: &ExecContext, response: &ApduResponse<'_>)
        -> CommandResult<Progress>;

    /// Turn a diagnosed device failure into a successful completion
    fn recover(&mut self, _error: DeviceError) -> Option<CommandOutput> {
        None
    }

    /// Return the session to the pool when the device reports a failure
    fn release_session_on_failure(&self) -> bool {
        false
    }

    fn take_output(&mut self) -> CommandOutput {
        CommandOutput::Empty
    }
}

/// Largest chunk that leaves room for `overhead` bytes of framing
pub(crate) fn chunk_capacity(ctx: &ExecContext, overhead: usize) -> CommandResult<usize> {
    ctx.max_apdu
        .checked_sub(se_host_command_types::APDU_HEADER_SIZE + overhead)
        .filter(|n| *n > 0)
        .ok_or(CommandError::BufferTooSmall)
}

/// Apply the protocol-level buffer limit on top of the caller's buffer
pub(crate) fn apdu_buf<'b>(ctx: &ExecContext, buf: &'b mut [u8]) -> &'b mut [u8] {
    let limit = ctx.max_apdu.min(buf.len());
    &mut buf[..limit]
}

// Licensed under the Apache-2.0 license

//! Command instances
//!
//! ```text
//!  Idle --invoke--> RequestLock | RequestSession | RequestStrictLock
//!                                   | dispatched by the scheduler
//!                                   v
//!              +---------------> PrepareCommand
//!              | chain               |
//!              |                     v
//!              |                 Transceive ----- comms error -----+
//!              |                     |                             |
//!              |                     v                             v
//!              +---------------- ProcessResponse --failure--> GetDeviceError
//!                                    |                             |
//!                                    v                             v
//!                              ReleaseSession ---> ReleaseLock ---> Exit --> Idle
//! ```

use std::fmt;

use se_host_channel::ProtectionLevel;
use se_host_commands::{CommandHandler, CommandOutput, StrictSequence};
use se_host_command_types::ContextHandle;

use crate::EngineResult;

/// Handle returned by [`crate::Engine::create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub(crate) usize);

impl InstanceId {
    /// Registration slot owned by the instance
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion callback, called exactly once per accepted invoke
///
/// The callback runs on the thread driving the engine, with the engine
/// borrowed. It must not call back into the engine.
pub type Callback = Box<dyn FnMut(EngineResult<CommandOutput>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Idle,
    RequestLock,
    RequestSession,
    RequestStrictLock,
    PrepareCommand,
    Transceive,
    ProcessResponse,
    GetDeviceError,
    ReleaseSession,
    ReleaseLock,
    Exit,
}

impl InstanceState {
    /// Waiting in the queue for the scheduler
    pub fn is_queued(&self) -> bool {
        matches!(
            self,
            InstanceState::RequestLock
                | InstanceState::RequestSession
                | InstanceState::RequestStrictLock
        )
    }
}

pub(crate) struct Instance {
    pub callback: Callback,
    pub state: InstanceState,
    pub handler: Option<Box<dyn CommandHandler>>,
    /// Index into the session pool
    pub session: Option<usize>,
    /// Sequence whose strict lock the instance holds or is acquiring
    pub strict: Option<StrictSequence>,
    pub protection: ProtectionLevel,
    pub protocol_version: u8,
    pub result: Option<EngineResult<CommandOutput>>,
    /// Handle loaded for an open-with-restore
    pub context_handle: Option<ContextHandle>,
    pub tx_len: usize,
    pub rx_len: usize,
}

impl Instance {
    pub fn new(callback: Callback, protocol_version: u8) -> Self {
        Self {
            callback,
            state: InstanceState::Idle,
            handler: None,
            session: None,
            strict: None,
            protection: ProtectionLevel::NONE,
            protocol_version,
            result: None,
            context_handle: None,
            tx_len: 0,
            rx_len: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == InstanceState::Idle
    }

    /// Record a failure; the first recorded result wins
    pub fn fail(&mut self, err: crate::EngineError) {
        if self.result.is_none() {
            self.result = Some(Err(err));
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("state", &self.state)
            .field("command", &self.handler.as_ref().map(|h| h.command()))
            .field("session", &self.session)
            .field("strict", &self.strict)
            .field("protection", &self.protection)
            .finish()
    }
}

// Licensed under the Apache-2.0 license

//! Open and close the on-device application

use se_host_command_types::{
    ApduCommand, CloseMode, CommandError, CommandResult, ContextHandle, OpenMode, APPLICATION_ID,
    CONTEXT_HANDLE_SIZE,
};

use super::{apdu_buf, ApplicationStep, CommandHandler, CommandOutput, ExecContext, Progress};
use crate::packing::{ApduResponse, ApduWriter};

#[derive(Debug, Clone)]
pub struct OpenApplication {
    mode: OpenMode,
}

impl OpenApplication {
    pub fn new(mode: OpenMode) -> Self {
        Self { mode }
    }
}

impl CommandHandler for OpenApplication {
    fn command(&self) -> ApduCommand {
        ApduCommand::OpenApplication
    }

    fn application_step(&self) -> Option<ApplicationStep> {
        Some(ApplicationStep::Open {
            restore: self.mode == OpenMode::Restore,
        })
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_bytes(&APPLICATION_ID)?;
        if self.mode == OpenMode::Restore {
            let handle = ctx.context_handle.ok_or(CommandError::InvalidRequest)?;
            w.put_bytes(&handle)?;
        }
        w.finish(self.command().code(), self.mode as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, _response: &ApduResponse<'_>) -> CommandResult<Progress> {
        Ok(Progress::Done)
    }
}

#[derive(Debug, Clone)]
pub struct CloseApplication {
    mode: CloseMode,
    handle: Option<ContextHandle>,
}

impl CloseApplication {
    pub fn new(mode: CloseMode) -> Self {
        Self { mode, handle: None }
    }
}

impl CommandHandler for CloseApplication {
    fn command(&self) -> ApduCommand {
        ApduCommand::CloseApplication
    }

    fn application_step(&self) -> Option<ApplicationStep> {
        Some(ApplicationStep::Close {
            hibernate: self.mode == CloseMode::Hibernate,
        })
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        let w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.finish(self.command().code(), self.mode as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        if self.mode == CloseMode::Hibernate {
            let handle: ContextHandle = response
                .payload
                .try_into()
                .map_err(|_| CommandError::InvalidResponseLength)?;
            if handle == [0u8; CONTEXT_HANDLE_SIZE] {
                return Err(CommandError::InvalidResponse);
            }
            self.handle = Some(handle);
        }
        Ok(Progress::Done)
    }

    /// The hibernate handle, for the engine to persist
    fn take_output(&mut self) -> CommandOutput {
        match self.handle.take() {
            Some(handle) => CommandOutput::Data(handle.to_vec()),
            None => CommandOutput::Empty,
        }
    }
}

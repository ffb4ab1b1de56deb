// Licensed under the Apache-2.0 license

//! Random generation, including session-stored variants

use alloc::vec::Vec;
use se_host_command_types::{
    ApduCommand, CommandError, CommandResult, RandomType, MAX_RANDOM_LENGTH, MIN_RANDOM_LENGTH,
    RANDOM_TAG_OPTIONAL_DATA,
};

use super::{apdu_buf, CommandHandler, CommandOutput, ExecContext, LockKind, Progress};
use crate::packing::{ApduResponse, ApduWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    /// Random bytes returned to the host
    Plain,
    /// Pre-master secret kept in the session
    PreMaster,
    /// Authorization code kept in the session and returned to the host
    AuthCode,
}

#[derive(Debug, Clone)]
pub struct GetRandom {
    kind: RandomType,
    length: u16,
    optional_data: Vec<u8>,
    flavor: Flavor,
    data: Vec<u8>,
}

impl GetRandom {
    pub fn new(kind: RandomType, length: u16) -> Self {
        Self {
            kind,
            length,
            optional_data: Vec::new(),
            flavor: Flavor::Plain,
            data: Vec::new(),
        }
    }

    /// TLS pre-master secret of `length` bytes, prefixed on the device by `optional_data`
    pub fn pre_master_secret(optional_data: Vec<u8>, length: u16) -> Self {
        Self {
            kind: RandomType::PreMasterSecret,
            length,
            optional_data,
            flavor: Flavor::PreMaster,
            data: Vec::new(),
        }
    }

    /// Random authorization code, kept in the session for a later HMAC verify
    pub fn auth_code(kind: RandomType, optional_data: Vec<u8>, length: u16) -> Self {
        Self {
            kind,
            length,
            optional_data,
            flavor: Flavor::AuthCode,
            data: Vec::new(),
        }
    }

    fn stored_in_session(&self) -> bool {
        self.flavor != Flavor::Plain
    }
}

impl CommandHandler for GetRandom {
    fn command(&self) -> ApduCommand {
        ApduCommand::GetRandom
    }

    fn lock_kind(&self) -> LockKind {
        if self.stored_in_session() {
            LockKind::Session
        } else {
            LockKind::Lock
        }
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        if !(MIN_RANDOM_LENGTH..=MAX_RANDOM_LENGTH).contains(&self.length) {
            return Err(CommandError::InvalidRequest);
        }
        if self.flavor == Flavor::PreMaster && self.optional_data.len() >= self.length as usize {
            return Err(CommandError::InvalidRequest);
        }
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_u16(self.length)?;
        if self.stored_in_session() {
            w.put_u16(ctx.session()?)?;
            if !self.optional_data.is_empty() {
                w.put_tlv(RANDOM_TAG_OPTIONAL_DATA, &self.optional_data)?;
            }
        }
        w.finish(self.command().code(), self.kind as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        if self.flavor != Flavor::PreMaster {
            if response.payload.len() != self.length as usize {
                return Err(CommandError::InvalidResponseLength);
            }
            self.data = response.payload.to_vec();
        }
        Ok(Progress::Done)
    }

    fn take_output(&mut self) -> CommandOutput {
        match self.flavor {
            Flavor::PreMaster => CommandOutput::Empty,
            _ => CommandOutput::Data(core::mem::take(&mut self.data)),
        }
    }
}

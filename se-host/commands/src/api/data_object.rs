// Licensed under the Apache-2.0 license

//! Read and write data objects and their metadata
//!
//! Both directions chain: a read keeps requesting until the declared length
//! is collected or the device returns a short chunk, a write keeps sending
//! until all data has been written.

use alloc::vec::Vec;
use se_host_command_types::{
    ApduCommand, CommandError, CommandResult, DeviceError, Oid, ReadKind, WriteMode,
    WRITE_REQUEST_HEADER_SIZE,
};

use super::{apdu_buf, chunk_capacity, CommandHandler, CommandOutput, ExecContext, Progress};
use crate::packing::{ApduResponse, ApduWriter};

#[derive(Debug, Clone)]
pub struct ReadData {
    oid: Oid,
    kind: ReadKind,
    offset: u16,
    length: usize,
    requested: usize,
    data: Vec<u8>,
}

impl ReadData {
    pub fn new(oid: Oid, offset: u16, length: usize) -> Self {
        Self::with_kind(oid, ReadKind::Data, offset, length)
    }

    pub fn metadata(oid: Oid) -> Self {
        Self::with_kind(oid, ReadKind::Metadata, 0, u16::MAX as usize)
    }

    fn with_kind(oid: Oid, kind: ReadKind, offset: u16, length: usize) -> Self {
        Self {
            oid,
            kind,
            offset,
            length,
            requested: 0,
            data: Vec::new(),
        }
    }
}

impl CommandHandler for ReadData {
    fn command(&self) -> ApduCommand {
        ApduCommand::GetDataObject
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        if self.length == 0 {
            return Err(CommandError::InvalidRequest);
        }
        // The response header takes the place of the request header.
        let capacity = chunk_capacity(ctx, 0)?;
        let remaining = self.length - self.data.len();
        self.requested = remaining.min(capacity).min(u16::MAX as usize);
        let offset = (self.offset as usize + self.data.len())
            .try_into()
            .map_err(|_| CommandError::InvalidRequest)?;

        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_u16(self.oid)?;
        w.put_u16(offset)?;
        w.put_u16(self.requested as u16)?;
        w.finish(self.command().code(), self.kind as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        if response.payload.len() > self.requested {
            return Err(CommandError::InvalidResponseLength);
        }
        self.data.extend_from_slice(response.payload);
        let short = response.payload.len() < self.requested;
        if short || self.data.len() >= self.length || self.kind == ReadKind::Metadata {
            Ok(Progress::Done)
        } else {
            log::trace!("Read {} of {} bytes from {:#06x}", self.data.len(), self.length, self.oid);
            Ok(Progress::Chain)
        }
    }

    /// Reading past the end of an object after earlier rounds returned data
    /// yields what was collected
    fn recover(&mut self, error: DeviceError) -> Option<CommandOutput> {
        if error.code() == DeviceError::OUT_OF_BOUNDARY && !self.data.is_empty() {
            Some(self.take_output())
        } else {
            None
        }
    }

    fn take_output(&mut self) -> CommandOutput {
        CommandOutput::Data(core::mem::take(&mut self.data))
    }
}

#[derive(Debug, Clone)]
pub struct WriteData {
    oid: Oid,
    mode: WriteMode,
    offset: u16,
    data: Vec<u8>,
    written: usize,
    in_flight: usize,
}

impl WriteData {
    pub fn new(oid: Oid, mode: WriteMode, offset: u16, data: Vec<u8>) -> Self {
        Self {
            oid,
            mode,
            offset,
            data,
            written: 0,
            in_flight: 0,
        }
    }

    pub fn metadata(oid: Oid, metadata: Vec<u8>) -> Self {
        Self::new(oid, WriteMode::Metadata, 0, metadata)
    }

    /// Erase-and-write only applies to the first round
    fn param(&self) -> u8 {
        match self.mode {
            WriteMode::EraseAndWrite if self.written > 0 => WriteMode::Write as u8,
            mode => mode as u8,
        }
    }
}

impl CommandHandler for WriteData {
    fn command(&self) -> ApduCommand {
        ApduCommand::SetDataObject
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        if self.data.is_empty() {
            return Err(CommandError::InvalidRequest);
        }
        let capacity = chunk_capacity(ctx, WRITE_REQUEST_HEADER_SIZE)?;
        let remaining = self.data.len() - self.written;
        if self.mode == WriteMode::Metadata && remaining > capacity {
            return Err(CommandError::BufferTooSmall);
        }
        self.in_flight = remaining.min(capacity);
        let offset = (self.offset as usize + self.written)
            .try_into()
            .map_err(|_| CommandError::InvalidRequest)?;

        let param = self.param();
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_u16(self.oid)?;
        w.put_u16(offset)?;
        w.put_bytes(&self.data[self.written..self.written + self.in_flight])?;
        w.finish(self.command().code(), param)
    }

    fn process(&mut self, _ctx: &ExecContext, _response: &ApduResponse<'_>) -> CommandResult<Progress> {
        self.written += self.in_flight;
        self.in_flight = 0;
        if self.written < self.data.len() {
            Ok(Progress::Chain)
        } else {
            Ok(Progress::Done)
        }
    }
}

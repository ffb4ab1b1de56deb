// Licensed under the Apache-2.0 license

//! Symmetric encryption, decryption and HMAC
//!
//! Every symmetric operation runs under the strict lock. A caller streams a
//! long input as start / continue / final invokes; within one invoke the data
//! is further split into APDU-sized packets, each a multiple of the mode's
//! block size. Start-final and final end the sequence and release the lock,
//! start and continue complete with the lock still held.
//!
//! HMAC verification and clearing the authorization state work on the
//! instance's session and hand it back to the pool when they complete.

use alloc::vec::Vec;
use se_host_command_types::{
    ApduCommand, CommandError, CommandResult, Oid, OperationMode, SymMode, SymSequence,
    SYM_MAX_INDATA_LENGTH, SYM_TAG_ASSOCIATED_DATA, SYM_TAG_IV, SYM_TAG_OUT_DATA,
    SYM_TAG_TOTAL_LENGTH, SYM_TAG_VERIFICATION_DATA, TLV_HEADER_SIZE,
};

use super::{
    apdu_buf, chunk_capacity, CommandHandler, CommandOutput, ExecContext, KeyRef, LockKind,
    Progress, SequenceStep, StrictSequence,
};
use crate::packing::{ApduResponse, ApduWriter};

const KEY_OID_SIZE: usize = 2;
const SESSION_OID_SIZE: usize = 2;

fn optional_tlv_size(value: &[u8]) -> usize {
    if value.is_empty() {
        0
    } else {
        TLV_HEADER_SIZE + value.len()
    }
}

#[derive(Debug, Clone)]
pub struct SymCipher {
    command: ApduCommand,
    operation: OperationMode,
    mode: SymMode,
    step: SequenceStep,
    key: KeyRef,
    data: Vec<u8>,
    iv: Vec<u8>,
    associated_data: Vec<u8>,
    total_length: Option<u16>,
    verification: Vec<u8>,
    sent: usize,
    in_flight: usize,
    round: SymSequence,
    out: Vec<u8>,
}

impl SymCipher {
    fn new(
        command: ApduCommand,
        operation: OperationMode,
        mode: SymMode,
        step: SequenceStep,
        key: KeyRef,
        data: Vec<u8>,
    ) -> Self {
        Self {
            command,
            operation,
            mode,
            step,
            key,
            data,
            iv: Vec::new(),
            associated_data: Vec::new(),
            total_length: None,
            verification: Vec::new(),
            sent: 0,
            in_flight: 0,
            round: SymSequence::Start,
            out: Vec::new(),
        }
    }

    pub fn encrypt(mode: SymMode, step: SequenceStep, key: Oid, data: Vec<u8>) -> Self {
        Self::new(
            ApduCommand::EncryptSym,
            OperationMode::Encrypt,
            mode,
            step,
            KeyRef::Oid(key),
            data,
        )
    }

    pub fn decrypt(mode: SymMode, step: SequenceStep, key: Oid, data: Vec<u8>) -> Self {
        Self::new(
            ApduCommand::DecryptSym,
            OperationMode::Decrypt,
            mode,
            step,
            KeyRef::Oid(key),
            data,
        )
    }

    /// HMAC over `data`; a session-based key uses the secret held in the session
    pub fn hmac(mode: SymMode, step: SequenceStep, key: KeyRef, data: Vec<u8>) -> Self {
        Self::new(
            ApduCommand::EncryptSym,
            OperationMode::Hmac,
            mode,
            step,
            key,
            data,
        )
    }

    /// Check `expected` against the HMAC of `data` keyed by `secret` and the
    /// authorization code held in the session
    pub fn hmac_verify(mode: SymMode, secret: Oid, data: Vec<u8>, expected: Vec<u8>) -> Self {
        let mut cipher = Self::new(
            ApduCommand::DecryptSym,
            OperationMode::Hmac,
            mode,
            SequenceStep::StartFinal,
            KeyRef::Oid(secret),
            data,
        );
        cipher.verification = expected;
        cipher
    }

    /// Drop the authorization state `secret` gained from a successful verify
    pub fn clear_auto_state(secret: Oid) -> Self {
        Self::new(
            ApduCommand::DecryptSym,
            OperationMode::ClearAutoState,
            SymMode::HmacSha256,
            SequenceStep::StartFinal,
            KeyRef::Oid(secret),
            Vec::new(),
        )
    }

    pub fn with_iv(mut self, iv: Vec<u8>) -> Self {
        self.iv = iv;
        self
    }

    pub fn with_associated_data(mut self, associated_data: Vec<u8>) -> Self {
        self.associated_data = associated_data;
        self
    }

    /// Total input length across the whole sequence, for modes that need it up front
    pub fn with_total_length(mut self, total_length: u16) -> Self {
        self.total_length = Some(total_length);
        self
    }

    /// HMAC verify and clear-auto-state carry the session after the length field
    fn uses_session_slot(&self) -> bool {
        self.command == ApduCommand::DecryptSym && self.mode.is_hmac()
    }

    fn key_oid(&self, ctx: &ExecContext) -> CommandResult<Oid> {
        match self.key {
            KeyRef::Oid(oid) => Ok(oid),
            KeyRef::Session if self.operation == OperationMode::Hmac => ctx.session(),
            KeyRef::Session => Err(CommandError::InvalidRequest),
        }
    }

    fn header_size(&self, with_options: bool) -> usize {
        let mut size = KEY_OID_SIZE + TLV_HEADER_SIZE;
        if self.uses_session_slot() {
            size += SESSION_OID_SIZE;
        }
        if with_options {
            size += optional_tlv_size(&self.iv);
            size += optional_tlv_size(&self.associated_data);
            if self.total_length.is_some() {
                size += TLV_HEADER_SIZE + 2;
            }
            if self.command == ApduCommand::DecryptSym {
                size += optional_tlv_size(&self.verification);
            }
        }
        size
    }

    fn round_sequence(&self, first: bool, last: bool) -> SymSequence {
        use SequenceStep::*;
        match (first, last) {
            (true, true) => match self.step {
                Start => SymSequence::Start,
                StartFinal => SymSequence::StartFinal,
                Continue => SymSequence::Continue,
                Final => SymSequence::Final,
            },
            (true, false) => match self.step {
                Start | StartFinal => SymSequence::Start,
                Continue | Final => SymSequence::Continue,
            },
            (false, false) => SymSequence::Continue,
            (false, true) => match self.step {
                StartFinal | Final => SymSequence::Final,
                Start | Continue => SymSequence::Continue,
            },
        }
    }
}

impl CommandHandler for SymCipher {
    fn command(&self) -> ApduCommand {
        self.command
    }

    fn lock_kind(&self) -> LockKind {
        LockKind::StrictLock
    }

    fn requires_session(&self) -> bool {
        self.key.is_session() || self.uses_session_slot()
    }

    fn strict_sequence(&self) -> Option<StrictSequence> {
        Some(StrictSequence {
            command: self.command,
            mode: self.operation as u8,
            step: self.step,
        })
    }

    fn release_session_on_failure(&self) -> bool {
        self.uses_session_slot()
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        let first = self.sent == 0;
        let with_options = first && self.step.is_start();
        let header = self.header_size(with_options);
        let remaining = self.data.len() - self.sent;
        let block = self.mode.block_size();

        if header + remaining.min(block) > SYM_MAX_INDATA_LENGTH {
            return Err(CommandError::InvalidRequest);
        }
        let packets = (SYM_MAX_INDATA_LENGTH - header) / block;
        let mut max_packet = if packets > 0 { packets * block } else { remaining };
        let capacity = chunk_capacity(ctx, header)? / block * block;
        max_packet = max_packet.min(capacity);
        if max_packet == 0 && remaining > 0 {
            return Err(CommandError::BufferTooSmall);
        }
        if self.uses_session_slot() && remaining > max_packet {
            return Err(CommandError::InvalidRequest);
        }

        self.in_flight = remaining.min(max_packet);
        let last = self.in_flight == remaining;
        self.round = self.round_sequence(first, last);
        let chunk = &self.data[self.sent..self.sent + self.in_flight];

        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_u16(self.key_oid(ctx)?)?;
        w.put_u8(self.round as u8)?;
        if self.uses_session_slot() {
            w.put_u16((chunk.len() + SESSION_OID_SIZE) as u16)?;
            w.put_u16(ctx.session()?)?;
        } else {
            w.put_u16(chunk.len() as u16)?;
        }
        w.put_bytes(chunk)?;

        if with_options {
            if !self.iv.is_empty() {
                w.put_tlv(SYM_TAG_IV, &self.iv)?;
            }
            if !self.associated_data.is_empty() {
                w.put_tlv(SYM_TAG_ASSOCIATED_DATA, &self.associated_data)?;
            }
            if let Some(total) = self.total_length {
                w.put_tlv_u16(SYM_TAG_TOTAL_LENGTH, total)?;
            }
            if self.command == ApduCommand::DecryptSym && !self.verification.is_empty() {
                w.put_tlv(SYM_TAG_VERIFICATION_DATA, &self.verification)?;
            }
        }
        w.finish(self.command.code(), self.mode as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        self.sent += self.in_flight;
        self.in_flight = 0;

        if self.uses_session_slot() {
            return Ok(Progress::ReleaseSession);
        }

        if !self.mode.is_mac() || self.round.is_final() {
            let out = response.expect_tlv(SYM_TAG_OUT_DATA)?;
            self.out.extend_from_slice(out);
        }

        if self.sent < self.data.len() {
            Ok(Progress::Chain)
        } else if matches!(self.step, SequenceStep::StartFinal | SequenceStep::Final) {
            Ok(Progress::Done)
        } else {
            Ok(Progress::Hold)
        }
    }

    fn take_output(&mut self) -> CommandOutput {
        if self.uses_session_slot() {
            CommandOutput::Empty
        } else {
            CommandOutput::Data(core::mem::take(&mut self.out))
        }
    }
}

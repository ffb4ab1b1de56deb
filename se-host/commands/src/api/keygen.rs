// Licensed under the Apache-2.0 license

//! Key pair and symmetric key generation

use alloc::vec::Vec;
use se_host_command_types::{
    ApduCommand, CommandError, CommandResult, KeyType, KeyUsage, Oid, SymKeyType,
    KEYPAIR_TAG_EXPORT, KEYPAIR_TAG_KEY_USAGE, KEYPAIR_TAG_PRIVATE_KEY_OID,
    KEYPAIR_TAG_RESP_PRIVATE_KEY, KEYPAIR_TAG_RESP_PUBLIC_KEY, SYMKEY_TAG_EXPORT, SYMKEY_TAG_OID,
    SYMKEY_TAG_RESP_KEY, SYMKEY_TAG_USAGE,
};

use super::{apdu_buf, CommandHandler, CommandOutput, ExecContext, LockKind, Progress};
use crate::packing::{ApduResponse, ApduWriter};

/// Where a generated private or secret key ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTarget {
    Oid(Oid),
    Session,
    Export,
}

impl KeyTarget {
    fn lock_kind(&self) -> LockKind {
        match self {
            KeyTarget::Session => LockKind::Session,
            _ => LockKind::Lock,
        }
    }

    fn put(
        &self,
        w: &mut ApduWriter<'_>,
        ctx: &ExecContext,
        oid_tag: u8,
        export_tag: u8,
    ) -> CommandResult<()> {
        match self {
            KeyTarget::Oid(oid) => w.put_tlv_u16(oid_tag, *oid),
            KeyTarget::Session => w.put_tlv_u16(oid_tag, ctx.session()?),
            KeyTarget::Export => w.put_tl(export_tag, 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenKeyPair {
    key_type: KeyType,
    usage: KeyUsage,
    target: KeyTarget,
    public_key: Vec<u8>,
    private_key: Option<Vec<u8>>,
}

impl GenKeyPair {
    pub fn new(key_type: KeyType, usage: KeyUsage, target: KeyTarget) -> Self {
        Self {
            key_type,
            usage,
            target,
            public_key: Vec::new(),
            private_key: None,
        }
    }
}

impl CommandHandler for GenKeyPair {
    fn command(&self) -> ApduCommand {
        ApduCommand::GenKeyPair
    }

    fn lock_kind(&self) -> LockKind {
        self.target.lock_kind()
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        self.target
            .put(&mut w, ctx, KEYPAIR_TAG_PRIVATE_KEY_OID, KEYPAIR_TAG_EXPORT)?;
        w.put_tlv_u8(KEYPAIR_TAG_KEY_USAGE, self.usage.0)?;
        w.finish(self.command().code(), self.key_type as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        let public_key = response
            .find_tlv(KEYPAIR_TAG_RESP_PUBLIC_KEY)?
            .ok_or(CommandError::InvalidResponse)?;
        self.public_key = public_key.to_vec();
        if self.target == KeyTarget::Export {
            let private_key = response
                .find_tlv(KEYPAIR_TAG_RESP_PRIVATE_KEY)?
                .ok_or(CommandError::InvalidResponse)?;
            self.private_key = Some(private_key.to_vec());
        }
        Ok(Progress::Done)
    }

    fn take_output(&mut self) -> CommandOutput {
        CommandOutput::KeyPair {
            public_key: core::mem::take(&mut self.public_key),
            private_key: self.private_key.take(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenSymKey {
    key_type: SymKeyType,
    usage: KeyUsage,
    target: KeyTarget,
    key: Vec<u8>,
}

impl GenSymKey {
    pub fn new(key_type: SymKeyType, usage: KeyUsage, target: KeyTarget) -> Self {
        Self {
            key_type,
            usage,
            target,
            key: Vec::new(),
        }
    }
}

impl CommandHandler for GenSymKey {
    fn command(&self) -> ApduCommand {
        ApduCommand::GenSymKey
    }

    fn lock_kind(&self) -> LockKind {
        self.target.lock_kind()
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        self.target.put(&mut w, ctx, SYMKEY_TAG_OID, SYMKEY_TAG_EXPORT)?;
        w.put_tlv_u8(SYMKEY_TAG_USAGE, self.usage.0)?;
        w.finish(self.command().code(), self.key_type as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        if self.target == KeyTarget::Export {
            let key = response.expect_tlv(SYMKEY_TAG_RESP_KEY)?;
            if key.len() != self.key_type.key_size() {
                return Err(CommandError::InvalidResponseLength);
            }
            self.key = key.to_vec();
        }
        Ok(Progress::Done)
    }

    fn take_output(&mut self) -> CommandOutput {
        match self.target {
            KeyTarget::Export => CommandOutput::Data(core::mem::take(&mut self.key)),
            _ => CommandOutput::Empty,
        }
    }
}

// Licensed under the Apache-2.0 license

//! Shared secret calculation and key derivation
//!
//! Both commands either export their result to the host or keep it in the
//! instance's session slot, where later sign / derive / HMAC calls pick it up
//! through [`KeyRef::Session`].

use alloc::vec::Vec;
use se_host_command_types::{
    ApduCommand, CommandError, CommandResult, KeyAgreementScheme, KeyDerivation, KeyType,
    DERIVE_MIN_KEY_LENGTH, DERIVE_TAG_DERIVATION_DATA, DERIVE_TAG_EXPORT, DERIVE_TAG_INFO,
    DERIVE_TAG_KEY_LENGTH, DERIVE_TAG_SECRET_OID, DERIVE_TAG_STORE, SSEC_TAG_ALGORITHM,
    SSEC_TAG_EXPORT, SSEC_TAG_PRIVATE_KEY, SSEC_TAG_PUBLIC_KEY, SSEC_TAG_STORE_SESSION,
};

use super::{
    apdu_buf, CommandHandler, CommandOutput, ExecContext, KeyRef, LockKind, Progress,
    SecretTarget,
};
use crate::packing::{ApduResponse, ApduWriter};

fn put_target(
    w: &mut ApduWriter<'_>,
    ctx: &ExecContext,
    target: SecretTarget,
    export_tag: u8,
    store_tag: u8,
) -> CommandResult<()> {
    match target {
        SecretTarget::Export => w.put_tl(export_tag, 0),
        SecretTarget::Session => w.put_tlv_u16(store_tag, ctx.session()?),
    }
}

fn target_lock(target: SecretTarget) -> LockKind {
    match target {
        SecretTarget::Export => LockKind::Lock,
        SecretTarget::Session => LockKind::Session,
    }
}

#[derive(Debug, Clone)]
pub struct CalcSharedSecret {
    scheme: KeyAgreementScheme,
    private_key: KeyRef,
    key_type: KeyType,
    public_key: Vec<u8>,
    target: SecretTarget,
    secret: Vec<u8>,
}

impl CalcSharedSecret {
    pub fn new(
        private_key: KeyRef,
        key_type: KeyType,
        public_key: Vec<u8>,
        target: SecretTarget,
    ) -> Self {
        Self {
            scheme: KeyAgreementScheme::Ecdh,
            private_key,
            key_type,
            public_key,
            target,
            secret: Vec::new(),
        }
    }
}

impl CommandHandler for CalcSharedSecret {
    fn command(&self) -> ApduCommand {
        ApduCommand::CalcSsec
    }

    fn lock_kind(&self) -> LockKind {
        target_lock(self.target)
    }

    fn requires_session(&self) -> bool {
        self.private_key.is_session()
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        if self.public_key.is_empty() {
            return Err(CommandError::InvalidRequest);
        }
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_tlv_u16(SSEC_TAG_PRIVATE_KEY, self.private_key.resolve(ctx)?)?;
        w.put_tlv_u8(SSEC_TAG_ALGORITHM, self.key_type as u8)?;
        w.put_tlv(SSEC_TAG_PUBLIC_KEY, &self.public_key)?;
        put_target(&mut w, ctx, self.target, SSEC_TAG_EXPORT, SSEC_TAG_STORE_SESSION)?;
        w.finish(self.command().code(), self.scheme as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        if self.target == SecretTarget::Export {
            if response.payload.is_empty() {
                return Err(CommandError::InvalidResponseLength);
            }
            self.secret = response.payload.to_vec();
        }
        Ok(Progress::Done)
    }

    fn take_output(&mut self) -> CommandOutput {
        match self.target {
            SecretTarget::Export => CommandOutput::Data(core::mem::take(&mut self.secret)),
            SecretTarget::Session => CommandOutput::Empty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeriveKey {
    method: KeyDerivation,
    secret: KeyRef,
    derivation_data: Vec<u8>,
    info: Vec<u8>,
    key_length: u16,
    target: SecretTarget,
    key: Vec<u8>,
}

impl DeriveKey {
    pub fn new(
        method: KeyDerivation,
        secret: KeyRef,
        derivation_data: Vec<u8>,
        key_length: u16,
        target: SecretTarget,
    ) -> Self {
        Self {
            method,
            secret,
            derivation_data,
            info: Vec::new(),
            key_length,
            target,
            key: Vec::new(),
        }
    }

    /// HKDF info; ignored by the TLS PRF methods
    pub fn with_info(mut self, info: Vec<u8>) -> Self {
        self.info = info;
        self
    }
}

impl CommandHandler for DeriveKey {
    fn command(&self) -> ApduCommand {
        ApduCommand::DeriveKey
    }

    fn lock_kind(&self) -> LockKind {
        target_lock(self.target)
    }

    fn requires_session(&self) -> bool {
        self.secret.is_session()
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        if self.key_length < DERIVE_MIN_KEY_LENGTH {
            return Err(CommandError::InvalidRequest);
        }
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_tlv_u16(DERIVE_TAG_SECRET_OID, self.secret.resolve(ctx)?)?;
        w.put_tlv(DERIVE_TAG_DERIVATION_DATA, &self.derivation_data)?;
        w.put_tlv_u16(DERIVE_TAG_KEY_LENGTH, self.key_length)?;
        if self.method.is_hkdf() && !self.info.is_empty() {
            w.put_tlv(DERIVE_TAG_INFO, &self.info)?;
        }
        put_target(&mut w, ctx, self.target, DERIVE_TAG_EXPORT, DERIVE_TAG_STORE)?;
        w.finish(self.command().code(), self.method as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        if self.target == SecretTarget::Export {
            if response.payload.len() != self.key_length as usize {
                return Err(CommandError::InvalidResponseLength);
            }
            self.key = response.payload.to_vec();
        }
        Ok(Progress::Done)
    }

    fn take_output(&mut self) -> CommandOutput {
        match self.target {
            SecretTarget::Export => CommandOutput::Data(core::mem::take(&mut self.key)),
            SecretTarget::Session => CommandOutput::Empty,
        }
    }
}

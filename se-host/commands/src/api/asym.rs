// Licensed under the Apache-2.0 license

//! RSA encryption and decryption

use alloc::vec::Vec;
use se_host_command_types::{
    ApduCommand, AsymEncryptionScheme, CommandError, CommandResult, Oid, ASYM_TAG_ALGORITHM,
    ASYM_TAG_CERT_OID, ASYM_TAG_DECRYPT_KEY, ASYM_TAG_MESSAGE, ASYM_TAG_PUBLIC_KEY,
    ASYM_TAG_SESSION_OID,
};

use super::{
    apdu_buf, CommandHandler, CommandOutput, ExecContext, LockKind, Progress, PublicKeySource,
    SecretTarget,
};
use crate::packing::{ApduResponse, ApduWriter};

/// Plaintext of an asymmetric encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsymMessage {
    Data(Vec<u8>),
    /// Secret held in the instance's session slot
    Session,
}

#[derive(Debug, Clone)]
pub struct EncryptAsym {
    scheme: AsymEncryptionScheme,
    message: AsymMessage,
    public_key: PublicKeySource,
    ciphertext: Vec<u8>,
}

impl EncryptAsym {
    pub fn new(message: AsymMessage, public_key: PublicKeySource) -> Self {
        Self {
            scheme: AsymEncryptionScheme::RsaesPkcs1v15,
            message,
            public_key,
            ciphertext: Vec::new(),
        }
    }
}

impl CommandHandler for EncryptAsym {
    fn command(&self) -> ApduCommand {
        ApduCommand::EncryptAsym
    }

    fn requires_session(&self) -> bool {
        self.message == AsymMessage::Session
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        match &self.message {
            AsymMessage::Data(data) => w.put_tlv(ASYM_TAG_MESSAGE, data)?,
            AsymMessage::Session => w.put_tlv_u16(ASYM_TAG_SESSION_OID, ctx.session()?)?,
        }
        match &self.public_key {
            PublicKeySource::Certificate(oid) => w.put_tlv_u16(ASYM_TAG_CERT_OID, *oid)?,
            PublicKeySource::Key {
                key_type,
                public_key,
            } => {
                if !key_type.is_rsa() {
                    return Err(CommandError::InvalidRequest);
                }
                w.put_tlv_u8(ASYM_TAG_ALGORITHM, *key_type as u8)?;
                w.put_tlv(ASYM_TAG_PUBLIC_KEY, public_key)?;
            }
        }
        w.finish(self.command().code(), self.scheme as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        self.ciphertext = response.expect_tlv(ASYM_TAG_MESSAGE)?.to_vec();
        Ok(Progress::Done)
    }

    fn take_output(&mut self) -> CommandOutput {
        CommandOutput::Data(core::mem::take(&mut self.ciphertext))
    }
}

#[derive(Debug, Clone)]
pub struct DecryptAsym {
    scheme: AsymEncryptionScheme,
    ciphertext: Vec<u8>,
    private_key: Oid,
    target: SecretTarget,
    plaintext: Vec<u8>,
}

impl DecryptAsym {
    pub fn new(ciphertext: Vec<u8>, private_key: Oid, target: SecretTarget) -> Self {
        Self {
            scheme: AsymEncryptionScheme::RsaesPkcs1v15,
            ciphertext,
            private_key,
            target,
            plaintext: Vec::new(),
        }
    }
}

impl CommandHandler for DecryptAsym {
    fn command(&self) -> ApduCommand {
        ApduCommand::DecryptAsym
    }

    fn lock_kind(&self) -> LockKind {
        match self.target {
            SecretTarget::Export => LockKind::Lock,
            SecretTarget::Session => LockKind::Session,
        }
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        if self.ciphertext.is_empty() {
            return Err(CommandError::InvalidRequest);
        }
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_tlv(ASYM_TAG_MESSAGE, &self.ciphertext)?;
        w.put_tlv_u16(ASYM_TAG_DECRYPT_KEY, self.private_key)?;
        if self.target == SecretTarget::Session {
            w.put_tlv_u16(ASYM_TAG_SESSION_OID, ctx.session()?)?;
        }
        w.finish(self.command().code(), self.scheme as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        if self.target == SecretTarget::Export {
            self.plaintext = response.expect_tlv(ASYM_TAG_MESSAGE)?.to_vec();
        }
        Ok(Progress::Done)
    }

    fn take_output(&mut self) -> CommandOutput {
        match self.target {
            SecretTarget::Export => CommandOutput::Data(core::mem::take(&mut self.plaintext)),
            SecretTarget::Session => CommandOutput::Empty,
        }
    }
}

// Licensed under the Apache-2.0 license

//! Signature generation and verification

use alloc::vec::Vec;
use se_host_command_types::{
    ApduCommand, CommandError, CommandResult, KeyType, Oid, SignatureScheme, SIGN_TAG_DIGEST,
    SIGN_TAG_KEY_OID, VERIFY_TAG_ALGORITHM, VERIFY_TAG_CERT_OID, VERIFY_TAG_DIGEST,
    VERIFY_TAG_PUBLIC_KEY, VERIFY_TAG_SIGNATURE,
};

use super::{apdu_buf, CommandHandler, CommandOutput, ExecContext, KeyRef, Progress};
use crate::packing::{ApduResponse, ApduWriter};

#[derive(Debug, Clone)]
pub struct CalcSign {
    scheme: SignatureScheme,
    key: KeyRef,
    digest: Vec<u8>,
    signature: Vec<u8>,
}

impl CalcSign {
    pub fn new(scheme: SignatureScheme, key: KeyRef, digest: Vec<u8>) -> Self {
        Self {
            scheme,
            key,
            digest,
            signature: Vec::new(),
        }
    }
}

impl CommandHandler for CalcSign {
    fn command(&self) -> ApduCommand {
        ApduCommand::CalcSign
    }

    fn requires_session(&self) -> bool {
        self.key.is_session()
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        if self.digest.is_empty() {
            return Err(CommandError::InvalidRequest);
        }
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_tlv(SIGN_TAG_DIGEST, &self.digest)?;
        w.put_tlv_u16(SIGN_TAG_KEY_OID, self.key.resolve(ctx)?)?;
        w.finish(self.command().code(), self.scheme as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        if response.payload.is_empty() {
            return Err(CommandError::InvalidResponseLength);
        }
        self.signature = response.payload.to_vec();
        Ok(Progress::Done)
    }

    fn take_output(&mut self) -> CommandOutput {
        CommandOutput::Data(core::mem::take(&mut self.signature))
    }
}

/// Where the verifier's public key comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeySource {
    /// Certificate stored in a device data object
    Certificate(Oid),
    /// Raw public key supplied by the host
    Key { key_type: KeyType, public_key: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct VerifySign {
    scheme: SignatureScheme,
    digest: Vec<u8>,
    signature: Vec<u8>,
    public_key: PublicKeySource,
}

impl VerifySign {
    pub fn new(
        scheme: SignatureScheme,
        digest: Vec<u8>,
        signature: Vec<u8>,
        public_key: PublicKeySource,
    ) -> Self {
        Self {
            scheme,
            digest,
            signature,
            public_key,
        }
    }
}

impl CommandHandler for VerifySign {
    fn command(&self) -> ApduCommand {
        ApduCommand::VerifySign
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        if self.digest.is_empty() || self.signature.is_empty() {
            return Err(CommandError::InvalidRequest);
        }
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_tlv(VERIFY_TAG_DIGEST, &self.digest)?;
        w.put_tlv(VERIFY_TAG_SIGNATURE, &self.signature)?;
        match &self.public_key {
            PublicKeySource::Certificate(oid) => w.put_tlv_u16(VERIFY_TAG_CERT_OID, *oid)?,
            PublicKeySource::Key {
                key_type,
                public_key,
            } => {
                w.put_tlv_u8(VERIFY_TAG_ALGORITHM, *key_type as u8)?;
                w.put_tlv(VERIFY_TAG_PUBLIC_KEY, public_key)?;
            }
        }
        w.finish(self.command().code(), self.scheme as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, _response: &ApduResponse<'_>) -> CommandResult<Progress> {
        Ok(Progress::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use alloc::vec;

    #[test]
    fn test_sign_with_session_key() {
        let mut ctx = ctx(128);
        let mut sign = CalcSign::new(SignatureScheme::Ecdsa, KeyRef::Session, vec![0xAB; 4]);
        let mut buf = [0u8; 128];
        assert!(sign.requires_session());
        assert_eq!(sign.prepare(&ctx, &mut buf), Err(CommandError::SessionRequired));

        ctx.session_oid = Some(0xE101);
        let len = sign.prepare(&ctx, &mut buf).unwrap();
        assert_eq!(
            &buf[..len],
            &[
                0xB1, 0x11, 0x00, 0x0C, 0x01, 0x00, 0x04, 0xAB, 0xAB, 0xAB, 0xAB, 0x03, 0x00,
                0x02, 0xE1, 0x01
            ]
        );
        assert_eq!(respond(&mut sign, &ctx, &[0x30, 0x02, 0x01, 0x01]), Ok(Progress::Done));
        assert_eq!(sign.take_output(), CommandOutput::Data(vec![0x30, 0x02, 0x01, 0x01]));
    }

    #[test]
    fn test_verify_with_host_key() {
        let ctx = ctx(128);
        let mut verify = VerifySign::new(
            SignatureScheme::Ecdsa,
            vec![0x01; 2],
            vec![0x02; 2],
            PublicKeySource::Key {
                key_type: KeyType::EccNistP384,
                public_key: vec![0x04, 0x05],
            },
        );
        let mut buf = [0u8; 128];
        let len = verify.prepare(&ctx, &mut buf).unwrap();
        assert_eq!(
            &buf[4..len],
            &[
                0x01, 0x00, 0x02, 0x01, 0x01, 0x02, 0x00, 0x02, 0x02, 0x02, 0x05, 0x00, 0x01,
                0x04, 0x06, 0x00, 0x02, 0x04, 0x05
            ]
        );
        assert!(!verify.requires_session());
    }

    #[test]
    fn test_verify_with_certificate() {
        let ctx = ctx(128);
        let mut verify = VerifySign::new(
            SignatureScheme::Ecdsa,
            vec![0x01],
            vec![0x02],
            PublicKeySource::Certificate(0xE0E0),
        );
        let mut buf = [0u8; 128];
        let len = verify.prepare(&ctx, &mut buf).unwrap();
        assert_eq!(&buf[len - 5..len], &[0x04, 0x00, 0x02, 0xE0, 0xE0]);
        assert_eq!(respond(&mut verify, &ctx, &[]), Ok(Progress::Done));
    }
}

// Licensed under the Apache-2.0 license

//! Crypto collaborator
//!
//! The channel only needs AES-128-CCM with an 8-byte nonce and an 8-byte
//! tag, plus the TLS 1.2 PRF over HMAC-SHA256. Both are pure functions with
//! no state of their own, so an implementation backed by a hardware engine
//! can be dropped in through [`ChannelCrypto`].

use aes::Aes128;
use ccm::aead::{AeadInPlace, KeyInit};
use ccm::consts::U8;
use ccm::Ccm;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{ChannelError, ChannelResult};

pub const KEY_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 8;
pub const TAG_SIZE: usize = 8;

type Aes128Ccm = Ccm<Aes128, U8, U8>;
type HmacSha256 = Hmac<Sha256>;

const SHA256_OUTPUT_SIZE: usize = 32;

pub trait ChannelCrypto: Send {
    /// Encrypt `buffer` in place and return the authentication tag
    fn seal(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buffer: &mut [u8],
    ) -> ChannelResult<[u8; TAG_SIZE]>;

    /// Verify `tag` and decrypt `buffer` in place
    ///
    /// Fails with [`ChannelError::Integrity`] when authentication fails;
    /// `buffer` is then left unspecified.
    fn open(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8; TAG_SIZE],
    ) -> ChannelResult<()>;

    /// Fill `out` with PRF(secret, label, seed)
    fn prf(&self, secret: &[u8], label: &[u8], seed: &[u8], out: &mut [u8]) -> ChannelResult<()>;
}

/// RustCrypto implementation of [`ChannelCrypto`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareCrypto;

impl SoftwareCrypto {
    pub fn new() -> Self {
        Self
    }

    fn hmac(secret: &[u8], parts: &[&[u8]]) -> ChannelResult<[u8; SHA256_OUTPUT_SIZE]> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|_| ChannelError::Crypto("invalid HMAC key length"))?;
        for part in parts {
            mac.update(part);
        }
        Ok(mac.finalize().into_bytes().into())
    }
}

impl ChannelCrypto for SoftwareCrypto {
    fn seal(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buffer: &mut [u8],
    ) -> ChannelResult<[u8; TAG_SIZE]> {
        let cipher = Aes128Ccm::new(key.into());
        let tag = cipher
            .encrypt_in_place_detached(nonce.into(), aad, buffer)
            .map_err(|_| ChannelError::Crypto("CCM encryption failed"))?;
        Ok(tag.into())
    }

    fn open(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8; TAG_SIZE],
    ) -> ChannelResult<()> {
        let cipher = Aes128Ccm::new(key.into());
        cipher
            .decrypt_in_place_detached(nonce.into(), aad, buffer, tag.into())
            .map_err(|_| ChannelError::Integrity)
    }

    /// TLS 1.2 P_SHA256 over `label || seed`
    fn prf(&self, secret: &[u8], label: &[u8], seed: &[u8], out: &mut [u8]) -> ChannelResult<()> {
        let mut a = Self::hmac(secret, &[label, seed])?;
        for chunk in out.chunks_mut(SHA256_OUTPUT_SIZE) {
            let block = Self::hmac(secret, &[&a, label, seed])?;
            chunk.copy_from_slice(&block[..chunk.len()]);
            a = Self::hmac(secret, &[&a])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_SIZE] = [0x42; KEY_SIZE];
    const NONCE: [u8; NONCE_SIZE] = [1, 2, 3, 4, 0, 0, 0, 9];

    #[test]
    fn test_seal_then_open() {
        let crypto = SoftwareCrypto::new();
        let mut buffer = *b"get random 32";
        let tag = crypto.seal(&KEY, &NONCE, b"aad", &mut buffer).unwrap();
        assert_ne!(&buffer, b"get random 32");

        crypto.open(&KEY, &NONCE, b"aad", &mut buffer, &tag).unwrap();
        assert_eq!(&buffer, b"get random 32");
    }

    #[test]
    fn test_open_detects_tampering() {
        let crypto = SoftwareCrypto::new();
        let mut buffer = [0x5Au8; 20];
        let tag = crypto.seal(&KEY, &NONCE, b"hdr", &mut buffer).unwrap();

        let mut flipped = buffer;
        flipped[3] ^= 0x01;
        assert_eq!(
            crypto.open(&KEY, &NONCE, b"hdr", &mut flipped, &tag),
            Err(ChannelError::Integrity)
        );

        let mut copy = buffer;
        assert_eq!(
            crypto.open(&KEY, &NONCE, b"other", &mut copy, &tag),
            Err(ChannelError::Integrity)
        );
    }

    #[test]
    fn test_prf_is_deterministic_and_prefix_stable() {
        let crypto = SoftwareCrypto::new();
        let secret = [0x11u8; 64];
        let seed = [0x22u8; 32];
        let mut short = [0u8; 40];
        let mut long = [0u8; 72];
        crypto.prf(&secret, b"Platform Binding", &seed, &mut short).unwrap();
        crypto.prf(&secret, b"Platform Binding", &seed, &mut long).unwrap();
        assert_eq!(&short[..], &long[..40]);

        let mut other = [0u8; 40];
        crypto.prf(&secret, b"Platform Binding", &[0x23; 32], &mut other).unwrap();
        assert_ne!(short, other);
    }
}

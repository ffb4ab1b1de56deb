// Licensed under the Apache-2.0 license

//! Asymmetric Crypto Commands
//!
//! Identifiers for key generation, signatures, key agreement, key
//! derivation and RSA encryption, plus the TLV tags their requests use.

use core::ops::BitOr;

/// Key algorithm identifier shared by key generation and public key TLVs
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    EccNistP256 = 0x03,
    #[default]
    EccNistP384 = 0x04,
    EccNistP521 = 0x05,
    EccBrainpoolP256r1 = 0x13,
    EccBrainpoolP384r1 = 0x15,
    EccBrainpoolP512r1 = 0x16,
    Rsa1024 = 0x41,
    Rsa2048 = 0x42,
}

impl KeyType {
    pub fn from_id(id: u8) -> Option<Self> {
        let key_type = match id {
            0x03 => KeyType::EccNistP256,
            0x04 => KeyType::EccNistP384,
            0x05 => KeyType::EccNistP521,
            0x13 => KeyType::EccBrainpoolP256r1,
            0x15 => KeyType::EccBrainpoolP384r1,
            0x16 => KeyType::EccBrainpoolP512r1,
            0x41 => KeyType::Rsa1024,
            0x42 => KeyType::Rsa2048,
            _ => return None,
        };
        Some(key_type)
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, KeyType::Rsa1024 | KeyType::Rsa2048)
    }
}

/// Key usage bits assigned at key generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyUsage(pub u8);

impl KeyUsage {
    pub const AUTHENTICATION: KeyUsage = KeyUsage(0x01);
    pub const ENCRYPTION: KeyUsage = KeyUsage(0x02);
    pub const SIGN: KeyUsage = KeyUsage(0x10);
    pub const KEY_AGREEMENT: KeyUsage = KeyUsage(0x20);

    pub fn contains(&self, other: KeyUsage) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for KeyUsage {
    type Output = KeyUsage;

    fn bitor(self, rhs: KeyUsage) -> KeyUsage {
        KeyUsage(self.0 | rhs.0)
    }
}

/// CalcSign / VerifySign param byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureScheme {
    RsaPkcs1v15Sha256 = 0x01,
    RsaPkcs1v15Sha384 = 0x02,
    RsaPkcs1v15Sha512 = 0x03,
    #[default]
    Ecdsa = 0x11,
}

/// CalcSsec param byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAgreementScheme {
    #[default]
    Ecdh = 0x01,
}

/// DeriveKey param byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyDerivation {
    #[default]
    TlsPrfSha256 = 0x01,
    TlsPrfSha384 = 0x02,
    TlsPrfSha512 = 0x03,
    HkdfSha256 = 0x08,
    HkdfSha384 = 0x09,
    HkdfSha512 = 0x0A,
}

impl KeyDerivation {
    pub fn from_id(id: u8) -> Option<Self> {
        let method = match id {
            0x01 => KeyDerivation::TlsPrfSha256,
            0x02 => KeyDerivation::TlsPrfSha384,
            0x03 => KeyDerivation::TlsPrfSha512,
            0x08 => KeyDerivation::HkdfSha256,
            0x09 => KeyDerivation::HkdfSha384,
            0x0A => KeyDerivation::HkdfSha512,
            _ => return None,
        };
        Some(method)
    }

    pub fn is_hkdf(&self) -> bool {
        matches!(
            self,
            KeyDerivation::HkdfSha256 | KeyDerivation::HkdfSha384 | KeyDerivation::HkdfSha512
        )
    }
}

/// EncryptAsym / DecryptAsym param byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsymEncryptionScheme {
    #[default]
    RsaesPkcs1v15 = 0x11,
}

pub const SIGN_TAG_DIGEST: u8 = 0x01;
pub const SIGN_TAG_KEY_OID: u8 = 0x03;

pub const VERIFY_TAG_DIGEST: u8 = 0x01;
pub const VERIFY_TAG_SIGNATURE: u8 = 0x02;
pub const VERIFY_TAG_CERT_OID: u8 = 0x04;
pub const VERIFY_TAG_ALGORITHM: u8 = 0x05;
pub const VERIFY_TAG_PUBLIC_KEY: u8 = 0x06;

pub const SSEC_TAG_PRIVATE_KEY: u8 = 0x01;
pub const SSEC_TAG_ALGORITHM: u8 = 0x05;
pub const SSEC_TAG_PUBLIC_KEY: u8 = 0x06;
pub const SSEC_TAG_EXPORT: u8 = 0x07;
pub const SSEC_TAG_STORE_SESSION: u8 = 0x08;

pub const DERIVE_TAG_SECRET_OID: u8 = 0x01;
pub const DERIVE_TAG_DERIVATION_DATA: u8 = 0x02;
pub const DERIVE_TAG_KEY_LENGTH: u8 = 0x03;
pub const DERIVE_TAG_INFO: u8 = 0x04;
pub const DERIVE_TAG_EXPORT: u8 = 0x07;
pub const DERIVE_TAG_STORE: u8 = 0x08;
pub const DERIVE_MIN_KEY_LENGTH: u16 = 0x10;

pub const KEYPAIR_TAG_PRIVATE_KEY_OID: u8 = 0x01;
pub const KEYPAIR_TAG_KEY_USAGE: u8 = 0x02;
pub const KEYPAIR_TAG_EXPORT: u8 = 0x07;
pub const KEYPAIR_TAG_RESP_PRIVATE_KEY: u8 = 0x01;
pub const KEYPAIR_TAG_RESP_PUBLIC_KEY: u8 = 0x02;

pub const ASYM_TAG_MESSAGE: u8 = 0x61;
pub const ASYM_TAG_SESSION_OID: u8 = 0x02;
pub const ASYM_TAG_DECRYPT_KEY: u8 = 0x03;
pub const ASYM_TAG_CERT_OID: u8 = 0x04;
pub const ASYM_TAG_ALGORITHM: u8 = 0x05;
pub const ASYM_TAG_PUBLIC_KEY: u8 = 0x06;

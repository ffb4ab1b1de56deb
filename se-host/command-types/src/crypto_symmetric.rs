// Licensed under the Apache-2.0 license

//! Symmetric Crypto Commands
//!
//! EncryptSym and DecryptSym carry block ciphers, MACs and HMACs. Long
//! inputs are streamed as start / continue / final under the strict lock;
//! the param byte of the APDU is the [`SymMode`].

/// Symmetric mode of operation
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymMode {
    #[default]
    Ecb = 0x08,
    Cbc = 0x09,
    CbcMac = 0x0A,
    Cmac = 0x0B,
    HmacSha256 = 0x20,
    HmacSha384 = 0x21,
    HmacSha512 = 0x22,
}

impl SymMode {
    pub fn from_id(id: u8) -> Option<Self> {
        let mode = match id {
            0x08 => SymMode::Ecb,
            0x09 => SymMode::Cbc,
            0x0A => SymMode::CbcMac,
            0x0B => SymMode::Cmac,
            0x20 => SymMode::HmacSha256,
            0x21 => SymMode::HmacSha384,
            0x22 => SymMode::HmacSha512,
            _ => return None,
        };
        Some(mode)
    }

    /// Chunk granularity when streaming
    pub fn block_size(&self) -> usize {
        match self {
            SymMode::Ecb | SymMode::Cbc | SymMode::CbcMac | SymMode::Cmac => 16,
            SymMode::HmacSha256 | SymMode::HmacSha384 | SymMode::HmacSha512 => 1,
        }
    }

    /// MAC modes only produce output on the final step
    pub fn is_mac(&self) -> bool {
        !matches!(self, SymMode::Ecb | SymMode::Cbc)
    }

    pub fn is_hmac(&self) -> bool {
        matches!(
            self,
            SymMode::HmacSha256 | SymMode::HmacSha384 | SymMode::HmacSha512
        )
    }
}

/// Streaming sequence byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymSequence {
    Start = 0x00,
    StartFinal = 0x01,
    Continue = 0x02,
    Final = 0x03,
}

impl SymSequence {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(SymSequence::Start),
            0x01 => Some(SymSequence::StartFinal),
            0x02 => Some(SymSequence::Continue),
            0x03 => Some(SymSequence::Final),
            _ => None,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, SymSequence::Start | SymSequence::StartFinal)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, SymSequence::StartFinal | SymSequence::Final)
    }
}

/// Operation a strict symmetric sequence was started for
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Decrypt = 0x00,
    Encrypt = 0x01,
    Hmac = 0x02,
    ClearAutoState = 0x03,
}

impl OperationMode {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(OperationMode::Decrypt),
            0x01 => Some(OperationMode::Encrypt),
            0x02 => Some(OperationMode::Hmac),
            0x03 => Some(OperationMode::ClearAutoState),
            _ => None,
        }
    }
}

/// Symmetric key type for GenSymKey
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymKeyType {
    #[default]
    Aes128 = 0x81,
    Aes192 = 0x82,
    Aes256 = 0x83,
}

impl SymKeyType {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x81 => Some(SymKeyType::Aes128),
            0x82 => Some(SymKeyType::Aes192),
            0x83 => Some(SymKeyType::Aes256),
            _ => None,
        }
    }

    pub fn key_size(&self) -> usize {
        match self {
            SymKeyType::Aes128 => 16,
            SymKeyType::Aes192 => 24,
            SymKeyType::Aes256 => 32,
        }
    }
}

pub const SYM_TAG_ASSOCIATED_DATA: u8 = 0x40;
pub const SYM_TAG_IV: u8 = 0x41;
pub const SYM_TAG_TOTAL_LENGTH: u8 = 0x42;
pub const SYM_TAG_VERIFICATION_DATA: u8 = 0x43;
pub const SYM_TAG_OUT_DATA: u8 = 0x61;

/// Largest in-data payload of one EncryptSym / DecryptSym APDU
pub const SYM_MAX_INDATA_LENGTH: usize = 640;

pub const SYMKEY_TAG_OID: u8 = 0x01;
pub const SYMKEY_TAG_USAGE: u8 = 0x02;
pub const SYMKEY_TAG_EXPORT: u8 = 0x07;
pub const SYMKEY_TAG_RESP_KEY: u8 = 0x01;

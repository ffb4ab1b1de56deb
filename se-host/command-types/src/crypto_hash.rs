// Licensed under the Apache-2.0 license

//! Cryptographic Hash Commands
//!
//! Hashing runs as a start / continue / final sequence. Between calls the
//! host carries the intermediate context exported by the device; start-final
//! hashes a complete message in one logical call.

/// CalcHash sequence byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashSequence {
    Start = 0x00,
    StartFinal = 0x01,
    Continue = 0x02,
    Final = 0x03,
}

impl HashSequence {
    pub fn is_final(self) -> bool {
        matches!(self, HashSequence::StartFinal | HashSequence::Final)
    }
}

pub const HASH_TAG_INTERMEDIATE_CONTEXT: u8 = 0x06;
pub const HASH_TAG_CONTEXT_OUT: u8 = 0x07;
pub const HASH_TAG_DIGEST: u8 = 0x01;

/// Sequence byte + length ahead of the message chunk
pub const HASH_HEADER_SIZE: usize = 6;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256 = 0xE2,
}

impl HashAlgorithm {
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
        }
    }
}

// Licensed under the Apache-2.0 license

//! Random Number Commands

/// GetRandom param byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RandomType {
    #[default]
    Trng = 0x00,
    Drng = 0x01,
    /// TLS pre-master secret, kept in a session and never exported
    PreMasterSecret = 0x04,
}

pub const RANDOM_TAG_OPTIONAL_DATA: u8 = 0x41;

pub const MIN_RANDOM_LENGTH: u16 = 8;
pub const MAX_RANDOM_LENGTH: u16 = 256;

// Licensed under the Apache-2.0 license

//! Secure-Element Command Types
//!
//! Shared command definitions for the host library: APDU opcodes and
//! headers, object identifiers, algorithm identifiers and device error codes.
//! Nothing here allocates; the framing of individual commands lives in the
//! commands crate.

#![no_std]

use zerocopy::byteorder::big_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub mod application;
pub mod crypto_asymmetric;
pub mod crypto_hash;
pub mod crypto_symmetric;
pub mod data_object;
pub mod error;
pub mod protected_update;
pub mod random;

pub use application::*;
pub use crypto_asymmetric::*;
pub use crypto_hash::*;
pub use crypto_symmetric::*;
pub use data_object::*;
pub use error::*;
pub use protected_update::*;
pub use random::*;

/// Object identifier of a data object or key slot on the device
pub type Oid = u16;

/// Bit 7 of the command byte asks the device to clear its last-error register
pub const CLEAR_LAST_ERROR: u8 = 0x80;

pub const APDU_HEADER_SIZE: usize = 4;
pub const APDU_SUCCESS: u8 = 0x00;
pub const APDU_FAILURE: u8 = 0xFF;

/// Largest APDU the device accepts, header included
pub const MAX_APDU_SIZE: usize = 1552;

/// Tag + 16-bit length
pub const TLV_HEADER_SIZE: usize = 3;

/// Device register holding the cause of the last failed command
pub const LAST_ERROR_CODE_OID: Oid = 0xF1C2;

pub const SESSION_OID_BASE: Oid = 0xE100;

/// APDU command codes, without the clear-last-error bit
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApduCommand {
    GetDataObject = 0x01,
    SetDataObject = 0x02,
    SetObjectProtected = 0x03,
    GetRandom = 0x0C,
    EncryptSym = 0x14,
    DecryptSym = 0x15,
    EncryptAsym = 0x1E,
    DecryptAsym = 0x1F,
    CalcHash = 0x30,
    CalcSign = 0x31,
    VerifySign = 0x32,
    CalcSsec = 0x33,
    DeriveKey = 0x34,
    GenKeyPair = 0x38,
    GenSymKey = 0x39,
    OpenApplication = 0x70,
    CloseApplication = 0x71,
}

impl ApduCommand {
    /// Command byte as sent on the wire, with the clear-last-error bit set
    pub fn code(self) -> u8 {
        self as u8 | CLEAR_LAST_ERROR
    }

    /// Decode a wire command byte, ignoring the clear-last-error bit
    pub fn from_code(code: u8) -> Option<Self> {
        let cmd = match code & !CLEAR_LAST_ERROR {
            0x01 => ApduCommand::GetDataObject,
            0x02 => ApduCommand::SetDataObject,
            0x03 => ApduCommand::SetObjectProtected,
            0x0C => ApduCommand::GetRandom,
            0x14 => ApduCommand::EncryptSym,
            0x15 => ApduCommand::DecryptSym,
            0x1E => ApduCommand::EncryptAsym,
            0x1F => ApduCommand::DecryptAsym,
            0x30 => ApduCommand::CalcHash,
            0x31 => ApduCommand::CalcSign,
            0x32 => ApduCommand::VerifySign,
            0x33 => ApduCommand::CalcSsec,
            0x34 => ApduCommand::DeriveKey,
            0x38 => ApduCommand::GenKeyPair,
            0x39 => ApduCommand::GenSymKey,
            0x70 => ApduCommand::OpenApplication,
            0x71 => ApduCommand::CloseApplication,
            _ => return None,
        };
        Some(cmd)
    }

    pub fn name(self) -> &'static str {
        match self {
            ApduCommand::GetDataObject => "GetDataObject",
            ApduCommand::SetDataObject => "SetDataObject",
            ApduCommand::SetObjectProtected => "SetObjectProtected",
            ApduCommand::GetRandom => "GetRandom",
            ApduCommand::EncryptSym => "EncryptSym",
            ApduCommand::DecryptSym => "DecryptSym",
            ApduCommand::EncryptAsym => "EncryptAsym",
            ApduCommand::DecryptAsym => "DecryptAsym",
            ApduCommand::CalcHash => "CalcHash",
            ApduCommand::CalcSign => "CalcSign",
            ApduCommand::VerifySign => "VerifySign",
            ApduCommand::CalcSsec => "CalcSsec",
            ApduCommand::DeriveKey => "DeriveKey",
            ApduCommand::GenKeyPair => "GenKeyPair",
            ApduCommand::GenSymKey => "GenSymKey",
            ApduCommand::OpenApplication => "OpenApplication",
            ApduCommand::CloseApplication => "CloseApplication",
        }
    }
}

/// Request header: `[cmd][param][len:2 BE]`
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ApduHeader {
    pub cmd: u8,
    pub param: u8,
    pub len: U16,
}

impl ApduHeader {
    pub fn new(cmd: u8, param: u8, len: u16) -> Self {
        Self {
            cmd,
            param,
            len: U16::new(len),
        }
    }
}

/// Response header: `[sta][undefined][len:2 BE]`
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ResponseHeader {
    pub status: u8,
    pub reserved: u8,
    pub len: U16,
}

impl ResponseHeader {
    pub fn new(status: u8, len: u16) -> Self {
        Self {
            status,
            reserved: 0,
            len: U16::new(len),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == APDU_SUCCESS
    }
}

/// Session OID for pool index `index`
pub fn session_oid(index: usize) -> Oid {
    SESSION_OID_BASE | (index as Oid & 0x0F)
}

/// Pool index of a session OID, if it is one
pub fn session_index(oid: Oid) -> Option<usize> {
    if oid & 0xFFF0 == SESSION_OID_BASE {
        Some((oid & 0x0F) as usize)
    } else {
        None
    }
}

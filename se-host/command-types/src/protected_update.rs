// Licensed under the Apache-2.0 license

//! Protected Update Commands
//!
//! A protected update streams a signed manifest followed by encrypted
//! fragments. The whole sequence runs under the strict lock.

/// Update stage, encoded in the low nibble of the TLV tag
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Start = 0x00,
    Final = 0x01,
    Continue = 0x02,
}

impl UpdateStage {
    pub fn tag(self) -> u8 {
        PROTECTED_UPDATE_TAG | self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        if tag & 0xF0 != PROTECTED_UPDATE_TAG {
            return None;
        }
        match tag & 0x0F {
            0x00 => Some(UpdateStage::Start),
            0x01 => Some(UpdateStage::Final),
            0x02 => Some(UpdateStage::Continue),
            _ => None,
        }
    }
}

pub const PROTECTED_UPDATE_TAG: u8 = 0x30;

/// SetObjectProtected param: manifest format version
pub const MANIFEST_VERSION_1: u8 = 0x01;

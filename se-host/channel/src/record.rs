// Licensed under the Apache-2.0 license

//! Record framing shared by both ends of the channel
//!
//! Every frame starts with the SCTR byte:
//!
//! ```text
//!  7   6   5   4   3   2   1   0
//! +---+-------+-----------+-------+
//! | 0 | proto |  message  | prot  |
//! +---+-------+-----------+-------+
//! ```

use crate::crypto::NONCE_SIZE;
use crate::keys::NONCE_HALF_SIZE;

pub const PROTOCOL_HANDSHAKE: u8 = 0x00;
pub const PROTOCOL_RECORD: u8 = 0x20;
pub const PROTOCOL_ALERT: u8 = 0x40;
pub const PROTOCOL_MANAGE_CONTEXT: u8 = 0x60;
pub const PROTOCOL_MASK: u8 = 0x60;

pub const MESSAGE_HELLO: u8 = 0x00;
pub const MESSAGE_FINISHED: u8 = 0x08;

pub const ALERT_FATAL: u8 = 0x00;
pub const ALERT_INTEGRITY_VIOLATED: u8 = 0x04;

pub const CONTEXT_SAVE: u8 = 0x60;
pub const CONTEXT_SAVED: u8 = 0x64;
pub const CONTEXT_RESTORE: u8 = 0x68;
pub const CONTEXT_RESTORED: u8 = 0x6C;

/// Masks the protection bits out of an SCTR
pub const SCTR_MESSAGE_MASK: u8 = 0xFC;
pub const PROTECTION_MASK: u8 = 0x03;

pub const SCTR_SIZE: usize = 1;
pub const SEQ_SIZE: usize = 4;
/// SCTR plus sequence number
pub const RECORD_HEADER_SIZE: usize = SCTR_SIZE + SEQ_SIZE;
pub const TAG_SIZE: usize = crate::crypto::TAG_SIZE;
pub const RANDOM_SIZE: usize = 32;
pub const AAD_SIZE: usize = 8;

pub const CLIENT_HELLO_SIZE: usize = 2;
/// `[sctr][version][random][seq]`
pub const SERVER_HELLO_SIZE: usize = 2 + RANDOM_SIZE + SEQ_SIZE;
/// `[sctr][seq][enc(random || seq)][tag]`
pub const FINISHED_SIZE: usize = RECORD_HEADER_SIZE + RANDOM_SIZE + SEQ_SIZE + TAG_SIZE;
pub const RESTORE_SIZE: usize = SCTR_SIZE + SEQ_SIZE;

/// Bytes a protected record adds around its payload
pub const RECORD_OVERHEAD: usize = RECORD_HEADER_SIZE + TAG_SIZE;

/// Which directions of an exchange are sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Protection {
    #[default]
    None = 0,
    /// Command protected
    Master = 1,
    /// Response protected
    Slave = 2,
    Full = 3,
}

impl Protection {
    pub fn from_bits(bits: u8) -> Self {
        match bits & PROTECTION_MASK {
            1 => Protection::Master,
            2 => Protection::Slave,
            3 => Protection::Full,
            _ => Protection::None,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn protects_command(self) -> bool {
        matches!(self, Protection::Master | Protection::Full)
    }

    pub fn protects_response(self) -> bool {
        matches!(self, Protection::Slave | Protection::Full)
    }

    pub fn is_protected(self) -> bool {
        self != Protection::None
    }
}

/// Protection requested for one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtectionLevel {
    pub protection: Protection,
    /// Force a fresh handshake even when a session exists
    pub re_establish: bool,
}

impl ProtectionLevel {
    pub const RE_ESTABLISH: u8 = 0x04;

    pub const NONE: ProtectionLevel = ProtectionLevel {
        protection: Protection::None,
        re_establish: false,
    };

    pub fn new(protection: Protection) -> Self {
        Self {
            protection,
            re_establish: false,
        }
    }

    pub fn with_re_establish(mut self, re_establish: bool) -> Self {
        self.re_establish = re_establish;
        self
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            protection: Protection::from_bits(bits),
            re_establish: bits & Self::RE_ESTABLISH != 0,
        }
    }

    pub fn bits(&self) -> u8 {
        let flag = if self.re_establish {
            Self::RE_ESTABLISH
        } else {
            0
        };
        self.protection.bits() | flag
    }
}

/// Build an SCTR byte
pub fn sctr(protocol: u8, message: u8, protection: Protection) -> u8 {
    protocol | message | protection.bits()
}

pub fn is_alert(frame: &[u8]) -> bool {
    frame.len() == SCTR_SIZE && frame[0] & PROTOCOL_MASK == PROTOCOL_ALERT
}

/// Associated data authenticated with every sealed record
pub fn associated_data(sctr: u8, seq: u32, version: u8, payload_len: usize) -> [u8; AAD_SIZE] {
    let mut aad = [0u8; AAD_SIZE];
    aad[0] = sctr;
    aad[1..5].copy_from_slice(&seq.to_be_bytes());
    aad[5] = version;
    aad[6..8].copy_from_slice(&(payload_len as u16).to_be_bytes());
    aad
}

/// Direction nonce half followed by the record sequence number
pub fn nonce(half: [u8; NONCE_HALF_SIZE], seq: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_HALF_SIZE].copy_from_slice(&half);
    nonce[NONCE_HALF_SIZE..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

/// Sequence number following the SCTR of a protected frame
pub fn read_seq(frame: &[u8]) -> Option<u32> {
    let bytes = frame.get(SCTR_SIZE..RECORD_HEADER_SIZE)?;
    let mut seq = [0u8; SEQ_SIZE];
    seq.copy_from_slice(bytes);
    Some(u32::from_be_bytes(seq))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_directions() {
        assert!(!Protection::None.protects_command());
        assert!(Protection::Master.protects_command());
        assert!(!Protection::Master.protects_response());
        assert!(Protection::Slave.protects_response());
        assert!(Protection::Full.protects_command() && Protection::Full.protects_response());
    }

    #[test]
    fn test_level_bits() {
        let level = ProtectionLevel::from_bits(0x07);
        assert_eq!(level.protection, Protection::Full);
        assert!(level.re_establish);
        assert_eq!(level.bits(), 0x07);
        assert_eq!(ProtectionLevel::new(Protection::Slave).bits(), 0x02);
    }

    #[test]
    fn test_sctr_values() {
        assert_eq!(sctr(PROTOCOL_RECORD, 0, Protection::Full), 0x23);
        assert_eq!(sctr(PROTOCOL_HANDSHAKE, MESSAGE_FINISHED, Protection::None), 0x08);
        assert_eq!(
            sctr(PROTOCOL_ALERT, ALERT_INTEGRITY_VIOLATED, Protection::None),
            0x44
        );
        assert!(is_alert(&[0x44]));
        assert!(!is_alert(&[0x44, 0x00]));
        assert!(!is_alert(&[0x64]));
    }

    #[test]
    fn test_aad_and_nonce_layout() {
        let aad = associated_data(0x23, 0x0102_0304, 0x01, 0x0123);
        assert_eq!(aad, [0x23, 0x01, 0x02, 0x03, 0x04, 0x01, 0x01, 0x23]);

        let n = nonce([0xA0, 0xA1, 0xA2, 0xA3], 7);
        assert_eq!(n, [0xA0, 0xA1, 0xA2, 0xA3, 0, 0, 0, 7]);
    }

    #[test]
    fn test_frame_sizes() {
        assert_eq!(SERVER_HELLO_SIZE, 38);
        assert_eq!(FINISHED_SIZE, 49);
        assert_eq!(read_seq(&[0x20, 0, 0, 1, 0]), Some(0x100));
        assert_eq!(read_seq(&[0x20, 0]), None);
    }
}

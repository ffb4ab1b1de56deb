// Licensed under the Apache-2.0 license

//! Session key material
//!
//! One PRF expansion yields both directions' keys and nonce halves:
//!
//! ```text
//! 0x00  master -> slave key   (16)
//! 0x10  slave -> master key   (16)
//! 0x20  master nonce half     (4)
//! 0x24  slave nonce half      (4)
//! ```

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{ChannelCrypto, KEY_SIZE};
use crate::ChannelResult;

pub const SESSION_KEYS_SIZE: usize = 40;
pub const NONCE_HALF_SIZE: usize = 4;
pub const SHARED_SECRET_SIZE: usize = 64;

/// Label fed to the PRF when deriving session keys
pub const KEY_DERIVATION_LABEL: &[u8] = b"Platform Binding";

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    master_key: [u8; KEY_SIZE],
    slave_key: [u8; KEY_SIZE],
    master_nonce: [u8; NONCE_HALF_SIZE],
    slave_nonce: [u8; NONCE_HALF_SIZE],
}

impl core::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

impl SessionKeys {
    pub fn from_bytes(bytes: &[u8; SESSION_KEYS_SIZE]) -> Self {
        let mut keys = Self {
            master_key: [0; KEY_SIZE],
            slave_key: [0; KEY_SIZE],
            master_nonce: [0; NONCE_HALF_SIZE],
            slave_nonce: [0; NONCE_HALF_SIZE],
        };
        let (master_key, rest) = bytes.split_at(KEY_SIZE);
        let (slave_key, rest) = rest.split_at(KEY_SIZE);
        let (master_nonce, slave_nonce) = rest.split_at(NONCE_HALF_SIZE);
        keys.master_key.copy_from_slice(master_key);
        keys.slave_key.copy_from_slice(slave_key);
        keys.master_nonce.copy_from_slice(master_nonce);
        keys.slave_nonce.copy_from_slice(slave_nonce);
        keys
    }

    /// Serialize back into the derivation layout
    pub fn to_bytes(&self) -> [u8; SESSION_KEYS_SIZE] {
        let mut bytes = [0u8; SESSION_KEYS_SIZE];
        bytes[..16].copy_from_slice(&self.master_key);
        bytes[16..32].copy_from_slice(&self.slave_key);
        bytes[32..36].copy_from_slice(&self.master_nonce);
        bytes[36..].copy_from_slice(&self.slave_nonce);
        bytes
    }

    /// Key sealing host-to-device records
    pub fn master_key(&self) -> &[u8; KEY_SIZE] {
        &self.master_key
    }

    /// Key sealing device-to-host records
    pub fn slave_key(&self) -> &[u8; KEY_SIZE] {
        &self.slave_key
    }

    pub fn master_nonce(&self) -> [u8; NONCE_HALF_SIZE] {
        self.master_nonce
    }

    pub fn slave_nonce(&self) -> [u8; NONCE_HALF_SIZE] {
        self.slave_nonce
    }
}

/// Expand the pre-shared secret and the server random into session keys
pub fn derive_session_keys(
    crypto: &dyn ChannelCrypto,
    shared_secret: &[u8],
    random: &[u8],
) -> ChannelResult<SessionKeys> {
    let mut bytes = [0u8; SESSION_KEYS_SIZE];
    crypto.prf(shared_secret, KEY_DERIVATION_LABEL, random, &mut bytes)?;
    let keys = SessionKeys::from_bytes(&bytes);
    bytes.zeroize();
    Ok(keys)
}

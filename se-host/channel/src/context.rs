// Licensed under the Apache-2.0 license

//! Persisted session context

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};
use zeroize::Zeroize;

use crate::keys::{SessionKeys, SESSION_KEYS_SIZE};

/// Byte image of a hibernated session
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Clone, PartialEq, Eq)]
pub struct SavedContext {
    pub keys: [u8; SESSION_KEYS_SIZE],
    pub master_seq: U32,
    pub saved_slave_seq: U32,
    pub decryption_failures: u8,
    pub retransmits: u8,
    pub negotiated: u8,
    /// Non-zero when the image holds a restorable session
    pub stored: u8,
}

pub const SAVED_CONTEXT_SIZE: usize = core::mem::size_of::<SavedContext>();

impl Default for SavedContext {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

impl core::fmt::Debug for SavedContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SavedContext")
            .field("master_seq", &self.master_seq.get())
            .field("saved_slave_seq", &self.saved_slave_seq.get())
            .field("negotiated", &self.negotiated)
            .field("stored", &self.stored)
            .finish_non_exhaustive()
    }
}

impl Drop for SavedContext {
    fn drop(&mut self) {
        self.as_mut_bytes().zeroize();
    }
}

impl SavedContext {
    pub fn is_stored(&self) -> bool {
        self.stored != 0
    }

    pub fn session_keys(&self) -> SessionKeys {
        SessionKeys::from_bytes(&self.keys)
    }

    /// Parse a stored image; anything of the wrong size reads as empty
    pub fn from_slot(bytes: &[u8]) -> Self {
        Self::read_from_bytes(bytes).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.as_mut_bytes().zeroize();
    }
}

// Licensed under the Apache-2.0 license

//! Persistence collaborator
//!
//! Fixed-size slots addressed by a small integer that survive power loss.
//! [`SlotId::NOT_CONFIGURED`] is a valid slot value meaning persistence is
//! disabled for that use; stores reject it with [`OsalError::NotConfigured`].

use crate::error::{OsalError, OsalResult};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Persistence slot identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u16);

impl SlotId {
    pub const NOT_CONFIGURED: SlotId = SlotId(0xFFFF);

    pub fn is_configured(&self) -> bool {
        *self != Self::NOT_CONFIGURED
    }
}

impl From<u16> for SlotId {
    fn from(id: u16) -> Self {
        SlotId(id)
    }
}

/// Maximum number of bytes a single slot holds
pub const MAX_SLOT_SIZE: usize = 512;

pub trait Datastore: Send {
    /// Read a slot into `buf`, returning the number of bytes copied
    ///
    /// A slot that was never written (or was erased) reads as zero bytes.
    fn read(&mut self, slot: SlotId, buf: &mut [u8]) -> OsalResult<usize>;

    /// Replace the contents of a slot
    fn write(&mut self, slot: SlotId, data: &[u8]) -> OsalResult<()>;

    /// Erase a slot so it reads as empty
    fn erase(&mut self, slot: SlotId) -> OsalResult<()> {
        self.write(slot, &[])
    }
}

fn check_slot(slot: SlotId, len: usize) -> OsalResult<()> {
    if !slot.is_configured() {
        return Err(OsalError::NotConfigured);
    }
    if len > MAX_SLOT_SIZE {
        return Err(OsalError::BufferTooSmall {
            required: len,
            available: MAX_SLOT_SIZE,
        });
    }
    Ok(())
}

fn copy_out(stored: &[u8], buf: &mut [u8]) -> OsalResult<usize> {
    if stored.len() > buf.len() {
        return Err(OsalError::BufferTooSmall {
            required: stored.len(),
            available: buf.len(),
        });
    }
    buf[..stored.len()].copy_from_slice(stored);
    Ok(stored.len())
}

/// Volatile store, useful for tests and for hosts without flash
#[derive(Debug, Clone, Default)]
pub struct MemoryDatastore {
    slots: HashMap<SlotId, Vec<u8>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a slot, e.g. with a pre-shared secret
    pub fn with_slot(mut self, slot: SlotId, data: &[u8]) -> Self {
        self.slots.insert(slot, data.to_vec());
        self
    }

    pub fn get(&self, slot: SlotId) -> Option<&[u8]> {
        self.slots.get(&slot).map(Vec::as_slice)
    }
}

impl Datastore for MemoryDatastore {
    fn read(&mut self, slot: SlotId, buf: &mut [u8]) -> OsalResult<usize> {
        check_slot(slot, 0)?;
        match self.slots.get(&slot) {
            Some(stored) => copy_out(stored, buf),
            None => Ok(0),
        }
    }

    fn write(&mut self, slot: SlotId, data: &[u8]) -> OsalResult<()> {
        check_slot(slot, data.len())?;
        self.slots.insert(slot, data.to_vec());
        Ok(())
    }
}

/// Store keeping one file per slot inside a directory
#[derive(Debug, Clone)]
pub struct FileDatastore {
    root: PathBuf,
}

impl FileDatastore {
    pub fn new<P: AsRef<Path>>(root: P) -> OsalResult<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    fn slot_path(&self, slot: SlotId) -> PathBuf {
        self.root.join(format!("slot-{:04x}.bin", slot.0))
    }
}

impl Datastore for FileDatastore {
    fn read(&mut self, slot: SlotId, buf: &mut [u8]) -> OsalResult<usize> {
        check_slot(slot, 0)?;
        match fs::read(self.slot_path(slot)) {
            Ok(stored) => copy_out(&stored, buf),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, slot: SlotId, data: &[u8]) -> OsalResult<()> {
        check_slot(slot, data.len())?;
        let path = self.slot_path(slot);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        log::trace!("Persisted {} bytes to slot {:#06x}", data.len(), slot.0);
        Ok(())
    }
}

// Licensed under the Apache-2.0 license

//! Data Object Commands

use crate::Oid;

/// GetDataObject param byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadKind {
    #[default]
    Data = 0x00,
    Metadata = 0x01,
}

/// SetDataObject param byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Write = 0x00,
    Metadata = 0x01,
    EraseAndWrite = 0x40,
}

/// Frame overhead of a read request: `[oid:2][offset:2][len:2]`
pub const READ_REQUEST_SIZE: usize = 6;

/// Frame overhead of a write request before the data: `[oid:2][offset:2]`
pub const WRITE_REQUEST_HEADER_SIZE: usize = 4;

pub const OID_COPROCESSOR_UID: Oid = 0xE0C2;
pub const OID_DEVICE_CERTIFICATE: Oid = 0xE0E0;
pub const OID_PLATFORM_BINDING_SECRET: Oid = 0xE140;
pub const OID_DATA_OBJECT_BASE: Oid = 0xF1D0;

// Licensed under the Apache-2.0 license

//! Application Commands
//!
//! Opening the application initializes (or restores) the device-side
//! application context. Closing it can hibernate that context, in which case
//! the device hands back a handle that must be presented on the next restore.

/// Identifier of the on-device application
pub const APPLICATION_ID: [u8; 16] = [
    0xD2, 0x76, 0x00, 0x00, 0x04, 0x47, 0x65, 0x6E, 0x41, 0x75, 0x74, 0x68, 0x41, 0x70, 0x70, 0x6C,
];

pub const CONTEXT_HANDLE_SIZE: usize = 8;

pub type ContextHandle = [u8; CONTEXT_HANDLE_SIZE];

/// Open application param byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Initialize a clean application context
    #[default]
    Initialize = 0x00,
    /// Restore a hibernated context using the stored handle
    Restore = 0x01,
}

/// Close application param byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseMode {
    #[default]
    Discard = 0x00,
    /// Hibernate the context and return a handle
    Hibernate = 0x01,
}

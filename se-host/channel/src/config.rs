// Licensed under the Apache-2.0 license

use se_host_osal::SlotId;

/// Protocol version using a pre-shared secret for key derivation
pub const PROTOCOL_VERSION_PRE_SHARED_SECRET: u8 = 0x01;

/// Counter value past which a handshake is forced before sending
pub const DEFAULT_SEQUENCE_THRESHOLD: u32 = 0xFFFF_FFF0;

pub const DEFAULT_MAX_RETRANSMITS: u8 = 3;

pub const DEFAULT_SHARED_SECRET_SLOT: SlotId = SlotId(0x0011);
pub const DEFAULT_CONTEXT_SLOT: SlotId = SlotId(0x0012);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub protocol_version: u8,
    /// Slot holding the 64-byte pre-shared secret
    pub shared_secret_slot: SlotId,
    /// Slot for the saved session; [`SlotId::NOT_CONFIGURED`] keeps it in memory
    pub context_slot: SlotId,
    /// Bound on both record retransmits and consecutive decryption failures
    pub max_retransmits: u8,
    pub sequence_threshold: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION_PRE_SHARED_SECRET,
            shared_secret_slot: DEFAULT_SHARED_SECRET_SLOT,
            context_slot: DEFAULT_CONTEXT_SLOT,
            max_retransmits: DEFAULT_MAX_RETRANSMITS,
            sequence_threshold: DEFAULT_SEQUENCE_THRESHOLD,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shared_secret_slot(mut self, slot: SlotId) -> Self {
        self.shared_secret_slot = slot;
        self
    }

    pub fn with_context_slot(mut self, slot: SlotId) -> Self {
        self.context_slot = slot;
        self
    }

    pub fn with_max_retransmits(mut self, max: u8) -> Self {
        self.max_retransmits = max;
        self
    }

    pub fn with_sequence_threshold(mut self, threshold: u32) -> Self {
        self.sequence_threshold = threshold;
        self
    }
}

// Licensed under the Apache-2.0 license

/// Counters kept across the lifetime of a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatistics {
    pub handshakes: u32,
    /// Handshakes forced by a counter nearing its threshold
    pub renegotiations: u32,
    pub records_sent: u32,
    pub records_received: u32,
    pub alerts_sent: u32,
    pub alerts_received: u32,
    pub retransmits: u32,
    pub decryption_failures: u32,
    pub contexts_saved: u32,
    pub contexts_restored: u32,
}

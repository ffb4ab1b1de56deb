// Licensed under the Apache-2.0 license

use se_host_channel::{ChannelConfig, RECORD_OVERHEAD};
use se_host_command_types::MAX_APDU_SIZE;
use se_host_osal::{Duration, SlotId};

/// Upper bound on instance registrations per device
pub const MAX_REGISTRATIONS: usize = 16;

/// Upper bound on the session pool; session OIDs carry a 4-bit index
pub const MAX_SESSIONS: usize = 16;

pub const DEFAULT_MAX_INSTANCES: usize = 6;
pub const DEFAULT_MAX_SESSIONS: usize = 4;
pub const DEFAULT_COMMS_BUFFER_SIZE: usize = 1600;
pub const DEFAULT_IDLE_POLL_MS: u64 = 1000;
pub const DEFAULT_RUNNING_MS: u64 = 50;
pub const DEFAULT_CONTEXT_HANDLE_SLOT: SlotId = SlotId(0x0013);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Size of the instance registration table
    pub max_instances: usize,
    pub max_sessions: usize,
    /// Shared transceive buffer, APDU plus secure channel overhead
    pub comms_buffer_size: usize,
    /// Scheduler re-arm interval when nothing can be dispatched
    pub idle_poll_ms: u64,
    /// Delay before a dispatched or chaining instance runs
    pub running_ms: u64,
    /// Where the application context handle is kept across hibernation
    pub context_handle_slot: SlotId,
    pub channel: ChannelConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_instances: DEFAULT_MAX_INSTANCES,
            max_sessions: DEFAULT_MAX_SESSIONS,
            comms_buffer_size: DEFAULT_COMMS_BUFFER_SIZE,
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
            running_ms: DEFAULT_RUNNING_MS,
            context_handle_slot: DEFAULT_CONTEXT_HANDLE_SLOT,
            channel: ChannelConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = max;
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn with_comms_buffer_size(mut self, size: usize) -> Self {
        self.comms_buffer_size = size;
        self
    }

    pub fn with_timing(mut self, idle_poll_ms: u64, running_ms: u64) -> Self {
        self.idle_poll_ms = idle_poll_ms;
        self.running_ms = running_ms;
        self
    }

    pub fn with_context_handle_slot(mut self, slot: SlotId) -> Self {
        self.context_handle_slot = slot;
        self
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn running(&self) -> Duration {
        Duration::from_millis(self.running_ms)
    }

    /// Largest APDU a handler may frame
    pub fn max_apdu(&self) -> usize {
        self.comms_buffer_size
            .saturating_sub(RECORD_OVERHEAD)
            .min(MAX_APDU_SIZE)
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_instances == 0 || self.max_instances > MAX_REGISTRATIONS {
            return Err("max_instances out of range");
        }
        if self.max_sessions == 0 || self.max_sessions > MAX_SESSIONS {
            return Err("max_sessions out of range");
        }
        if self.max_apdu() <= se_host_command_types::APDU_HEADER_SIZE {
            return Err("comms buffer too small");
        }
        Ok(())
    }
}

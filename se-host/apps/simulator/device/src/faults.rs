// Licensed under the Apache-2.0 license

//! Scripted faults
//!
//! Counters are 1-based and count from device start: `corrupt_response = 3`
//! flips a ciphertext bit of the third sealed response, whatever happened in
//! between.

use se_host_sim_config::FaultConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Sealed response whose first ciphertext byte is flipped
    pub corrupt_response: Option<u32>,
    /// Command failed with a device error code instead of being executed
    pub device_error: Option<(u32, u8)>,
    /// Command executed without its response reaching the host
    pub drop_response: Option<u32>,
    /// Sealed response sent this many sequence numbers ahead of the next one
    pub sequence_jump: Option<(u32, u32)>,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_config(config: &FaultConfig) -> Self {
        Self {
            corrupt_response: config.corrupt_response,
            device_error: config.device_error(),
            drop_response: config.drop_response,
            sequence_jump: None,
        }
    }

    pub fn corrupt_response(mut self, index: u32) -> Self {
        self.corrupt_response = Some(index);
        self
    }

    pub fn device_error(mut self, command: u32, code: u8) -> Self {
        self.device_error = Some((command, code));
        self
    }

    pub fn drop_response(mut self, command: u32) -> Self {
        self.drop_response = Some(command);
        self
    }

    pub fn sequence_jump(mut self, sealed_response: u32, skip: u32) -> Self {
        self.sequence_jump = Some((sealed_response, skip));
        self
    }

    pub(crate) fn corrupts(&self, sealed_response: u32) -> bool {
        self.corrupt_response == Some(sealed_response)
    }

    pub(crate) fn error_for(&self, command: u32) -> Option<u8> {
        match self.device_error {
            Some((index, code)) if index == command => Some(code),
            _ => None,
        }
    }

    pub(crate) fn drops(&self, command: u32) -> bool {
        self.drop_response == Some(command)
    }

    pub(crate) fn jump_for(&self, sealed_response: u32) -> Option<u32> {
        match self.sequence_jump {
            Some((index, skip)) if index == sealed_response => Some(skip),
            _ => None,
        }
    }
}

// Licensed under the Apache-2.0 license

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up by [`SimConfig::load_default`]
pub const CONFIG_FILE_NAME: &str = "sim-config.toml";

/// Length of the pre-shared secret binding host and device
pub const SHARED_SECRET_SIZE: usize = 64;

/// Shared configuration for the simulated secure element and its clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub engine: EngineTiming,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Simulated device parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Platform binding secret, hex encoded
    pub shared_secret: String,
    /// Seed for the device random number generator
    #[serde(default)]
    pub seed: u64,
    /// First sequence number offered in the server hello; random when unset
    #[serde(default)]
    pub initial_sequence: Option<u32>,
    #[serde(default)]
    pub faults: FaultConfig,
}

/// Faults injected by the simulated device; indices count from 1
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Flip a bit in this protected response
    pub corrupt_response: Option<u32>,
    /// Fail this command with `device_error_code`
    pub device_error_command: Option<u32>,
    pub device_error_code: Option<u8>,
    /// Swallow the response to this command
    pub drop_response: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub server_address: String,
    pub bind_address: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTiming {
    pub max_instances: usize,
    pub max_sessions: usize,
    pub comms_buffer_size: usize,
    pub idle_poll_ms: u64,
    pub running_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory of the file-backed store; in memory when unset
    pub directory: Option<String>,
    pub shared_secret_slot: u16,
    pub context_slot: u16,
    pub context_handle_slot: u16,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            max_instances: 6,
            max_sessions: 4,
            comms_buffer_size: 1600,
            idle_poll_ms: 1000,
            running_ms: 50,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: None,
            shared_secret_slot: 0x0011,
            context_slot: 0x0012,
            context_handle_slot: 0x0013,
        }
    }
}

impl DeviceConfig {
    /// Decode the platform binding secret
    pub fn shared_secret_bytes(&self) -> Result<Vec<u8>> {
        let secret = hex::decode(self.shared_secret.trim())
            .with_context(|| "Shared secret is not valid hex")?;
        if secret.len() != SHARED_SECRET_SIZE {
            bail!(
                "Shared secret must be {} bytes, found {}",
                SHARED_SECRET_SIZE,
                secret.len()
            );
        }
        Ok(secret)
    }
}

impl FaultConfig {
    /// Command index and error code of the injected device error
    pub fn device_error(&self) -> Option<(u32, u8)> {
        match (self.device_error_command, self.device_error_code) {
            (Some(command), Some(code)) => Some((command, code)),
            _ => None,
        }
    }
}

impl SimConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: SimConfig =
            toml::from_str(contents).with_context(|| "Failed to parse TOML configuration")?;
        config.device.shared_secret_bytes()?;
        Ok(config)
    }

    /// Load `sim-config.toml` from the current directory or one of its parents
    pub fn load_default() -> Result<Self> {
        let mut current_dir = std::env::current_dir()?;

        loop {
            let config_path = current_dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::from_file(config_path);
            }

            let simulator_config = current_dir
                .join("se-host")
                .join("apps")
                .join("simulator")
                .join(CONFIG_FILE_NAME);
            if simulator_config.exists() {
                return Self::from_file(simulator_config);
            }

            if let Some(parent) = current_dir.parent() {
                current_dir = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;

        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                shared_secret: hex::encode([0x6Bu8; SHARED_SECRET_SIZE]),
                seed: 0,
                initial_sequence: None,
                faults: FaultConfig::default(),
            },
            network: NetworkConfig {
                server_address: "127.0.0.1:62300".to_string(),
                bind_address: "127.0.0.1:62300".to_string(),
                timeout_ms: 2000,
            },
            engine: EngineTiming::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

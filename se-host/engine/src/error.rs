// Licensed under the Apache-2.0 license

use se_host_channel::ChannelError;
use se_host_command_types::{CommandError, DeviceError};
use se_host_osal::OsalError;
use se_host_transport::TransportError;
use thiserror::Error;

pub const STATUS_SUCCESS: u16 = 0x0000;
pub const STATUS_DEVICE_ERROR: u16 = 0x8000;

pub const STATUS_COMMS_ERROR: u16 = 0x0102;
pub const STATUS_COMMS_INVALID_INPUT: u16 = 0x0103;
pub const STATUS_COMMS_MEMORY_INSUFFICIENT: u16 = 0x0104;
pub const STATUS_COMMS_FATAL: u16 = 0x0106;
pub const STATUS_COMMS_HANDSHAKE: u16 = 0x0107;
pub const STATUS_COMMS_SESSION: u16 = 0x0108;

pub const STATUS_CMD_ERROR: u16 = 0x0402;
pub const STATUS_CMD_INVALID_INPUT: u16 = 0x0403;
pub const STATUS_CMD_MEMORY_INSUFFICIENT: u16 = 0x0404;
pub const STATUS_CMD_INSTANCE_IN_USE: u16 = 0x0405;
pub const STATUS_CMD_SESSION_UNAVAILABLE: u16 = 0x0406;
pub const STATUS_CMD_TABLE_FULL: u16 = 0x0407;

/// Status delivered to callers, synchronously or through the completion callback
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("Instance busy")]
    InstanceBusy,

    #[error("Instance table full")]
    TableFull,

    #[error("No session held or available")]
    SessionUnavailable,

    /// Request does not fit the shared transceive buffer
    #[error("Memory insufficient")]
    MemoryInsufficient,

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Device error: {0}")]
    Device(DeviceError),

    #[error("Secure channel error: {0}")]
    Channel(ChannelError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] OsalError),

    #[error("Invalid response")]
    InvalidResponse,
}

impl EngineError {
    /// 16-bit status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Device(err) => STATUS_DEVICE_ERROR | err.code() as u16,
            EngineError::Transport(_) => STATUS_COMMS_ERROR,
            EngineError::Channel(err) => match err {
                ChannelError::Handshake(_) => STATUS_COMMS_HANDSHAKE,
                ChannelError::Session(_)
                | ChannelError::SequenceOutOfWindow { .. }
                | ChannelError::Integrity
                | ChannelError::ContextRejected(_) => STATUS_COMMS_SESSION,
                ChannelError::InvalidInput(_) => STATUS_COMMS_INVALID_INPUT,
                ChannelError::BufferTooSmall { .. } => STATUS_COMMS_MEMORY_INSUFFICIENT,
                ChannelError::Crypto(_) => STATUS_COMMS_FATAL,
                _ => STATUS_COMMS_ERROR,
            },
            EngineError::Persistence(_) | EngineError::InvalidResponse => STATUS_CMD_ERROR,
            EngineError::InvalidInput(_) => STATUS_CMD_INVALID_INPUT,
            EngineError::MemoryInsufficient => STATUS_CMD_MEMORY_INSUFFICIENT,
            EngineError::InstanceBusy => STATUS_CMD_INSTANCE_IN_USE,
            EngineError::SessionUnavailable => STATUS_CMD_SESSION_UNAVAILABLE,
            EngineError::TableFull => STATUS_CMD_TABLE_FULL,
        }
    }

    /// Whether the device itself rejected the command
    pub fn is_device_error(&self) -> bool {
        matches!(self, EngineError::Device(_))
    }
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        EngineError::Transport(err)
    }
}

impl From<ChannelError> for EngineError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Transport(err) => EngineError::Transport(err),
            ChannelError::Persistence(err) => EngineError::Persistence(err),
            other => EngineError::Channel(other),
        }
    }
}

impl From<CommandError> for EngineError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::InvalidRequest => EngineError::InvalidInput("invalid request parameters"),
            CommandError::InvalidResponse | CommandError::InvalidResponseLength => {
                EngineError::InvalidResponse
            }
            CommandError::BufferTooSmall => EngineError::MemoryInsufficient,
            CommandError::SessionRequired => EngineError::SessionUnavailable,
            CommandError::Custom(msg) => EngineError::InvalidInput(msg),
        }
    }
}

impl From<DeviceError> for EngineError {
    fn from(err: DeviceError) -> Self {
        EngineError::Device(err)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

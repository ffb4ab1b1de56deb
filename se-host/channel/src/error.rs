// Licensed under the Apache-2.0 license

use se_host_osal::OsalError;
use se_host_transport::TransportError;
use thiserror::Error;

/// Errors raised by the secure channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Secure channel not initialized")]
    NotInitialized,

    #[error("Secure channel busy")]
    Busy,

    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    /// Handshake did not complete; the session is not negotiated
    #[error("Handshake failed: {0}")]
    Handshake(&'static str),

    /// Fatal session failure; the next protected exchange renegotiates
    #[error("Session error: {0}")]
    Session(&'static str),

    /// Inbound record rejected before decryption
    #[error("Sequence number {received:#010x} outside window after {saved:#010x}")]
    SequenceOutOfWindow { received: u32, saved: u32 },

    #[error("Record integrity check failed")]
    Integrity,

    #[error("Peer rejected context {0}")]
    ContextRejected(&'static str),

    #[error("Buffer too small: required {required}, available {available}")]
    BufferTooSmall { required: usize, available: usize },

    #[error("Crypto error: {0}")]
    Crypto(&'static str),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] OsalError),
}

impl ChannelError {
    /// Whether the error tears down the negotiated session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChannelError::Handshake(_)
                | ChannelError::Session(_)
                | ChannelError::SequenceOutOfWindow { .. }
                | ChannelError::Integrity
                | ChannelError::ContextRejected(_)
                | ChannelError::Crypto(_)
                | ChannelError::Transport(_)
        )
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;

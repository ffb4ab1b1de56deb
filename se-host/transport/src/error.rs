// Licensed under the Apache-2.0 license

//! Transport error types

use core::fmt;
use se_host_osal::OsalError;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the link failed
    OpenFailed(Option<&'static str>),

    /// Send operation failed
    SendFailed(Option<&'static str>),

    /// Receive operation failed
    ReceiveFailed(Option<&'static str>),

    /// No response within the transport timeout
    Timeout,

    /// Transport used while closed
    Closed,

    /// Configuration error
    ConfigurationError(&'static str),

    /// I/O operation failed
    IoError(&'static str),

    /// Message too large
    MessageTooLarge(&'static str),

    /// OSAL error
    OsalError(OsalError),

    /// Custom transport error
    Custom(&'static str),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::OpenFailed(msg) => {
                write!(f, "Open failed")?;
                if let Some(msg) = msg {
                    write!(f, ": {}", msg)?;
                }
                Ok(())
            }
            TransportError::SendFailed(msg) => {
                write!(f, "Send failed")?;
                if let Some(msg) = msg {
                    write!(f, ": {}", msg)?;
                }
                Ok(())
            }
            TransportError::ReceiveFailed(msg) => {
                write!(f, "Receive failed")?;
                if let Some(msg) = msg {
                    write!(f, ": {}", msg)?;
                }
                Ok(())
            }
            TransportError::Timeout => write!(f, "Operation timeout"),
            TransportError::Closed => write!(f, "Transport closed"),
            TransportError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            TransportError::IoError(msg) => write!(f, "I/O error: {}", msg),
            TransportError::MessageTooLarge(msg) => write!(f, "Message too large: {}", msg),
            TransportError::OsalError(err) => write!(f, "OSAL error: {}", err),
            TransportError::Custom(msg) => write!(f, "Custom error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<OsalError> for TransportError {
    fn from(err: OsalError) -> Self {
        TransportError::OsalError(err)
    }
}

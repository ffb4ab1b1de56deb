// Licensed under the Apache-2.0 license

//! Error types for OSAL
use core::fmt;

pub type OsalResult<T> = Result<T, OsalError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsalError {
    /// Invalid parameter
    InvalidParameter,
    /// Resource not available
    ResourceUnavailable,
    /// Persistence slot has no backing storage configured
    NotConfigured,
    /// Resource not found
    NotFound,
    /// Caller buffer cannot hold the stored value
    BufferTooSmall { required: usize, available: usize },
    /// IO error
    Io(IoErrorKind),
    /// Other error
    Other(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    InvalidInput,
    InvalidData,
    TimedOut,
    WriteZero,
    Interrupted,
    UnexpectedEof,
    Other,
}

impl fmt::Display for OsalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsalError::InvalidParameter => write!(f, "Invalid parameter"),
            OsalError::ResourceUnavailable => write!(f, "Resource unavailable"),
            OsalError::NotConfigured => write!(f, "Persistence slot not configured"),
            OsalError::NotFound => write!(f, "Resource not found"),
            OsalError::BufferTooSmall {
                required,
                available,
            } => write!(
                f,
                "Buffer too small: required {} bytes, available {}",
                required, available
            ),
            OsalError::Io(kind) => write!(f, "IO error: {:?}", kind),
            OsalError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for OsalError {}

impl From<std::io::Error> for OsalError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => IoErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => IoErrorKind::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => IoErrorKind::AlreadyExists,
            std::io::ErrorKind::InvalidInput => IoErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => IoErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => IoErrorKind::TimedOut,
            std::io::ErrorKind::WriteZero => IoErrorKind::WriteZero,
            std::io::ErrorKind::Interrupted => IoErrorKind::Interrupted,
            std::io::ErrorKind::UnexpectedEof => IoErrorKind::UnexpectedEof,
            _ => IoErrorKind::Other,
        };
        OsalError::Io(kind)
    }
}

// Licensed under the Apache-2.0 license

//! Command Error Types
//!
//! Host-side framing errors and the cause codes the device reports through
//! its last-error register.

/// Command processing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Parameters cannot be framed into a valid request
    InvalidRequest,

    /// Response does not match the expected framing
    InvalidResponse,

    /// Response data too short
    InvalidResponseLength,

    /// Request would not fit into the shared transceive buffer
    BufferTooSmall,

    /// Operation requires a session but the instance holds none
    SessionRequired,

    /// Custom error message (static string only)
    Custom(&'static str),
}

impl core::fmt::Display for CommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CommandError::InvalidRequest => write!(f, "Invalid request"),
            CommandError::InvalidResponse => write!(f, "Invalid response"),
            CommandError::InvalidResponseLength => write!(f, "Invalid response length"),
            CommandError::BufferTooSmall => write!(f, "Buffer too small"),
            CommandError::SessionRequired => write!(f, "Session required"),
            CommandError::Custom(msg) => write!(f, "Command error: {}", msg),
        }
    }
}

/// Result type for command operations
pub type CommandResult<T> = Result<T, CommandError>;

/// Cause code read from the device last-error register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceError {
    InvalidOid,
    InvalidPassword,
    InvalidParamField,
    InvalidLengthField,
    InvalidDataField,
    InternalProcess,
    AccessConditionNotSatisfied,
    DataObjectBoundaryExceeded,
    MetadataTruncation,
    InvalidCommandField,
    CommandOutOfSequence,
    CommandNotAvailable,
    InsufficientBuffer,
    CounterThresholdExceeded,
    InvalidManifest,
    InvalidPayloadVersion,
    InvalidHandshakeMessage,
    VersionMismatch,
    UnsupportedCipherSuite,
    UnsupportedExtension,
    InvalidTrustAnchor,
    TrustAnchorExpired,
    UnsupportedTrustAnchor,
    InvalidCertificateFormat,
    UnsupportedCertificate,
    CertificateExpired,
    SignatureVerificationFailure,
    IntegrityValidationFailure,
    DecryptionFailure,
    AuthorizationFailure,
    Unknown(u8),
}

impl DeviceError {
    pub const OUT_OF_BOUNDARY: u8 = 0x08;

    pub fn code(&self) -> u8 {
        match self {
            DeviceError::InvalidOid => 0x01,
            DeviceError::InvalidPassword => 0x02,
            DeviceError::InvalidParamField => 0x03,
            DeviceError::InvalidLengthField => 0x04,
            DeviceError::InvalidDataField => 0x05,
            DeviceError::InternalProcess => 0x06,
            DeviceError::AccessConditionNotSatisfied => 0x07,
            DeviceError::DataObjectBoundaryExceeded => 0x08,
            DeviceError::MetadataTruncation => 0x09,
            DeviceError::InvalidCommandField => 0x0A,
            DeviceError::CommandOutOfSequence => 0x0B,
            DeviceError::CommandNotAvailable => 0x0C,
            DeviceError::InsufficientBuffer => 0x0D,
            DeviceError::CounterThresholdExceeded => 0x0E,
            DeviceError::InvalidManifest => 0x0F,
            DeviceError::InvalidPayloadVersion => 0x10,
            DeviceError::InvalidHandshakeMessage => 0x21,
            DeviceError::VersionMismatch => 0x22,
            DeviceError::UnsupportedCipherSuite => 0x23,
            DeviceError::UnsupportedExtension => 0x24,
            DeviceError::InvalidTrustAnchor => 0x26,
            DeviceError::TrustAnchorExpired => 0x27,
            DeviceError::UnsupportedTrustAnchor => 0x28,
            DeviceError::InvalidCertificateFormat => 0x29,
            DeviceError::UnsupportedCertificate => 0x2A,
            DeviceError::CertificateExpired => 0x2B,
            DeviceError::SignatureVerificationFailure => 0x2C,
            DeviceError::IntegrityValidationFailure => 0x2D,
            DeviceError::DecryptionFailure => 0x2E,
            DeviceError::AuthorizationFailure => 0x2F,
            DeviceError::Unknown(code) => *code,
        }
    }
}

impl From<u8> for DeviceError {
    fn from(code: u8) -> Self {
        match code {
            0x01 => DeviceError::InvalidOid,
            0x02 => DeviceError::InvalidPassword,
            0x03 => DeviceError::InvalidParamField,
            0x04 => DeviceError::InvalidLengthField,
            0x05 => DeviceError::InvalidDataField,
            0x06 => DeviceError::InternalProcess,
            0x07 => DeviceError::AccessConditionNotSatisfied,
            0x08 => DeviceError::DataObjectBoundaryExceeded,
            0x09 => DeviceError::MetadataTruncation,
            0x0A => DeviceError::InvalidCommandField,
            0x0B => DeviceError::CommandOutOfSequence,
            0x0C => DeviceError::CommandNotAvailable,
            0x0D => DeviceError::InsufficientBuffer,
            0x0E => DeviceError::CounterThresholdExceeded,
            0x0F => DeviceError::InvalidManifest,
            0x10 => DeviceError::InvalidPayloadVersion,
            0x21 => DeviceError::InvalidHandshakeMessage,
            0x22 => DeviceError::VersionMismatch,
            0x23 => DeviceError::UnsupportedCipherSuite,
            0x24 => DeviceError::UnsupportedExtension,
            0x26 => DeviceError::InvalidTrustAnchor,
            0x27 => DeviceError::TrustAnchorExpired,
            0x28 => DeviceError::UnsupportedTrustAnchor,
            0x29 => DeviceError::InvalidCertificateFormat,
            0x2A => DeviceError::UnsupportedCertificate,
            0x2B => DeviceError::CertificateExpired,
            0x2C => DeviceError::SignatureVerificationFailure,
            0x2D => DeviceError::IntegrityValidationFailure,
            0x2E => DeviceError::DecryptionFailure,
            0x2F => DeviceError::AuthorizationFailure,
            other => DeviceError::Unknown(other),
        }
    }
}

impl core::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "device error {:#04x} ({:?})", self.code(), self)
    }
}

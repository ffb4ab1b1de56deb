// Licensed under the Apache-2.0 license

//! Secure channel between the host and the secure element
//!
//! Wraps every command/response pair in an authenticated, replay-protected
//! session:
//!
//! - a pre-shared-secret handshake deriving per-direction AES-CCM keys
//! - sequence-numbered records with an inbound acceptance window
//! - integrity alerts with bounded retransmission
//! - hibernation of the session to persistence and resumption after reset
//!
//! The crypto primitives sit behind [`ChannelCrypto`] and default to
//! [`SoftwareCrypto`].

pub mod channel;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod record;
pub mod statistics;

pub use channel::{ChannelState, SecureChannel};
pub use config::ChannelConfig;
pub use context::SavedContext;
pub use crypto::{ChannelCrypto, SoftwareCrypto};
pub use error::{ChannelError, ChannelResult};
pub use keys::SessionKeys;
pub use record::{Protection, ProtectionLevel, RECORD_OVERHEAD};
pub use statistics::ChannelStatistics;

// Licensed under the Apache-2.0 license

//! Secure-Element Transport Layer
//!
//! The link to the secure element is half-duplex with one request in flight.
//! A [`Transport`] exposes exactly that: a blocking `transceive` that sends
//! one frame and returns the length of the one response frame. Bus framing
//! and guard times belong to the implementation, timeouts surface as
//! [`TransportError::Timeout`].

pub mod error;

pub use error::{TransportError, TransportResult};

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_frame_size: usize,
    pub timeout_ms: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1600,
            timeout_ms: 1000,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Transport trait for device communication
pub trait Transport: Send {
    fn open(&mut self) -> TransportResult<()>;
    fn close(&mut self) -> TransportResult<()>;

    /// Send `tx` and receive one response frame into `rx`
    ///
    /// Returns the number of response bytes written to `rx`.
    fn transceive(&mut self, tx: &[u8], rx: &mut [u8]) -> TransportResult<usize>;

    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> TransportResult<()> {
        (**self).open()
    }

    fn close(&mut self) -> TransportResult<()> {
        (**self).close()
    }

    fn transceive(&mut self, tx: &[u8], rx: &mut [u8]) -> TransportResult<usize> {
        (**self).transceive(tx, rx)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Copy a response frame into the caller buffer
pub fn copy_response(frame: &[u8], rx: &mut [u8]) -> TransportResult<usize> {
    if frame.len() > rx.len() {
        log::error!(
            "Response of {} bytes exceeds receive buffer of {}",
            frame.len(),
            rx.len()
        );
        return Err(TransportError::MessageTooLarge("response exceeds receive buffer"));
    }
    rx[..frame.len()].copy_from_slice(frame);
    Ok(frame.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        open: bool,
    }

    impl Transport for Echo {
        fn open(&mut self) -> TransportResult<()> {
            self.open = true;
            Ok(())
        }

        fn close(&mut self) -> TransportResult<()> {
            self.open = false;
            Ok(())
        }

        fn transceive(&mut self, tx: &[u8], rx: &mut [u8]) -> TransportResult<usize> {
            if !self.open {
                return Err(TransportError::Closed);
            }
            copy_response(tx, rx)
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    #[test]
    fn test_boxed_transport_forwards() {
        let mut transport: Box<dyn Transport> = Box::new(Echo { open: false });
        let mut rx = [0u8; 4];
        assert!(matches!(
            transport.transceive(&[1], &mut rx),
            Err(TransportError::Closed)
        ));
        transport.open().unwrap();
        assert_eq!(transport.transceive(&[1, 2], &mut rx).unwrap(), 2);
        assert!(matches!(
            transport.transceive(&[0; 8], &mut rx),
            Err(TransportError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = TransportConfig::new()
            .with_timeout(250)
            .with_max_frame_size(64);
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.max_frame_size, 64);
    }
}

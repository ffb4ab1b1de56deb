// Licensed under the Apache-2.0 license

//! In-process transport to a [`SimDevice`]

use std::sync::Arc;

use log::trace;
use se_host_osal::Mutex;
use se_host_transport::{copy_response, Transport, TransportError, TransportResult};

use crate::SimDevice;

/// Transport calling straight into a shared simulated device
///
/// Clones talk to the same device, so a test can keep a handle for fault
/// injection and power cycles while an engine owns the transport.
#[derive(Clone)]
pub struct SimTransport {
    device: Arc<Mutex<SimDevice>>,
    open: bool,
}

impl SimTransport {
    pub fn new(device: Arc<Mutex<SimDevice>>) -> Self {
        Self {
            device,
            open: false,
        }
    }

    pub fn device(&self) -> Arc<Mutex<SimDevice>> {
        self.device.clone()
    }
}

impl Transport for SimTransport {
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
        trace!("Sim transport: {} bytes out", tx.len());
        let reply = self.device.lock()?.transceive(tx);
        match reply {
            Some(frame) => copy_response(&frame, rx),
            None => Err(TransportError::ReceiveFailed(Some("response dropped"))),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

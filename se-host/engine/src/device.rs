// Licensed under the Apache-2.0 license

//! Per-device resources shared by every instance

use log::{debug, trace, warn};
use se_host_channel::{ChannelStatistics, ProtectionLevel, SecureChannel};
use se_host_command_types::{ContextHandle, CONTEXT_HANDLE_SIZE};
use se_host_osal::{Datastore, SlotId};
use se_host_transport::Transport;
use zeroize::Zeroizing;

use crate::config::EngineConfig;
use crate::{EngineError, EngineResult};

/// The transport, persistence and secure channel of one secure element,
/// plus the single transceive buffer pair
pub struct DeviceContext {
    transport: Box<dyn Transport>,
    store: Box<dyn Datastore>,
    channel: SecureChannel,
    tx: Zeroizing<Vec<u8>>,
    rx: Zeroizing<Vec<u8>>,
    max_apdu: usize,
}

impl DeviceContext {
    pub fn new(config: &EngineConfig, transport: Box<dyn Transport>, store: Box<dyn Datastore>) -> Self {
        let mut channel = SecureChannel::new(config.channel);
        channel.init();
        Self {
            transport,
            store,
            channel,
            tx: Zeroizing::new(vec![0u8; config.comms_buffer_size]),
            rx: Zeroizing::new(vec![0u8; config.comms_buffer_size]),
            max_apdu: config.max_apdu(),
        }
    }

    /// Request buffer, limited to the largest APDU
    pub fn tx_mut(&mut self) -> &mut [u8] {
        &mut self.tx[..self.max_apdu]
    }

    /// Plaintext of the last response
    pub fn response(&self, len: usize) -> &[u8] {
        &self.rx[..len.min(self.rx.len())]
    }

    pub fn channel(&self) -> &SecureChannel {
        &self.channel
    }

    pub fn channel_statistics(&self) -> ChannelStatistics {
        self.channel.statistics()
    }

    pub fn request_restore(&mut self) {
        self.channel.request_restore();
    }

    /// Send the first `len` bytes of the request buffer and collect the response
    pub fn transceive(&mut self, level: ProtectionLevel, version: u8, len: usize) -> EngineResult<usize> {
        if !self.transport.is_open() {
            debug!("Opening transport");
            self.transport.open()?;
        }
        self.channel.set_protocol_version(version)?;
        trace!("Transceive {} bytes, protection {:?}", len, level.protection);
        let received = self.channel.transceive(
            &mut *self.transport,
            &mut *self.store,
            level,
            &self.tx[..len],
            &mut self.rx[..],
        )?;
        trace!("Received {} bytes", received);
        Ok(received)
    }

    /// Hibernate the secure channel session, if one is negotiated
    pub fn save_channel(&mut self) -> EngineResult<bool> {
        Ok(self.channel.save(&mut *self.transport, &mut *self.store)?)
    }

    pub fn load_context_handle(&mut self, slot: SlotId) -> EngineResult<ContextHandle> {
        if !slot.is_configured() {
            return Err(EngineError::InvalidInput("context handle slot not configured"));
        }
        let mut buf = Zeroizing::new([0u8; 2 * CONTEXT_HANDLE_SIZE]);
        let len = self.store.read(slot, &mut buf[..])?;
        let mut handle = [0u8; CONTEXT_HANDLE_SIZE];
        if len != CONTEXT_HANDLE_SIZE {
            return Err(EngineError::InvalidInput("no stored context handle"));
        }
        handle.copy_from_slice(&buf[..CONTEXT_HANDLE_SIZE]);
        if handle == [0u8; CONTEXT_HANDLE_SIZE] {
            return Err(EngineError::InvalidInput("no stored context handle"));
        }
        Ok(handle)
    }

    pub fn store_context_handle(&mut self, slot: SlotId, handle: &[u8]) -> EngineResult<()> {
        if handle.len() != CONTEXT_HANDLE_SIZE {
            return Err(EngineError::InvalidResponse);
        }
        Ok(self.store.write(slot, handle)?)
    }

    pub fn clear_context_handle(&mut self, slot: SlotId) -> EngineResult<()> {
        if slot.is_configured() {
            self.store.erase(slot)?;
        }
        Ok(())
    }

    /// Close the transport; the secure channel session is dropped
    pub fn close(&mut self) -> EngineResult<()> {
        self.channel.init();
        if self.transport.is_open() {
            if let Err(err) = self.transport.close() {
                warn!("Transport close failed: {}", err);
                return Err(err.into());
            }
        }
        Ok(())
    }
}

// Licensed under the Apache-2.0 license

//! Channel state machine
//!
//! ```text
//!            +------+   protected    +-------+   hello/finished   +-----------+
//! Uninit --> | Idle | ------------>  | Start | -----------------> | Handshake |
//!            +------+                +-------+                    +-----------+
//!               ^                      |  restore                       |
//!               |                      v                                v
//!               |              +---------------+                 +--------+
//!               +------------- | ManageContext |  -------------> |  TxRx  |
//!               |              +---------------+                 +--------+
//!               |                                                    |
//!               |          +-------+        +--------+               v
//!               +--------- | Error | <----- | Alert  | <-------- Verify
//!                          +-------+        +--------+
//! ```
//!
//! One call to [`SecureChannel::transceive`] walks the machine from `Idle`
//! back to `Idle`. Fatal errors clear the session so the next protected
//! exchange renegotiates.

use log::{debug, error, info, trace, warn};
use se_host_osal::Datastore;
use se_host_transport::Transport;
use zerocopy::IntoBytes;
use zeroize::Zeroizing;

use crate::config::{ChannelConfig, PROTOCOL_VERSION_PRE_SHARED_SECRET};
use crate::context::{SavedContext, SAVED_CONTEXT_SIZE};
use crate::crypto::{ChannelCrypto, SoftwareCrypto};
use crate::keys::{derive_session_keys, SessionKeys, SHARED_SECRET_SIZE};
use crate::record::*;
use crate::statistics::ChannelStatistics;
use crate::{ChannelError, ChannelResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninit,
    Idle,
    Start,
    Handshake,
    TxRx,
    Verify,
    Alert,
    Error,
    ManageContext,
}

/// Host end of the secure channel for one device
pub struct SecureChannel<C: ChannelCrypto = SoftwareCrypto> {
    config: ChannelConfig,
    crypto: C,
    state: ChannelState,
    keys: Option<SessionKeys>,
    /// Last sequence number used for an outbound record
    master_seq: u32,
    /// Last sequence number accepted from the device
    saved_slave_seq: u32,
    decryption_failures: u8,
    retransmits: u8,
    negotiated: bool,
    restore_requested: bool,
    /// Saved context when no persistence slot is configured
    memory_context: SavedContext,
    statistics: ChannelStatistics,
}

impl SecureChannel<SoftwareCrypto> {
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_crypto(config, SoftwareCrypto::new())
    }
}

impl<C: ChannelCrypto> SecureChannel<C> {
    pub fn with_crypto(config: ChannelConfig, crypto: C) -> Self {
        Self {
            config,
            crypto,
            state: ChannelState::Uninit,
            keys: None,
            master_seq: 0,
            saved_slave_seq: 0,
            decryption_failures: 0,
            retransmits: 0,
            negotiated: false,
            restore_requested: false,
            memory_context: SavedContext::default(),
            statistics: ChannelStatistics::default(),
        }
    }

    /// Move to `Idle` with no live session; a saved context is kept
    pub fn init(&mut self) {
        self.clear_session();
        self.state = ChannelState::Idle;
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    pub fn statistics(&self) -> ChannelStatistics {
        self.statistics
    }

    pub fn decryption_failures(&self) -> u8 {
        self.decryption_failures
    }

    pub fn protocol_version(&self) -> u8 {
        self.config.protocol_version
    }

    pub fn set_protocol_version(&mut self, version: u8) -> ChannelResult<()> {
        if version != PROTOCOL_VERSION_PRE_SHARED_SECRET {
            return Err(ChannelError::InvalidInput("unsupported protocol version"));
        }
        self.config.protocol_version = version;
        Ok(())
    }

    /// Resume from the saved context on the next protected exchange
    pub fn request_restore(&mut self) {
        self.restore_requested = true;
    }

    /// Exchange one request/response pair with the device
    ///
    /// Runs a handshake or a context restore first when the level asks for
    /// protection and no usable session exists. Returns the number of
    /// plaintext response bytes written to `response`.
    pub fn transceive(
        &mut self,
        io: &mut dyn Transport,
        store: &mut dyn Datastore,
        level: ProtectionLevel,
        request: &[u8],
        response: &mut [u8],
    ) -> ChannelResult<usize> {
        match self.state {
            ChannelState::Uninit => return Err(ChannelError::NotInitialized),
            ChannelState::Idle => {}
            _ => return Err(ChannelError::Busy),
        }
        if request.len() > u16::MAX as usize {
            return Err(ChannelError::InvalidInput("request too large"));
        }

        self.decryption_failures = 0;
        self.retransmits = 0;

        let result = self
            .start(io, store, level)
            .and_then(|_| self.exchange(io, level.protection, request, response));
        self.finish(result)
    }

    /// Hibernate the session
    ///
    /// Returns `false` without contacting the device when no session is
    /// negotiated.
    pub fn save(&mut self, io: &mut dyn Transport, store: &mut dyn Datastore) -> ChannelResult<bool> {
        match self.state {
            ChannelState::Uninit => return Err(ChannelError::NotInitialized),
            ChannelState::Idle => {}
            _ => return Err(ChannelError::Busy),
        }
        if !self.negotiated {
            return Ok(false);
        }
        let result = self.save_context(io, store).map(|_| true);
        self.finish(result)
    }

    fn finish<T>(&mut self, result: ChannelResult<T>) -> ChannelResult<T> {
        if let Err(err) = &result {
            self.enter(ChannelState::Error);
            if err.is_fatal() {
                error!("Secure channel session dropped: {}", err);
                self.clear_session();
            } else {
                warn!("Secure channel exchange failed: {}", err);
            }
        }
        self.enter(ChannelState::Idle);
        result
    }

    fn enter(&mut self, state: ChannelState) {
        if self.state != state {
            debug!("Secure channel {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn clear_session(&mut self) {
        self.keys = None;
        self.master_seq = 0;
        self.saved_slave_seq = 0;
        self.negotiated = false;
    }

    fn start(
        &mut self,
        io: &mut dyn Transport,
        store: &mut dyn Datastore,
        level: ProtectionLevel,
    ) -> ChannelResult<()> {
        self.enter(ChannelState::Start);
        if level.re_establish {
            self.restore_requested = false;
            return self.handshake(io, store);
        }
        if !level.protection.is_protected() {
            return Ok(());
        }
        if core::mem::take(&mut self.restore_requested) && self.restore_context(io, store)? {
            return Ok(());
        }
        if !self.negotiated {
            return self.handshake(io, store);
        }
        if self.counters_exhausted(level.protection) {
            warn!("Sequence counter reached threshold, renegotiating");
            self.statistics.renegotiations += 1;
            return self.handshake(io, store);
        }
        Ok(())
    }

    fn counters_exhausted(&self, protection: Protection) -> bool {
        let threshold = self.config.sequence_threshold;
        (protection.protects_response()
            && self.saved_slave_seq.saturating_add(1) > threshold)
            || (protection.protects_command() && self.master_seq.saturating_add(1) > threshold)
    }

    fn keys(&self) -> ChannelResult<&SessionKeys> {
        self.keys
            .as_ref()
            .ok_or(ChannelError::Session("no session keys"))
    }

    fn handshake(&mut self, io: &mut dyn Transport, store: &mut dyn Datastore) -> ChannelResult<()> {
        self.enter(ChannelState::Handshake);
        self.clear_session();
        self.wipe_saved_context(store)?;

        let mut secret = Zeroizing::new([0u8; SHARED_SECRET_SIZE]);
        let len = store
            .read(self.config.shared_secret_slot, &mut secret[..])
            .map_err(|_| ChannelError::Handshake("shared secret unavailable"))?;
        if len != SHARED_SECRET_SIZE {
            return Err(ChannelError::Handshake("shared secret unavailable"));
        }

        let version = self.config.protocol_version;
        let mut rx = Zeroizing::new([0u8; FINISHED_SIZE]);

        let hello = [sctr(PROTOCOL_HANDSHAKE, MESSAGE_HELLO, Protection::None), version];
        let len = io.transceive(&hello, &mut rx[..])?;
        if len == SCTR_SIZE {
            return Err(ChannelError::Handshake("peer rejected hello"));
        }
        if len != SERVER_HELLO_SIZE || rx[0] != hello[0] || rx[1] != version {
            return Err(ChannelError::Handshake("unexpected server hello"));
        }
        let mut random = Zeroizing::new([0u8; RANDOM_SIZE]);
        random.copy_from_slice(&rx[2..2 + RANDOM_SIZE]);
        let slave_seq = read_u32(&rx[2 + RANDOM_SIZE..SERVER_HELLO_SIZE]);

        let keys = derive_session_keys(&self.crypto, &secret[..], &random[..])?;

        let finished_sctr = sctr(PROTOCOL_HANDSHAKE, MESSAGE_FINISHED, Protection::None);
        let mut tx = Zeroizing::new([0u8; FINISHED_SIZE]);
        tx[0] = finished_sctr;
        tx[1..RECORD_HEADER_SIZE].copy_from_slice(&slave_seq.to_be_bytes());
        let body = RANDOM_SIZE + SEQ_SIZE;
        {
            let plain = &mut tx[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + body];
            plain[..RANDOM_SIZE].copy_from_slice(&random[..]);
            plain[RANDOM_SIZE..].copy_from_slice(&slave_seq.to_be_bytes());
        }
        let aad = associated_data(finished_sctr, slave_seq, version, body);
        let tag = self.crypto.seal(
            keys.master_key(),
            &nonce(keys.master_nonce(), slave_seq),
            &aad,
            &mut tx[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + body],
        )?;
        tx[RECORD_HEADER_SIZE + body..].copy_from_slice(&tag);

        let len = io.transceive(&tx[..], &mut rx[..])?;
        if len != FINISHED_SIZE || rx[0] != finished_sctr {
            return Err(ChannelError::Handshake("unexpected server finished"));
        }
        let master_seq = read_u32(&rx[SCTR_SIZE..RECORD_HEADER_SIZE]);
        let tag = read_tag(&rx[RECORD_HEADER_SIZE + body..FINISHED_SIZE]);
        let aad = associated_data(finished_sctr, master_seq, version, body);
        self.crypto
            .open(
                keys.slave_key(),
                &nonce(keys.slave_nonce(), master_seq),
                &aad,
                &mut rx[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + body],
                &tag,
            )
            .map_err(|_| ChannelError::Handshake("server finished failed authentication"))?;

        let echoed = &rx[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + body];
        if echoed[..RANDOM_SIZE] != random[..]
            || read_u32(&echoed[RANDOM_SIZE..]) != master_seq
        {
            return Err(ChannelError::Handshake("server finished mismatch"));
        }

        self.keys = Some(keys);
        self.master_seq = master_seq;
        self.saved_slave_seq = slave_seq;
        self.negotiated = true;
        self.statistics.handshakes += 1;
        info!("Secure channel negotiated");
        Ok(())
    }

    fn exchange(
        &mut self,
        io: &mut dyn Transport,
        protection: Protection,
        request: &[u8],
        response: &mut [u8],
    ) -> ChannelResult<usize> {
        let record_sctr = sctr(PROTOCOL_RECORD, 0, protection);
        let mut rx = Zeroizing::new(vec![0u8; response.len() + RECORD_OVERHEAD]);

        'send: loop {
            self.enter(ChannelState::TxRx);
            let tx = self.seal_record(record_sctr, protection, request)?;
            let mut len = io.transceive(&tx, &mut rx[..])?;
            self.statistics.records_sent += 1;
            trace!("Record out {} bytes, in {} bytes", tx.len(), len);

            loop {
                self.enter(ChannelState::Verify);
                if len == 0 {
                    return Err(ChannelError::Session("empty response record"));
                }
                let frame = &mut rx[..len];

                if is_alert(frame) {
                    self.enter(ChannelState::Alert);
                    self.statistics.alerts_received += 1;
                    let integrity = frame[0] == sctr(PROTOCOL_ALERT, ALERT_INTEGRITY_VIOLATED, Protection::None);
                    if integrity
                        && protection.protects_command()
                        && self.retransmits < self.config.max_retransmits
                    {
                        self.retransmits += 1;
                        self.statistics.retransmits += 1;
                        warn!("Device reported integrity failure, retransmitting");
                        continue 'send;
                    }
                    return Err(ChannelError::Session("alert from device"));
                }

                if frame[0] != record_sctr {
                    return Err(ChannelError::Session("unexpected response record"));
                }

                if !protection.protects_response() {
                    if len <= SCTR_SIZE {
                        return Err(ChannelError::Session("empty response record"));
                    }
                    self.statistics.records_received += 1;
                    return copy_payload(&frame[SCTR_SIZE..], response);
                }

                match self.open_record(frame) {
                    Ok(payload_len) => {
                        self.decryption_failures = 0;
                        self.statistics.records_received += 1;
                        return copy_payload(
                            &rx[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + payload_len],
                            response,
                        );
                    }
                    Err(ChannelError::Integrity) => {
                        if self.decryption_failures >= self.config.max_retransmits {
                            return Err(ChannelError::Integrity);
                        }
                        self.enter(ChannelState::Alert);
                        self.decryption_failures += 1;
                        self.statistics.decryption_failures += 1;
                        self.statistics.alerts_sent += 1;
                        warn!("Response failed authentication, sending alert");
                        let alert = [sctr(PROTOCOL_ALERT, ALERT_INTEGRITY_VIOLATED, Protection::None)];
                        len = io.transceive(&alert, &mut rx[..])?;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }

    fn seal_record(
        &mut self,
        record_sctr: u8,
        protection: Protection,
        request: &[u8],
    ) -> ChannelResult<Zeroizing<Vec<u8>>> {
        let mut tx = Zeroizing::new(Vec::with_capacity(request.len() + RECORD_OVERHEAD));
        tx.push(record_sctr);
        if !protection.protects_command() {
            tx.extend_from_slice(request);
            return Ok(tx);
        }

        let seq = self
            .master_seq
            .checked_add(1)
            .ok_or(ChannelError::Session("sequence number exhausted"))?;
        tx.extend_from_slice(&seq.to_be_bytes());
        tx.extend_from_slice(request);

        let keys = self.keys()?;
        let aad = associated_data(record_sctr, seq, self.config.protocol_version, request.len());
        let tag = self.crypto.seal(
            keys.master_key(),
            &nonce(keys.master_nonce(), seq),
            &aad,
            &mut tx[RECORD_HEADER_SIZE..],
        )?;
        tx.extend_from_slice(&tag);
        self.master_seq = seq;
        Ok(tx)
    }

    /// Check the window and decrypt in place, returning the payload length
    fn open_record(&mut self, frame: &mut [u8]) -> ChannelResult<usize> {
        if frame.len() < RECORD_OVERHEAD {
            return Err(ChannelError::Session("truncated response record"));
        }
        let seq = read_seq(frame).ok_or(ChannelError::Session("truncated response record"))?;
        let saved = self.saved_slave_seq;
        if seq <= saved || seq - saved > u32::from(self.config.max_retransmits) {
            return Err(ChannelError::SequenceOutOfWindow {
                received: seq,
                saved,
            });
        }
        self.saved_slave_seq = seq;

        let payload_len = frame.len() - RECORD_OVERHEAD;
        let (body, tag) = frame.split_at_mut(frame.len() - TAG_SIZE);
        let tag = read_tag(tag);
        let aad = associated_data(body[0], seq, self.config.protocol_version, payload_len);
        let keys = self.keys()?;
        self.crypto.open(
            keys.slave_key(),
            &nonce(keys.slave_nonce(), seq),
            &aad,
            &mut body[RECORD_HEADER_SIZE..],
            &tag,
        )?;
        Ok(payload_len)
    }

    fn save_context(&mut self, io: &mut dyn Transport, store: &mut dyn Datastore) -> ChannelResult<()> {
        self.enter(ChannelState::ManageContext);
        let mut rx = [0u8; RESTORE_SIZE];
        let len = io.transceive(&[CONTEXT_SAVE], &mut rx)?;
        if len != SCTR_SIZE || rx[0] & SCTR_MESSAGE_MASK != CONTEXT_SAVED {
            return Err(ChannelError::ContextRejected("save"));
        }

        let mut context = SavedContext::default();
        context.keys = self.keys()?.to_bytes();
        context.master_seq.set(self.master_seq);
        context.saved_slave_seq.set(self.saved_slave_seq);
        context.decryption_failures = self.decryption_failures;
        context.retransmits = self.retransmits;
        context.negotiated = u8::from(self.negotiated);
        context.stored = 1;

        if self.config.context_slot.is_configured() {
            store.write(self.config.context_slot, context.as_bytes())?;
        }
        self.memory_context = context;
        self.clear_session();
        self.statistics.contexts_saved += 1;
        info!("Secure channel context saved");
        Ok(())
    }

    fn load_saved_context(&mut self, store: &mut dyn Datastore) -> ChannelResult<SavedContext> {
        if !self.config.context_slot.is_configured() {
            return Ok(self.memory_context.clone());
        }
        let mut image = Zeroizing::new([0u8; SAVED_CONTEXT_SIZE]);
        let len = store.read(self.config.context_slot, &mut image[..])?;
        Ok(SavedContext::from_slot(&image[..len]))
    }

    fn wipe_saved_context(&mut self, store: &mut dyn Datastore) -> ChannelResult<()> {
        if !self.memory_context.is_stored() && !self.config.context_slot.is_configured() {
            return Ok(());
        }
        self.memory_context.clear();
        if self.config.context_slot.is_configured() {
            store.erase(self.config.context_slot)?;
        }
        Ok(())
    }

    /// Returns `false` when there was nothing to restore
    fn restore_context(&mut self, io: &mut dyn Transport, store: &mut dyn Datastore) -> ChannelResult<bool> {
        self.enter(ChannelState::ManageContext);
        let context = self.load_saved_context(store)?;
        if !context.is_stored() {
            debug!("No saved secure channel context");
            return Ok(false);
        }

        let mut tx = [0u8; RESTORE_SIZE];
        tx[0] = CONTEXT_RESTORE;
        tx[1..].copy_from_slice(&context.saved_slave_seq.get().to_be_bytes());
        // A context is only ever offered to the device once
        self.wipe_saved_context(store)?;

        let mut rx = [0u8; RESTORE_SIZE];
        let len = io.transceive(&tx, &mut rx)?;
        if len != RESTORE_SIZE || rx[0] & SCTR_MESSAGE_MASK != CONTEXT_RESTORED {
            return Err(ChannelError::ContextRejected("restore"));
        }

        self.keys = Some(context.session_keys());
        self.master_seq = context.master_seq.get();
        self.saved_slave_seq = context.saved_slave_seq.get();
        self.decryption_failures = context.decryption_failures;
        self.retransmits = context.retransmits;
        self.negotiated = context.negotiated != 0;
        self.statistics.contexts_restored += 1;
        info!("Secure channel context restored");
        Ok(true)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(word)
}

fn read_tag(bytes: &[u8]) -> [u8; TAG_SIZE] {
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&bytes[..TAG_SIZE]);
    tag
}

fn copy_payload(payload: &[u8], response: &mut [u8]) -> ChannelResult<usize> {
    if payload.len() > response.len() {
        return Err(ChannelError::BufferTooSmall {
            required: payload.len(),
            available: response.len(),
        });
    }
    response[..payload.len()].copy_from_slice(payload);
    Ok(payload.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use se_host_osal::{MemoryDatastore, SlotId};
    use se_host_transport::{TransportError, TransportResult};

    use crate::config::{DEFAULT_CONTEXT_SLOT, DEFAULT_SHARED_SECRET_SLOT};

    const SECRET: [u8; SHARED_SECRET_SIZE] = [0x6B; SHARED_SECRET_SIZE];
    const DEVICE_RANDOM: [u8; RANDOM_SIZE] = [0x5A; RANDOM_SIZE];
    const HELLO_SEQ: u32 = 0x10;
    const FINISHED_SEQ: u32 = 0x20;

    /// Device end of the channel, answering records with the reversed payload
    #[derive(Default)]
    struct Peer {
        crypto: SoftwareCrypto,
        keys: Option<SessionKeys>,
        slave_seq: u32,
        master_seq: u32,
        last_sctr: u8,
        last_response: Vec<u8>,
        saved: Option<(SessionKeys, u32, u32)>,
        /// Corrupt this many upcoming sealed responses
        corrupt: usize,
        /// Reject this many upcoming sealed commands with an integrity alert
        reject: usize,
        /// Skip ahead by this many sequence numbers on the next response
        seq_jump: u32,
        frames: Vec<u8>,
    }

    impl Peer {
        fn keys(&self) -> &SessionKeys {
            self.keys.as_ref().unwrap()
        }

        fn seal_response(&mut self) -> Vec<u8> {
            self.slave_seq += 1 + core::mem::take(&mut self.seq_jump);
            let seq = self.slave_seq;
            let mut out = vec![self.last_sctr];
            out.extend_from_slice(&seq.to_be_bytes());
            out.extend_from_slice(&self.last_response);
            let aad = associated_data(self.last_sctr, seq, 1, self.last_response.len());
            let keys = self.keys().clone();
            let tag = self
                .crypto
                .seal(keys.slave_key(), &nonce(keys.slave_nonce(), seq), &aad, &mut out[5..])
                .unwrap();
            out.extend_from_slice(&tag);
            if self.corrupt > 0 {
                self.corrupt -= 1;
                out[6] ^= 0x01;
            }
            out
        }

        fn handle(&mut self, tx: &[u8]) -> Vec<u8> {
            self.frames.push(tx[0]);
            match tx[0] {
                0x00 => {
                    let mut out = vec![0x00, tx[1]];
                    out.extend_from_slice(&DEVICE_RANDOM);
                    out.extend_from_slice(&HELLO_SEQ.to_be_bytes());
                    self.slave_seq = HELLO_SEQ;
                    out
                }
                0x08 => {
                    let keys = derive_session_keys(&self.crypto, &SECRET, &DEVICE_RANDOM).unwrap();
                    let mut body = tx[5..41].to_vec();
                    let aad = associated_data(0x08, HELLO_SEQ, 1, 36);
                    let tag = read_tag(&tx[41..]);
                    self.crypto
                        .open(keys.master_key(), &nonce(keys.master_nonce(), HELLO_SEQ), &aad, &mut body, &tag)
                        .unwrap();
                    assert_eq!(&body[..32], &DEVICE_RANDOM);

                    let mut out = vec![0x08];
                    out.extend_from_slice(&FINISHED_SEQ.to_be_bytes());
                    out.extend_from_slice(&DEVICE_RANDOM);
                    out.extend_from_slice(&FINISHED_SEQ.to_be_bytes());
                    let aad = associated_data(0x08, FINISHED_SEQ, 1, 36);
                    let tag = self
                        .crypto
                        .seal(keys.slave_key(), &nonce(keys.slave_nonce(), FINISHED_SEQ), &aad, &mut out[5..])
                        .unwrap();
                    out.extend_from_slice(&tag);
                    self.keys = Some(keys);
                    self.master_seq = FINISHED_SEQ;
                    out
                }
                0x44 => self.seal_response(),
                0x60 => {
                    self.saved = Some((self.keys().clone(), self.master_seq, self.slave_seq));
                    self.keys = None;
                    vec![0x64]
                }
                0x68 => match self.saved.take() {
                    Some((keys, master_seq, slave_seq)) => {
                        self.keys = Some(keys);
                        self.master_seq = master_seq;
                        self.slave_seq = slave_seq;
                        let mut out = vec![0x6C];
                        out.extend_from_slice(&tx[1..5]);
                        out
                    }
                    None => vec![0x40],
                },
                sctr if sctr & 0xE0 == PROTOCOL_RECORD => {
                    let protection = Protection::from_bits(sctr);
                    let mut payload = tx[1..].to_vec();
                    if protection.protects_command() {
                        let seq = read_u32(&tx[1..5]);
                        assert!(seq > self.master_seq);
                        let len = tx.len() - RECORD_OVERHEAD;
                        let aad = associated_data(sctr, seq, 1, len);
                        let tag = read_tag(&tx[tx.len() - TAG_SIZE..]);
                        payload = tx[5..5 + len].to_vec();
                        let keys = self.keys().clone();
                        self.crypto
                            .open(keys.master_key(), &nonce(keys.master_nonce(), seq), &aad, &mut payload, &tag)
                            .unwrap();
                        self.master_seq = seq;
                        if self.reject > 0 {
                            self.reject -= 1;
                            return vec![0x44];
                        }
                    }
                    payload.reverse();
                    self.last_sctr = sctr;
                    self.last_response = payload;
                    if protection.protects_response() {
                        self.seal_response()
                    } else {
                        let mut out = vec![sctr];
                        out.extend_from_slice(&self.last_response);
                        out
                    }
                }
                _ => vec![0x40],
            }
        }
    }

    impl Transport for Peer {
        fn open(&mut self) -> TransportResult<()> {
            Ok(())
        }

        fn close(&mut self) -> TransportResult<()> {
            Ok(())
        }

        fn transceive(&mut self, tx: &[u8], rx: &mut [u8]) -> TransportResult<usize> {
            let out = self.handle(tx);
            if out.len() > rx.len() {
                return Err(TransportError::MessageTooLarge("peer response"));
            }
            rx[..out.len()].copy_from_slice(&out);
            Ok(out.len())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn setup(config: ChannelConfig) -> (SecureChannel, Peer, MemoryDatastore) {
        let mut channel = SecureChannel::new(config);
        channel.init();
        let store = MemoryDatastore::new().with_slot(DEFAULT_SHARED_SECRET_SLOT, &SECRET);
        (channel, Peer::default(), store)
    }

    fn full() -> ProtectionLevel {
        ProtectionLevel::new(Protection::Full)
    }

    fn exchange(
        channel: &mut SecureChannel,
        peer: &mut Peer,
        store: &mut MemoryDatastore,
        level: ProtectionLevel,
    ) -> ChannelResult<Vec<u8>> {
        let mut response = [0u8; 64];
        let len = channel.transceive(peer, store, level, &[1, 2, 3, 4], &mut response)?;
        Ok(response[..len].to_vec())
    }

    #[test]
    fn test_uninitialized_channel() {
        let mut channel = SecureChannel::new(ChannelConfig::default());
        let mut peer = Peer::default();
        let mut store = MemoryDatastore::new();
        assert_eq!(
            exchange(&mut channel, &mut peer, &mut store, full()),
            Err(ChannelError::NotInitialized)
        );
    }

    #[test]
    fn test_unprotected_exchange_skips_handshake() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        let out = exchange(&mut channel, &mut peer, &mut store, ProtectionLevel::NONE).unwrap();
        assert_eq!(out, vec![4, 3, 2, 1]);
        assert_eq!(peer.frames, vec![0x20]);
        assert!(!channel.is_negotiated());
    }

    #[test]
    fn test_handshake_then_protected_exchange() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        let out = exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        assert_eq!(out, vec![4, 3, 2, 1]);
        assert_eq!(peer.frames, vec![0x00, 0x08, 0x23]);
        assert!(channel.is_negotiated());
        assert_eq!(channel.state(), ChannelState::Idle);

        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        assert_eq!(peer.master_seq, FINISHED_SEQ + 2);
        assert_eq!(channel.statistics().handshakes, 1);
        assert_eq!(channel.statistics().records_received, 2);
    }

    #[test]
    fn test_each_direction_alone() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        for protection in [Protection::Master, Protection::Slave] {
            let out = exchange(&mut channel, &mut peer, &mut store, ProtectionLevel::new(protection)).unwrap();
            assert_eq!(out, vec![4, 3, 2, 1]);
        }
        assert_eq!(channel.statistics().handshakes, 1);
    }

    #[test]
    fn test_missing_shared_secret() {
        let mut channel = SecureChannel::new(ChannelConfig::default());
        channel.init();
        let mut peer = Peer::default();
        let mut store = MemoryDatastore::new();
        assert_eq!(
            exchange(&mut channel, &mut peer, &mut store, full()),
            Err(ChannelError::Handshake("shared secret unavailable"))
        );
        assert!(peer.frames.is_empty());
    }

    #[test]
    fn test_corrupted_response_is_retried_transparently() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();

        peer.corrupt = 1;
        let out = exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        assert_eq!(out, vec![4, 3, 2, 1]);
        assert_eq!(peer.frames.last(), Some(&0x44));
        assert_eq!(channel.statistics().alerts_sent, 1);
        assert_eq!(channel.decryption_failures(), 0);
        assert!(channel.is_negotiated());
    }

    #[test]
    fn test_persistent_corruption_is_fatal() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();

        peer.corrupt = usize::MAX;
        assert_eq!(
            exchange(&mut channel, &mut peer, &mut store, full()),
            Err(ChannelError::Integrity)
        );
        assert_eq!(channel.statistics().alerts_sent, 3);
        assert!(!channel.is_negotiated());
        assert_eq!(channel.state(), ChannelState::Idle);

        peer.corrupt = 0;
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        assert_eq!(channel.statistics().handshakes, 2);
    }

    #[test]
    fn test_integrity_alert_triggers_retransmit() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();

        peer.reject = 1;
        let out = exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        assert_eq!(out, vec![4, 3, 2, 1]);
        assert_eq!(channel.statistics().retransmits, 1);
        // Retransmit goes out under a fresh sequence number
        assert_eq!(peer.master_seq, FINISHED_SEQ + 3);
    }

    #[test]
    fn test_retransmit_bound() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default().with_max_retransmits(2));
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();

        peer.reject = 10;
        assert_eq!(
            exchange(&mut channel, &mut peer, &mut store, full()),
            Err(ChannelError::Session("alert from device"))
        );
        assert_eq!(channel.statistics().retransmits, 2);
        assert!(!channel.is_negotiated());
    }

    #[test]
    fn test_out_of_window_sequence_drops_session() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();

        peer.seq_jump = 7;
        let result = exchange(&mut channel, &mut peer, &mut store, full());
        assert_eq!(
            result,
            Err(ChannelError::SequenceOutOfWindow {
                received: HELLO_SEQ + 9,
                saved: HELLO_SEQ + 1,
            })
        );
        assert!(!channel.is_negotiated());
        assert_eq!(channel.state(), ChannelState::Idle);

        for _ in 0..3 {
            let out = exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
            assert_eq!(out, vec![4, 3, 2, 1]);
        }
        assert_eq!(channel.statistics().handshakes, 2);
        assert!(channel.is_negotiated());
    }

    /// Transport that completes with nothing received
    struct Silent;

    impl Transport for Silent {
        fn open(&mut self) -> TransportResult<()> {
            Ok(())
        }

        fn close(&mut self) -> TransportResult<()> {
            Ok(())
        }

        fn transceive(&mut self, _tx: &[u8], _rx: &mut [u8]) -> TransportResult<usize> {
            Ok(0)
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_empty_response_record() {
        let (mut channel, _, mut store) = setup(ChannelConfig::default());
        let mut response = [0u8; 16];
        assert_eq!(
            channel.transceive(&mut Silent, &mut store, ProtectionLevel::NONE, &[1, 2], &mut response),
            Err(ChannelError::Session("empty response record"))
        );
        assert_eq!(channel.state(), ChannelState::Idle);
        assert_eq!(channel.statistics().records_received, 0);
    }

    #[test]
    fn test_re_establish_forces_handshake() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        exchange(&mut channel, &mut peer, &mut store, full().with_re_establish(true)).unwrap();
        assert_eq!(channel.statistics().handshakes, 2);
    }

    #[test]
    fn test_threshold_forces_renegotiation() {
        let config = ChannelConfig::default().with_sequence_threshold(FINISHED_SEQ + 1);
        let (mut channel, mut peer, mut store) = setup(config);
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        assert_eq!(channel.statistics().renegotiations, 1);
        assert_eq!(channel.statistics().handshakes, 2);
    }

    #[test]
    fn test_save_and_restore_skips_handshake() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();

        assert!(channel.save(&mut peer, &mut store).unwrap());
        assert!(!channel.is_negotiated());
        let image = SavedContext::from_slot(store.get(DEFAULT_CONTEXT_SLOT).unwrap());
        assert!(image.is_stored());
        assert_eq!(image.master_seq.get(), FINISHED_SEQ + 1);

        channel.request_restore();
        let out = exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        assert_eq!(out, vec![4, 3, 2, 1]);
        assert_eq!(channel.statistics().handshakes, 1);
        assert_eq!(channel.statistics().contexts_restored, 1);
        assert!(store.get(DEFAULT_CONTEXT_SLOT).map_or(true, |s| s.is_empty()));
    }

    #[test]
    fn test_save_without_session_is_noop() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        assert!(!channel.save(&mut peer, &mut store).unwrap());
        assert!(peer.frames.is_empty());
    }

    #[test]
    fn test_restore_without_saved_context_handshakes() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        channel.request_restore();
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        assert_eq!(peer.frames[0], 0x00);
        assert_eq!(channel.statistics().contexts_restored, 0);
    }

    #[test]
    fn test_rejected_restore_wipes_context() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        channel.save(&mut peer, &mut store).unwrap();
        peer.saved = None;

        channel.request_restore();
        assert_eq!(
            exchange(&mut channel, &mut peer, &mut store, full()),
            Err(ChannelError::ContextRejected("restore"))
        );
        assert!(store.get(DEFAULT_CONTEXT_SLOT).map_or(true, |s| s.is_empty()));
    }

    #[test]
    fn test_memory_only_context() {
        let config = ChannelConfig::default().with_context_slot(SlotId::NOT_CONFIGURED);
        let (mut channel, mut peer, mut store) = setup(config);
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        channel.save(&mut peer, &mut store).unwrap();
        assert!(store.get(DEFAULT_CONTEXT_SLOT).is_none());

        channel.request_restore();
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        assert_eq!(channel.statistics().contexts_restored, 1);
        assert_eq!(channel.statistics().handshakes, 1);
    }

    #[test]
    fn test_handshake_wipes_saved_context() {
        let (mut channel, mut peer, mut store) = setup(ChannelConfig::default());
        exchange(&mut channel, &mut peer, &mut store, full()).unwrap();
        channel.save(&mut peer, &mut store).unwrap();

        exchange(&mut channel, &mut peer, &mut store, full().with_re_establish(true)).unwrap();
        assert!(store.get(DEFAULT_CONTEXT_SLOT).map_or(true, |s| s.is_empty()));
    }
}

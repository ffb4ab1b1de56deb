// Licensed under the Apache-2.0 license

//! Device side of the secure channel
//!
//! ```text
//!  host                                   device
//!  [00][ver]                  ------>
//!                             <------     [00][ver][random:32][slave_seq:4]
//!  [08][slave_seq][{random, slave_seq}]   (master key)
//!                             ------>
//!                             <------     [08][master_seq][{random, master_seq}]
//!                                         (slave key)
//!  [2p][seq][{apdu}][tag]     ------>     seq > last accepted master seq
//!                             <------     [2p][seq][{response}][tag]
//! ```
//!
//! The server keeps one live session and at most one saved context. A
//! handshake discards both; a fatal alert discards the live session.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, RngCore};
use se_host_channel::keys::{derive_session_keys, SHARED_SECRET_SIZE};
use se_host_channel::record::{
    associated_data, nonce, read_seq, sctr, ALERT_FATAL, ALERT_INTEGRITY_VIOLATED,
    CLIENT_HELLO_SIZE, CONTEXT_RESTORE, CONTEXT_RESTORED, CONTEXT_SAVE, CONTEXT_SAVED,
    FINISHED_SIZE, MESSAGE_FINISHED, MESSAGE_HELLO, PROTECTION_MASK, PROTOCOL_ALERT,
    PROTOCOL_HANDSHAKE, PROTOCOL_MANAGE_CONTEXT, PROTOCOL_MASK, PROTOCOL_RECORD, RANDOM_SIZE,
    RECORD_HEADER_SIZE, RESTORE_SIZE, SCTR_MESSAGE_MASK, SCTR_SIZE, SEQ_SIZE, SERVER_HELLO_SIZE,
    TAG_SIZE,
};
use se_host_channel::{ChannelCrypto, Protection, SessionKeys, SoftwareCrypto, RECORD_OVERHEAD};
use zeroize::Zeroizing;

/// Upper bound (exclusive) of a randomly chosen initial sequence number
const INITIAL_SEQUENCE_LIMIT: u32 = 0x0100_0000;

const PROTOCOL_VERSION: u8 = 0x01;

/// Reply to one host frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpReply {
    pub frame: Vec<u8>,
    /// The frame is a record sealed with the slave key
    pub sealed: bool,
}

impl ScpReply {
    fn plain(frame: Vec<u8>) -> Self {
        Self {
            frame,
            sealed: false,
        }
    }

    fn sealed(frame: Vec<u8>) -> Self {
        Self {
            frame,
            sealed: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScpStatistics {
    pub handshakes: u32,
    pub records: u32,
    pub alerts_sent: u32,
    pub alerts_received: u32,
    pub resent: u32,
    pub contexts_saved: u32,
    pub contexts_restored: u32,
}

struct PendingHandshake {
    random: Zeroizing<[u8; RANDOM_SIZE]>,
    seq: u32,
}

struct ServerSession {
    keys: SessionKeys,
    /// Last sequence number accepted from the host
    master_seq: u32,
    /// Last sequence number sent to the host
    slave_seq: u32,
}

struct LastResponse {
    sctr: u8,
    payload: Zeroizing<Vec<u8>>,
}

enum Rejected {
    Integrity,
    Fatal(&'static str),
}

pub struct ScpServer {
    crypto: SoftwareCrypto,
    shared_secret: Zeroizing<Vec<u8>>,
    version: u8,
    rng: StdRng,
    initial_sequence: Option<u32>,
    pending: Option<PendingHandshake>,
    session: Option<ServerSession>,
    saved: Option<ServerSession>,
    last_response: Option<LastResponse>,
    sequence_jump: u32,
    statistics: ScpStatistics,
}

impl ScpServer {
    /// `shared_secret` must be [`SHARED_SECRET_SIZE`] bytes; the caller checks
    pub fn new(shared_secret: &[u8], rng: StdRng) -> Self {
        debug_assert_eq!(shared_secret.len(), SHARED_SECRET_SIZE);
        Self {
            crypto: SoftwareCrypto::new(),
            shared_secret: Zeroizing::new(shared_secret.to_vec()),
            version: PROTOCOL_VERSION,
            rng,
            initial_sequence: None,
            pending: None,
            session: None,
            saved: None,
            last_response: None,
            sequence_jump: 0,
            statistics: ScpStatistics::default(),
        }
    }

    /// Start both directions of every new session at `seq`
    pub fn with_initial_sequence(mut self, seq: Option<u32>) -> Self {
        self.initial_sequence = seq;
        self
    }

    pub fn statistics(&self) -> ScpStatistics {
        self.statistics
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn has_saved_context(&self) -> bool {
        self.saved.is_some()
    }

    /// Advance the slave sequence by `skip` extra numbers on the next
    /// sealed response
    pub fn skip_sequence(&mut self, skip: u32) {
        self.sequence_jump = skip;
    }

    /// Drop the live session as a power loss would; a saved context survives
    pub fn power_cycle(&mut self) {
        self.pending = None;
        self.session = None;
        self.last_response = None;
    }

    /// Answer one host frame; `process` runs the APDU carried by a record
    pub fn handle<F>(&mut self, frame: &[u8], process: F) -> ScpReply
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let Some(&first) = frame.first() else {
            return self.fatal("empty frame");
        };
        if first & 0x80 != 0 {
            return self.fatal("reserved sctr bit set");
        }
        match first & PROTOCOL_MASK {
            PROTOCOL_HANDSHAKE => match first & SCTR_MESSAGE_MASK {
                MESSAGE_HELLO => self.hello(frame),
                MESSAGE_FINISHED => self.finished(frame),
                _ => self.fatal("unknown handshake message"),
            },
            PROTOCOL_RECORD => self.record(frame, process),
            PROTOCOL_ALERT => self.alert(frame),
            PROTOCOL_MANAGE_CONTEXT => self.manage_context(frame),
            _ => self.fatal("unknown protocol"),
        }
    }

    fn hello(&mut self, frame: &[u8]) -> ScpReply {
        if frame.len() != CLIENT_HELLO_SIZE || frame[1] != self.version {
            return self.fatal("unsupported hello");
        }
        self.session = None;
        self.saved = None;
        self.last_response = None;

        let mut random = Zeroizing::new([0u8; RANDOM_SIZE]);
        self.rng.fill_bytes(&mut random[..]);
        let seq = self.next_initial_sequence();

        let mut out = Vec::with_capacity(SERVER_HELLO_SIZE);
        out.push(frame[0]);
        out.push(self.version);
        out.extend_from_slice(&random[..]);
        out.extend_from_slice(&seq.to_be_bytes());
        self.pending = Some(PendingHandshake { random, seq });
        debug!("Server hello, slave sequence {:#010x}", seq);
        ScpReply::plain(out)
    }

    fn finished(&mut self, frame: &[u8]) -> ScpReply {
        let Some(pending) = self.pending.take() else {
            return self.fatal("finished without hello");
        };
        match self.complete_handshake(frame, &pending) {
            Ok(out) => {
                self.statistics.handshakes += 1;
                info!("Simulated device negotiated a secure channel session");
                ScpReply::plain(out)
            }
            Err(reason) => self.fatal(reason),
        }
    }

    fn complete_handshake(
        &mut self,
        frame: &[u8],
        pending: &PendingHandshake,
    ) -> Result<Vec<u8>, &'static str> {
        if frame.len() != FINISHED_SIZE {
            return Err("finished has wrong length");
        }
        if read_seq(frame) != Some(pending.seq) {
            return Err("finished carries wrong sequence number");
        }
        let keys = derive_session_keys(&self.crypto, &self.shared_secret, &pending.random[..])
            .map_err(|_| "session key derivation failed")?;

        let body_len = RANDOM_SIZE + SEQ_SIZE;
        let mut body = Zeroizing::new(frame[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + body_len].to_vec());
        let tag = read_tag(&frame[RECORD_HEADER_SIZE + body_len..]);
        let aad = associated_data(frame[0], pending.seq, self.version, body_len);
        self.crypto
            .open(
                keys.master_key(),
                &nonce(keys.master_nonce(), pending.seq),
                &aad,
                &mut body,
                &tag,
            )
            .map_err(|_| "finished failed authentication")?;
        if body[..RANDOM_SIZE] != pending.random[..]
            || body[RANDOM_SIZE..] != pending.seq.to_be_bytes()
        {
            return Err("finished does not echo the handshake");
        }

        let master_seq = self.next_initial_sequence();
        let mut out = Vec::with_capacity(FINISHED_SIZE);
        out.push(frame[0]);
        out.extend_from_slice(&master_seq.to_be_bytes());
        out.extend_from_slice(&pending.random[..]);
        out.extend_from_slice(&master_seq.to_be_bytes());
        let aad = associated_data(frame[0], master_seq, self.version, body_len);
        let tag = self
            .crypto
            .seal(
                keys.slave_key(),
                &nonce(keys.slave_nonce(), master_seq),
                &aad,
                &mut out[RECORD_HEADER_SIZE..],
            )
            .map_err(|_| "finished sealing failed")?;
        out.extend_from_slice(&tag);

        self.session = Some(ServerSession {
            keys,
            master_seq,
            slave_seq: pending.seq,
        });
        Ok(out)
    }

    fn record<F>(&mut self, frame: &[u8], process: F) -> ScpReply
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let record_sctr = frame[0];
        if record_sctr & !PROTECTION_MASK != PROTOCOL_RECORD {
            return self.fatal("unknown record message");
        }
        let protection = Protection::from_bits(record_sctr);
        if protection.is_protected() && self.session.is_none() {
            return self.fatal("protected record without a session");
        }

        let apdu = if protection.protects_command() {
            match self.open_command(frame) {
                Ok(apdu) => apdu,
                Err(Rejected::Integrity) => return self.integrity_alert(),
                Err(Rejected::Fatal(reason)) => return self.fatal(reason),
            }
        } else {
            Zeroizing::new(frame[SCTR_SIZE..].to_vec())
        };
        self.statistics.records += 1;

        let response = Zeroizing::new(process(&apdu));
        if !protection.protects_response() {
            self.last_response = None;
            let mut out = Vec::with_capacity(SCTR_SIZE + response.len());
            out.push(record_sctr);
            out.extend_from_slice(&response);
            return ScpReply::plain(out);
        }
        self.last_response = Some(LastResponse {
            sctr: record_sctr,
            payload: response,
        });
        self.seal_last_response()
    }

    fn open_command(&mut self, frame: &[u8]) -> Result<Zeroizing<Vec<u8>>, Rejected> {
        if frame.len() < RECORD_OVERHEAD {
            return Err(Rejected::Fatal("truncated record"));
        }
        let session = self
            .session
            .as_mut()
            .ok_or(Rejected::Fatal("protected record without a session"))?;
        let seq = read_seq(frame).ok_or(Rejected::Fatal("truncated record"))?;
        if seq <= session.master_seq {
            return Err(Rejected::Fatal("replayed sequence number"));
        }

        let payload_len = frame.len() - RECORD_OVERHEAD;
        let mut payload =
            Zeroizing::new(frame[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + payload_len].to_vec());
        let tag = read_tag(&frame[frame.len() - TAG_SIZE..]);
        let aad = associated_data(frame[0], seq, self.version, payload_len);
        self.crypto
            .open(
                session.keys.master_key(),
                &nonce(session.keys.master_nonce(), seq),
                &aad,
                &mut payload,
                &tag,
            )
            .map_err(|_| Rejected::Integrity)?;
        session.master_seq = seq;
        Ok(payload)
    }

    fn seal_last_response(&mut self) -> ScpReply {
        match self.try_seal_last_response() {
            Ok(frame) => ScpReply::sealed(frame),
            Err(reason) => self.fatal(reason),
        }
    }

    fn try_seal_last_response(&mut self) -> Result<Vec<u8>, &'static str> {
        let session = self.session.as_mut().ok_or("no session")?;
        let last = self.last_response.as_ref().ok_or("no response to resend")?;
        let seq = session
            .slave_seq
            .checked_add(1)
            .and_then(|seq| seq.checked_add(self.sequence_jump))
            .ok_or("sequence number exhausted")?;
        self.sequence_jump = 0;

        let mut out = Vec::with_capacity(last.payload.len() + RECORD_OVERHEAD);
        out.push(last.sctr);
        out.extend_from_slice(&seq.to_be_bytes());
        out.extend_from_slice(&last.payload);
        let aad = associated_data(last.sctr, seq, self.version, last.payload.len());
        let tag = self
            .crypto
            .seal(
                session.keys.slave_key(),
                &nonce(session.keys.slave_nonce(), seq),
                &aad,
                &mut out[RECORD_HEADER_SIZE..],
            )
            .map_err(|_| "record sealing failed")?;
        out.extend_from_slice(&tag);
        session.slave_seq = seq;
        Ok(out)
    }

    fn alert(&mut self, frame: &[u8]) -> ScpReply {
        self.statistics.alerts_received += 1;
        let integrity = sctr(PROTOCOL_ALERT, ALERT_INTEGRITY_VIOLATED, Protection::None);
        if frame.len() == SCTR_SIZE && frame[0] == integrity {
            warn!("Host reported an integrity failure, resending last response");
            self.statistics.resent += 1;
            return self.seal_last_response();
        }
        self.fatal("alert from host")
    }

    fn manage_context(&mut self, frame: &[u8]) -> ScpReply {
        match frame[0] & SCTR_MESSAGE_MASK {
            CONTEXT_SAVE if frame.len() == SCTR_SIZE => match self.session.take() {
                Some(session) => {
                    self.saved = Some(session);
                    self.last_response = None;
                    self.statistics.contexts_saved += 1;
                    info!("Secure channel context saved");
                    ScpReply::plain(vec![CONTEXT_SAVED])
                }
                None => self.fatal("no session to save"),
            },
            CONTEXT_RESTORE if frame.len() == RESTORE_SIZE => {
                let seq = read_seq(frame);
                match self.saved.take() {
                    Some(saved) if Some(saved.slave_seq) == seq => {
                        let mut out = vec![CONTEXT_RESTORED];
                        out.extend_from_slice(&saved.slave_seq.to_be_bytes());
                        self.session = Some(saved);
                        self.statistics.contexts_restored += 1;
                        info!("Secure channel context restored");
                        ScpReply::plain(out)
                    }
                    _ => self.fatal("no matching saved context"),
                }
            }
            _ => self.fatal("unknown context message"),
        }
    }

    fn next_initial_sequence(&mut self) -> u32 {
        match self.initial_sequence {
            Some(seq) => seq,
            None => self.rng.gen_range(1..INITIAL_SEQUENCE_LIMIT),
        }
    }

    fn integrity_alert(&mut self) -> ScpReply {
        warn!("Record failed authentication, asking for a retransmit");
        self.statistics.alerts_sent += 1;
        ScpReply::plain(vec![sctr(
            PROTOCOL_ALERT,
            ALERT_INTEGRITY_VIOLATED,
            Protection::None,
        )])
    }

    fn fatal(&mut self, reason: &'static str) -> ScpReply {
        warn!("Fatal alert: {}", reason);
        self.pending = None;
        self.session = None;
        self.last_response = None;
        self.statistics.alerts_sent += 1;
        ScpReply::plain(vec![sctr(PROTOCOL_ALERT, ALERT_FATAL, Protection::None)])
    }
}

fn read_tag(bytes: &[u8]) -> [u8; TAG_SIZE] {
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&bytes[..TAG_SIZE]);
    tag
}
